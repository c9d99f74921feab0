//! Client side of the store boundary.
//!
//! [`KvStoreClient`] talks to the root data service and opens
//! [`SingleKvStore`] handles. A handle validates arguments locally,
//! encodes requests, and turns status-first replies into `Result`s.
//! Change notifications and sync outcomes come back over the push stream
//! and are routed to registered observers; the peer's death is fanned out
//! through [`DeathWatch`].

pub mod client;
pub mod death_watch;
pub mod result_set;
pub mod router;
pub mod store;

pub use client::KvStoreClient;
pub use death_watch::{DeathRecipient, DeathWatch};
pub use result_set::KvStoreResultSet;
pub use router::{KvStoreObserver, PushRouter, SyncCallback};
pub use store::SingleKvStore;

use bytes::Bytes;
use dkv_transport::{Endpoint, ServiceId, TransportError};
use dkv_types::Status;
use dkv_wire::{ops, BufReader};
use std::sync::Arc;

pub(crate) async fn invoke(
    endpoint: &Arc<dyn Endpoint>,
    target: ServiceId,
    code: u32,
    data: Bytes,
) -> Result<Bytes, Status> {
    endpoint.call(target, code, data).await.map_err(|err| match err {
        TransportError::Disconnected => Status::ServerUnavailable,
        TransportError::UnknownService(_) => Status::IpcError,
    })
}

/// Reads the leading status word and fails on anything not success-like.
pub(crate) fn expect_success(r: &mut BufReader<'_>) -> Result<Status, Status> {
    let status = ops::read_status(r)?;
    if status.is_success() {
        Ok(status)
    } else {
        Err(status)
    }
}
