//! Transport seam between the client facade and the store service.
//!
//! The client sees an [`Endpoint`]: request/reply calls addressed to a
//! numeric service id, a one-way push stream coming back, and a signal
//! that fires when the peer dies. The service side registers
//! [`RemoteService`] implementations with a [`ServiceHost`] under those
//! ids. The only transport shipped here is in-memory ([`channel`]); the
//! traits are the contract a real IPC binding would implement.

pub mod channel;

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Identifies one registered service on the peer. Id `0` is the root
/// service reachable right after connecting; everything else is handed
/// out by the peer (store handles, snapshot handles).
pub type ServiceId = u64;

pub const ROOT_SERVICE: ServiceId = 0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("no service registered for id {0}")]
    UnknownService(ServiceId),
}

pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, TransportError>> + Send + 'a>>;

pub type HandleFuture<'a> = Pin<Box<dyn Future<Output = Bytes> + Send + 'a>>;

/// Client side of a connection.
///
/// Calls to the same endpoint are delivered and answered in order.
pub trait Endpoint: Send + Sync {
    fn call(&self, target: ServiceId, code: u32, data: Bytes) -> CallFuture<'_>;

    /// Receiver that flips to `true` once the peer has terminated.
    /// Calls made after that fail with [`TransportError::Disconnected`].
    fn closed(&self) -> tokio::sync::watch::Receiver<bool>;
}

/// One service registered on the host. Replies carry their status inside
/// the payload; only transport failures surface outside it.
pub trait RemoteService: Send + Sync {
    fn handle(&self, code: u32, data: Bytes) -> HandleFuture<'_>;
}

/// Sink for one-way pushes toward the client. Cloneable and fire-and-forget;
/// a push to a gone client is dropped, never an error.
#[derive(Clone)]
pub struct PushSender {
    pub(crate) tx: tokio::sync::mpsc::UnboundedSender<(u32, Bytes)>,
}

impl PushSender {
    pub fn send(&self, code: u32, data: Bytes) -> bool {
        self.tx.send((code, data)).is_ok()
    }
}

/// Client-side consumer of the push stream.
pub trait PushHandler: Send + Sync {
    fn on_push(&self, code: u32, data: Bytes);
}
