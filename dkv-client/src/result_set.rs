//! Client proxy for one service-side result set.

use crate::{expect_success, invoke};
use dkv_transport::{Endpoint, ServiceId};
use dkv_types::{Entry, Key, Status, Value};
use dkv_wire::ops::{self, SNAPSHOT_DESCRIPTOR};
use dkv_wire::{codec, BufReader, SnapshotOp};
use std::sync::Arc;

/// Pages through a read-consistent snapshot held by the service. Obtained
/// from [`SingleKvStore::get_result_set`](crate::SingleKvStore::get_result_set)
/// and released with
/// [`SingleKvStore::close_result_set`](crate::SingleKvStore::close_result_set).
pub struct KvStoreResultSet {
    endpoint: Arc<dyn Endpoint>,
    handle: ServiceId,
}

impl KvStoreResultSet {
    pub(crate) fn new(endpoint: Arc<dyn Endpoint>, handle: ServiceId) -> Self {
        KvStoreResultSet { endpoint, handle }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// One page of entries. An empty continuation key starts the scan; the
    /// returned key is empty once the scan is exhausted.
    pub async fn get_entries(
        &self,
        prefix: &Key,
        continuation: &Key,
    ) -> Result<(Vec<Entry>, Key), Status> {
        let mut w = ops::request(SNAPSHOT_DESCRIPTOR);
        w.write_blob(prefix.as_bytes());
        w.write_blob(continuation.as_bytes());
        let reply = invoke(
            &self.endpoint,
            self.handle,
            SnapshotOp::GetEntries.code(),
            w.freeze(),
        )
        .await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        let next = Key::from_raw(r.read_blob()?.to_vec());
        let entries = codec::read_entries(&mut r)?;
        Ok((entries, next))
    }

    /// Like [`get_entries`](Self::get_entries) but keys only.
    pub async fn get_keys(
        &self,
        prefix: &Key,
        continuation: &Key,
    ) -> Result<(Vec<Key>, Key), Status> {
        let mut w = ops::request(SNAPSHOT_DESCRIPTOR);
        w.write_blob(prefix.as_bytes());
        w.write_blob(continuation.as_bytes());
        let reply = invoke(
            &self.endpoint,
            self.handle,
            SnapshotOp::GetKeys.code(),
            w.freeze(),
        )
        .await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        let next = Key::from_raw(r.read_blob()?.to_vec());
        let keys = codec::read_keys(&mut r)?;
        Ok((keys, next))
    }

    /// Point read against the snapshot, unaffected by writes made after
    /// the result set was opened.
    pub async fn get(&self, key: &Key) -> Result<Value, Status> {
        let mut w = ops::request(SNAPSHOT_DESCRIPTOR);
        w.write_blob(key.as_bytes());
        let reply = invoke(&self.endpoint, self.handle, SnapshotOp::Get.code(), w.freeze()).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(codec::read_value(&mut r)?)
    }
}
