//! Remote face of one result set: decodes snapshot requests, pages through
//! a [`SnapshotPaginator`], encodes the page replies.
//!
//! Reply layouts, after the status word:
//! - get entries / get keys: `| next key | list |`
//! - get: `| value |`

use crate::paginator::SnapshotPaginator;
use bytes::Bytes;
use dkv_transport::{HandleFuture, RemoteService};
use dkv_types::{Key, Status};
use dkv_wire::codec;
use dkv_wire::ops::{self, SNAPSHOT_DESCRIPTOR};
use dkv_wire::{BufReader, BufWriter, SnapshotOp, WireError};
use tracing::warn;

pub struct SnapshotService {
    paginator: SnapshotPaginator,
}

impl SnapshotService {
    pub fn new(paginator: SnapshotPaginator) -> Self {
        SnapshotService { paginator }
    }

    fn dispatch(&self, code: u32, data: &[u8]) -> Bytes {
        let mut r = BufReader::new(data);
        if let Err(err) = ops::check_descriptor(&mut r, SNAPSHOT_DESCRIPTOR) {
            warn!(%err, "snapshot request refused");
            return ops::status_reply(Status::IpcError);
        }
        let op = match SnapshotOp::try_from(code) {
            Ok(op) => op,
            Err(_) => {
                warn!(code, "unknown snapshot operation");
                return ops::status_reply(Status::Error);
            }
        };
        let result = match op {
            SnapshotOp::GetEntries => self.get_entries(&mut r),
            SnapshotOp::GetKeys => self.get_keys(&mut r),
            SnapshotOp::Get => self.get(&mut r),
        };
        result.unwrap_or_else(|err| {
            warn!(%err, op = ?op, "malformed snapshot request");
            ops::status_reply(Status::IpcError)
        })
    }

    fn get_entries(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let prefix = Key::from_raw(r.read_blob()?.to_vec());
        let continuation = Key::from_raw(r.read_blob()?.to_vec());
        let mut w = BufWriter::new();
        match self.paginator.entries_page(&prefix, &continuation) {
            Ok((page, next)) => {
                ops::write_status(&mut w, Status::Success);
                w.write_blob(next.as_bytes());
                codec::write_entries(&mut w, &page);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn get_keys(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let prefix = Key::from_raw(r.read_blob()?.to_vec());
        let continuation = Key::from_raw(r.read_blob()?.to_vec());
        let mut w = BufWriter::new();
        match self.paginator.keys_page(&prefix, &continuation) {
            Ok((page, next)) => {
                ops::write_status(&mut w, Status::Success);
                w.write_blob(next.as_bytes());
                codec::write_keys(&mut w, &page);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn get(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let key = Key::from_raw(r.read_blob()?.to_vec());
        let mut w = BufWriter::new();
        match self.paginator.get(&key) {
            Ok(value) => {
                ops::write_status(&mut w, Status::Success);
                codec::write_value(&mut w, &value);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }
}

impl RemoteService for SnapshotService {
    fn handle(&self, code: u32, data: Bytes) -> HandleFuture<'_> {
        Box::pin(async move { self.dispatch(code, &data) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{MemoryDelegate, StoreDelegate};
    use dkv_types::Entry;

    fn service() -> SnapshotService {
        let store = MemoryDelegate::new();
        store.put(Entry::new("a", "1")).unwrap();
        store.put(Entry::new("b", "2")).unwrap();
        SnapshotService::new(SnapshotPaginator::new(store.snapshot().unwrap()))
    }

    #[test]
    fn bad_descriptor_is_refused_with_ipc_error() {
        let svc = service();
        let mut w = ops::request("dkv.SomethingElse");
        w.write_blob(b"");
        w.write_blob(b"");
        let reply = svc.dispatch(SnapshotOp::GetEntries.code(), &w.freeze());
        let mut r = BufReader::new(&reply);
        assert_eq!(ops::read_status(&mut r).unwrap(), Status::IpcError);
    }

    #[test]
    fn entries_page_reply_carries_next_key_and_list() {
        let svc = service();
        let mut w = ops::request(SNAPSHOT_DESCRIPTOR);
        w.write_blob(b"");
        w.write_blob(b"");
        let reply = svc.dispatch(SnapshotOp::GetEntries.code(), &w.freeze());
        let mut r = BufReader::new(&reply);
        assert_eq!(ops::read_status(&mut r).unwrap(), Status::Success);
        let next = r.read_blob().unwrap();
        assert!(next.is_empty());
        let entries = codec::read_entries(&mut r).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
