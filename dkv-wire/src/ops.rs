//! Interface descriptors and operation codes.
//!
//! Codes are dense and stable; the service dispatches on them through a
//! fixed table. A code outside the table is answered, not ignored.

use crate::cursor::{BufReader, BufWriter, WireError};
use dkv_types::Status;

pub const STORE_DESCRIPTOR: &str = "dkv.SingleKvStore";
pub const SNAPSHOT_DESCRIPTOR: &str = "dkv.KvStoreSnapshot";
pub const DATA_SERVICE_DESCRIPTOR: &str = "dkv.KvStoreDataService";

/// Operations on an open store handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum StoreOp {
    Put = 0,
    Delete = 1,
    Get = 2,
    SubscribeKvStore = 3,
    UnsubscribeKvStore = 4,
    GetEntries = 5,
    GetEntriesWithQuery = 6,
    GetResultSet = 7,
    GetResultSetWithQuery = 8,
    CloseResultSet = 9,
    Sync = 10,
    RemoveDeviceData = 11,
    RegisterSyncCallback = 12,
    UnregisterSyncCallback = 13,
    PutBatch = 14,
    DeleteBatch = 15,
    StartTransaction = 16,
    Commit = 17,
    Rollback = 18,
    Control = 19,
    SetCapabilityEnabled = 20,
    SetCapabilityRange = 21,
    GetSecurityLevel = 22,
}

impl StoreOp {
    pub const COUNT: usize = 23;

    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for StoreOp {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, WireError> {
        use StoreOp::*;
        const TABLE: [StoreOp; StoreOp::COUNT] = [
            Put,
            Delete,
            Get,
            SubscribeKvStore,
            UnsubscribeKvStore,
            GetEntries,
            GetEntriesWithQuery,
            GetResultSet,
            GetResultSetWithQuery,
            CloseResultSet,
            Sync,
            RemoveDeviceData,
            RegisterSyncCallback,
            UnregisterSyncCallback,
            PutBatch,
            DeleteBatch,
            StartTransaction,
            Commit,
            Rollback,
            Control,
            SetCapabilityEnabled,
            SetCapabilityRange,
            GetSecurityLevel,
        ];
        TABLE
            .get(code as usize)
            .copied()
            .ok_or(WireError::UnknownOp(code))
    }
}

/// Operations on a snapshot/result-set handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SnapshotOp {
    GetEntries = 0,
    GetKeys = 1,
    Get = 2,
}

impl SnapshotOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for SnapshotOp {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, WireError> {
        match code {
            0 => Ok(SnapshotOp::GetEntries),
            1 => Ok(SnapshotOp::GetKeys),
            2 => Ok(SnapshotOp::Get),
            other => Err(WireError::UnknownOp(other)),
        }
    }
}

/// Operations on the root data service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DataOp {
    GetSingleKvStore = 0,
    CloseKvStore = 1,
    DeleteKvStore = 2,
    GetDeviceList = 3,
}

impl DataOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for DataOp {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, WireError> {
        match code {
            0 => Ok(DataOp::GetSingleKvStore),
            1 => Ok(DataOp::CloseKvStore),
            2 => Ok(DataOp::DeleteKvStore),
            3 => Ok(DataOp::GetDeviceList),
            other => Err(WireError::UnknownOp(other)),
        }
    }
}

/// One-way pushes from service to client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PushOp {
    OnChange = 0,
    SyncCompleted = 1,
}

impl PushOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for PushOp {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, WireError> {
        match code {
            0 => Ok(PushOp::OnChange),
            1 => Ok(PushOp::SyncCompleted),
            other => Err(WireError::UnknownOp(other)),
        }
    }
}

/// Starts a request body with the interface descriptor token.
pub fn request(descriptor: &str) -> BufWriter {
    let mut w = BufWriter::new();
    w.write_string(descriptor);
    w
}

/// Consumes and checks the descriptor token at the head of a request.
pub fn check_descriptor(r: &mut BufReader<'_>, expected: &str) -> Result<(), WireError> {
    let got = r.read_string()?;
    if got == expected {
        Ok(())
    } else {
        Err(WireError::BadDescriptor)
    }
}

pub fn write_status(w: &mut BufWriter, status: Status) {
    w.write_u32(status.code());
}

pub fn read_status(r: &mut BufReader<'_>) -> Result<Status, WireError> {
    Ok(Status::from_code(r.read_u32()?))
}

/// A reply that carries a status and nothing else.
pub fn status_reply(status: Status) -> bytes::Bytes {
    let mut w = BufWriter::new();
    write_status(&mut w, status);
    w.freeze()
}
