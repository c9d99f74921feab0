//! Wire format for the store boundary.
//!
//! Messages are flat byte strings: little-endian integers, length-prefixed
//! blobs, and for bulk payloads a two-path encoding chosen by raw size
//! (per-item structured fields below `SWITCH_RAW_DATA_SIZE`, one contiguous
//! raw section at or above it). All decoding goes through [`BufReader`],
//! which refuses to read past the end of the message.

pub mod codec;
pub mod cursor;
pub mod ops;

pub use cursor::{BufReader, BufWriter, WireError};
pub use ops::{DataOp, PushOp, SnapshotOp, StoreOp};

use dkv_types::Status;

impl From<WireError> for Status {
    fn from(_: WireError) -> Status {
        Status::IpcError
    }
}
