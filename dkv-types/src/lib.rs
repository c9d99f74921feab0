//! Shared value types for the distributed KV client/service boundary.
//!
//! Everything that crosses the wire in both directions lives here: blob
//! types (`Key`, `Value`, `Entry`), the closed `Status` set, store options
//! and the change-notification payload. The crates above (`dkv-wire`,
//! `dkv-service`, `dkv-client`) agree on these and nothing else.

pub mod change;
pub mod constant;
pub mod device;
pub mod options;
pub mod status;
pub mod types;

pub use change::ChangeNotification;
pub use device::DeviceInfo;
pub use options::{
    ControlCmd, KvParam, KvStoreType, SecurityLevel, StoreOptions, StoreOptionsHeader,
    SubscribeType, SyncMode, SyncPolicy,
};
pub use status::Status;
pub use types::{Entry, Key, Value};
