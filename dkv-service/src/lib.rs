//! Service side of the store boundary.
//!
//! A [`KvStoreDataService`] sits at the root of a connection and opens
//! stores; each open store is a [`SingleStoreService`] registered under
//! its own id, dispatching requests through a fixed op-code table to an
//! opaque [`StoreDelegate`] engine. Result sets are snapshot services
//! paginating through [`SnapshotPaginator`].

pub mod data_service;
pub mod delegate;
pub mod observer;
pub mod paginator;
pub mod snapshot_service;
pub mod store_service;

pub use data_service::{DelegateFactory, KvStoreDataService};
pub use delegate::{ChangeSet, MemoryDelegate, SnapshotDelegate, StoreDelegate};
pub use paginator::{PaginatorConfig, SnapshotPaginator};
pub use snapshot_service::SnapshotService;
pub use store_service::SingleStoreService;
