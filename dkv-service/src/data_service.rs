//! Root service of a connection: opens and closes stores.
//!
//! An opened store is registered with the host under a fresh id and the
//! id goes back to the client; reopening the same app/store pair returns
//! the existing id. Closing unregisters the store service and releases
//! its result sets.

use crate::delegate::StoreDelegate;
use crate::paginator::PaginatorConfig;
use crate::store_service::SingleStoreService;
use bytes::Bytes;
use dkv_transport::channel::ServiceHost;
use dkv_transport::{HandleFuture, RemoteService, ServiceId};
use dkv_types::{DeviceInfo, Status, StoreOptions};
use dkv_wire::codec;
use dkv_wire::ops::{self, DATA_SERVICE_DESCRIPTOR};
use dkv_wire::{BufReader, BufWriter, DataOp, WireError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Builds the engine behind a newly opened store.
pub type DelegateFactory =
    Box<dyn Fn(&str, &str, &StoreOptions) -> Result<Arc<dyn StoreDelegate>, Status> + Send + Sync>;

struct OpenStore {
    id: ServiceId,
    service: Arc<SingleStoreService>,
}

pub struct KvStoreDataService {
    host: Arc<ServiceHost>,
    device_id: String,
    devices: Vec<DeviceInfo>,
    factory: DelegateFactory,
    paginator_config: PaginatorConfig,
    stores: Mutex<HashMap<(String, String), OpenStore>>,
}

impl KvStoreDataService {
    pub fn new(host: Arc<ServiceHost>, device_id: impl Into<String>, factory: DelegateFactory) -> Self {
        KvStoreDataService {
            host,
            device_id: device_id.into(),
            devices: Vec::new(),
            factory,
            paginator_config: PaginatorConfig::default(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_paginator_config(mut self, config: PaginatorConfig) -> Self {
        self.paginator_config = config;
        self
    }

    fn dispatch(&self, code: u32, data: &[u8]) -> Bytes {
        let mut r = BufReader::new(data);
        if let Err(err) = ops::check_descriptor(&mut r, DATA_SERVICE_DESCRIPTOR) {
            warn!(%err, "data service request refused");
            return ops::status_reply(Status::IpcError);
        }
        let op = match DataOp::try_from(code) {
            Ok(op) => op,
            Err(_) => {
                warn!(code, "unknown data service operation");
                return ops::status_reply(Status::Error);
            }
        };
        let result = match op {
            DataOp::GetSingleKvStore => self.get_single_kv_store(&mut r),
            DataOp::CloseKvStore => self.close_kv_store(&mut r),
            DataOp::DeleteKvStore => self.delete_kv_store(&mut r),
            DataOp::GetDeviceList => self.get_device_list(&mut r),
        };
        result.unwrap_or_else(|err| {
            warn!(%err, op = ?op, "malformed data service request");
            ops::status_reply(Status::IpcError)
        })
    }

    fn get_single_kv_store(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let app_id = r.read_string()?;
        let store_id = r.read_string()?;
        let options = codec::read_options(r)?;
        let mut w = BufWriter::new();
        if app_id.is_empty() || store_id.is_empty() {
            ops::write_status(&mut w, Status::InvalidArgument);
            return Ok(w.freeze());
        }
        let Ok(mut stores) = self.stores.lock() else {
            ops::write_status(&mut w, Status::IllegalState);
            return Ok(w.freeze());
        };
        let key = (app_id.clone(), store_id.clone());
        if let Some(open) = stores.get(&key) {
            ops::write_status(&mut w, Status::Success);
            w.write_u64(open.id);
            return Ok(w.freeze());
        }
        let delegate = match (self.factory)(&app_id, &store_id, &options) {
            Ok(delegate) => delegate,
            Err(status) => {
                ops::write_status(&mut w, status);
                return Ok(w.freeze());
            }
        };
        let service = Arc::new(
            SingleStoreService::new(
                store_id.clone(),
                self.device_id.clone(),
                options.security_level,
                delegate,
                Arc::clone(&self.host),
            )
            .with_paginator_config(self.paginator_config),
        );
        let id = self.host.register(service.clone());
        stores.insert(key, OpenStore { id, service });
        info!(app = %app_id, store = %store_id, handle = id, "store opened");
        ops::write_status(&mut w, Status::Success);
        w.write_u64(id);
        Ok(w.freeze())
    }

    fn close_kv_store(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let app_id = r.read_string()?;
        let store_id = r.read_string()?;
        let Ok(mut stores) = self.stores.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        let Some(open) = stores.remove(&(app_id.clone(), store_id.clone())) else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        open.service.release_result_sets();
        self.host.unregister(open.id);
        info!(app = %app_id, store = %store_id, "store closed");
        Ok(ops::status_reply(Status::Success))
    }

    fn delete_kv_store(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        // Closing and deleting differ only in engine-side cleanup, which
        // is behind the delegate seam.
        self.close_kv_store(r)
    }

    fn get_device_list(&self, _r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let mut w = BufWriter::new();
        ops::write_status(&mut w, Status::Success);
        codec::write_device_list(&mut w, &self.devices);
        Ok(w.freeze())
    }
}

impl RemoteService for KvStoreDataService {
    fn handle(&self, code: u32, data: Bytes) -> HandleFuture<'_> {
        Box::pin(async move { self.dispatch(code, &data) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::MemoryDelegate;
    use dkv_transport::channel::channel_pair;
    use dkv_transport::PushHandler;

    struct NullPush;

    impl PushHandler for NullPush {
        fn on_push(&self, _code: u32, _data: Bytes) {}
    }

    fn data_service() -> KvStoreDataService {
        let (_endpoint, host) = channel_pair(Arc::new(NullPush));
        KvStoreDataService::new(
            host,
            "local-device",
            Box::new(|_, _, _| Ok(Arc::new(MemoryDelegate::new()) as Arc<dyn StoreDelegate>)),
        )
        .with_devices(vec![DeviceInfo::new("dev-1", "alpha", "phone")])
    }

    fn open_request(app: &str, store: &str) -> Bytes {
        let mut w = ops::request(DATA_SERVICE_DESCRIPTOR);
        w.write_string(app);
        w.write_string(store);
        codec::write_options(&mut w, &StoreOptions::default());
        w.freeze()
    }

    #[tokio::test]
    async fn reopening_returns_the_same_handle() {
        let svc = data_service();
        let reply = svc.dispatch(DataOp::GetSingleKvStore.code(), &open_request("app", "s"));
        let mut r = BufReader::new(&reply);
        assert_eq!(ops::read_status(&mut r).unwrap(), Status::Success);
        let first = r.read_u64().unwrap();

        let reply = svc.dispatch(DataOp::GetSingleKvStore.code(), &open_request("app", "s"));
        let mut r = BufReader::new(&reply);
        assert_eq!(ops::read_status(&mut r).unwrap(), Status::Success);
        assert_eq!(r.read_u64().unwrap(), first);
    }

    #[tokio::test]
    async fn closing_unknown_store_is_illegal_state() {
        let svc = data_service();
        let mut w = ops::request(DATA_SERVICE_DESCRIPTOR);
        w.write_string("app");
        w.write_string("missing");
        let reply = svc.dispatch(DataOp::CloseKvStore.code(), &w.freeze());
        let mut r = BufReader::new(&reply);
        assert_eq!(ops::read_status(&mut r).unwrap(), Status::IllegalState);
    }

    #[tokio::test]
    async fn device_list_round_trips() {
        let svc = data_service();
        let w = ops::request(DATA_SERVICE_DESCRIPTOR);
        let reply = svc.dispatch(DataOp::GetDeviceList.code(), &w.freeze());
        let mut r = BufReader::new(&reply);
        assert_eq!(ops::read_status(&mut r).unwrap(), Status::Success);
        let devices = codec::read_device_list(&mut r).unwrap();
        assert_eq!(devices, vec![DeviceInfo::new("dev-1", "alpha", "phone")]);
    }
}
