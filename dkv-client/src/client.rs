//! Connection-level client: talks to the root data service.

use crate::death_watch::DeathWatch;
use crate::router::PushRouter;
use crate::store::SingleKvStore;
use crate::{expect_success, invoke};
use dkv_transport::{Endpoint, ROOT_SERVICE};
use dkv_types::{DeviceInfo, Status, StoreOptions};
use dkv_wire::ops::{self, DATA_SERVICE_DESCRIPTOR};
use dkv_wire::{codec, BufReader, DataOp};
use std::sync::Arc;
use tracing::info;

/// One per connection. Opens stores, queries devices, and owns the
/// connection's [`DeathWatch`]. The `router` must be the push handler the
/// connection was built with, or notifications go nowhere.
pub struct KvStoreClient {
    endpoint: Arc<dyn Endpoint>,
    router: Arc<PushRouter>,
    death: Arc<DeathWatch>,
}

impl KvStoreClient {
    pub fn new(endpoint: Arc<dyn Endpoint>, router: Arc<PushRouter>) -> Self {
        let death = DeathWatch::new(&endpoint);
        KvStoreClient {
            endpoint,
            router,
            death,
        }
    }

    pub fn death_watch(&self) -> &Arc<DeathWatch> {
        &self.death
    }

    pub async fn get_single_kv_store(
        &self,
        app_id: &str,
        store_id: &str,
        options: &StoreOptions,
    ) -> Result<SingleKvStore, Status> {
        if app_id.is_empty() || store_id.is_empty() {
            return Err(Status::InvalidArgument);
        }
        let mut w = ops::request(DATA_SERVICE_DESCRIPTOR);
        w.write_string(app_id);
        w.write_string(store_id);
        codec::write_options(&mut w, options);
        let reply = invoke(
            &self.endpoint,
            ROOT_SERVICE,
            DataOp::GetSingleKvStore.code(),
            w.freeze(),
        )
        .await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        let handle = r.read_u64()?;
        info!(app = %app_id, store = %store_id, handle, "store handle acquired");
        Ok(SingleKvStore::new(
            Arc::clone(&self.endpoint),
            handle,
            Arc::clone(&self.router),
            store_id.to_string(),
        ))
    }

    pub async fn close_kv_store(&self, app_id: &str, store_id: &str) -> Result<(), Status> {
        self.store_lifecycle(DataOp::CloseKvStore, app_id, store_id).await
    }

    pub async fn delete_kv_store(&self, app_id: &str, store_id: &str) -> Result<(), Status> {
        self.store_lifecycle(DataOp::DeleteKvStore, app_id, store_id).await
    }

    async fn store_lifecycle(
        &self,
        op: DataOp,
        app_id: &str,
        store_id: &str,
    ) -> Result<(), Status> {
        if app_id.is_empty() || store_id.is_empty() {
            return Err(Status::InvalidArgument);
        }
        let mut w = ops::request(DATA_SERVICE_DESCRIPTOR);
        w.write_string(app_id);
        w.write_string(store_id);
        let reply = invoke(&self.endpoint, ROOT_SERVICE, op.code(), w.freeze()).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(())
    }

    pub async fn get_device_list(&self) -> Result<Vec<DeviceInfo>, Status> {
        let w = ops::request(DATA_SERVICE_DESCRIPTOR);
        let reply = invoke(
            &self.endpoint,
            ROOT_SERVICE,
            DataOp::GetDeviceList.code(),
            w.freeze(),
        )
        .await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(codec::read_device_list(&mut r)?)
    }
}
