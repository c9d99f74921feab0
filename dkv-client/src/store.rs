//! The store handle applications hold.
//!
//! Arguments are validated here before anything is encoded, so a bad key
//! or an oversized batch never touches the transport. Subscription and
//! sync-callback bookkeeping is local: the service only ever sees numeric
//! ids, and duplicate-subscribe / not-subscribed outcomes are decided on
//! this side by observer identity.

use crate::result_set::KvStoreResultSet;
use crate::router::{KvStoreObserver, PushRouter, SyncCallback};
use crate::{expect_success, invoke};
use dkv_transport::{Endpoint, ServiceId};
use dkv_types::constant::{MAX_BATCH_SIZE, MAX_KEY_LENGTH, MAX_VALUE_LENGTH};
use dkv_types::{
    ControlCmd, Entry, Key, KvParam, SecurityLevel, Status, SubscribeType, SyncMode, Value,
};
use dkv_wire::ops::{self, STORE_DESCRIPTOR};
use dkv_wire::{codec, BufReader, StoreOp};
use std::sync::{Arc, Mutex};
use tracing::debug;

fn check_key(key: &Key) -> Result<(), Status> {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(Status::InvalidArgument);
    }
    Ok(())
}

fn check_value(value: &Value) -> Result<(), Status> {
    if value.len() > MAX_VALUE_LENGTH {
        return Err(Status::InvalidArgument);
    }
    Ok(())
}

fn identity<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

/// One open store. Cheap to share behind an `Arc`; every method takes
/// `&self`.
pub struct SingleKvStore {
    endpoint: Arc<dyn Endpoint>,
    service: ServiceId,
    router: Arc<PushRouter>,
    store_id: String,
    // (observer identity, subscriber id) pairs, one per live subscription.
    subscriptions: Mutex<Vec<(usize, u64)>>,
    sync_callback: Mutex<Option<(usize, u64)>>,
}

impl SingleKvStore {
    pub(crate) fn new(
        endpoint: Arc<dyn Endpoint>,
        service: ServiceId,
        router: Arc<PushRouter>,
        store_id: String,
    ) -> Self {
        SingleKvStore {
            endpoint,
            service,
            router,
            store_id,
            subscriptions: Mutex::new(Vec::new()),
            sync_callback: Mutex::new(None),
        }
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    async fn call(&self, op: StoreOp, w: dkv_wire::BufWriter) -> Result<bytes::Bytes, Status> {
        invoke(&self.endpoint, self.service, op.code(), w.freeze()).await
    }

    async fn call_status(&self, op: StoreOp, w: dkv_wire::BufWriter) -> Result<(), Status> {
        let reply = self.call(op, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(())
    }

    pub async fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), Status> {
        let key = key.into();
        let value = value.into();
        check_key(&key)?;
        check_value(&value)?;
        let mut w = ops::request(STORE_DESCRIPTOR);
        codec::write_key_value(&mut w, &key, &value);
        self.call_status(StoreOp::Put, w).await
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Value, Status> {
        let key = key.into();
        check_key(&key)?;
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_blob(key.as_bytes());
        let reply = self.call(StoreOp::Get, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(codec::read_value(&mut r)?)
    }

    pub async fn delete(&self, key: impl Into<Key>) -> Result<(), Status> {
        let key = key.into();
        check_key(&key)?;
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_blob(key.as_bytes());
        self.call_status(StoreOp::Delete, w).await
    }

    pub async fn put_batch(&self, entries: Vec<Entry>) -> Result<(), Status> {
        if entries.len() > MAX_BATCH_SIZE {
            return Err(Status::InvalidArgument);
        }
        for entry in &entries {
            check_key(&entry.key)?;
            check_value(&entry.value)?;
        }
        let mut w = ops::request(STORE_DESCRIPTOR);
        codec::write_entries(&mut w, &entries);
        self.call_status(StoreOp::PutBatch, w).await
    }

    pub async fn delete_batch(&self, keys: Vec<Key>) -> Result<(), Status> {
        if keys.len() > MAX_BATCH_SIZE {
            return Err(Status::InvalidArgument);
        }
        for key in &keys {
            check_key(key)?;
        }
        let mut w = ops::request(STORE_DESCRIPTOR);
        codec::write_keys(&mut w, &keys);
        self.call_status(StoreOp::DeleteBatch, w).await
    }

    /// All current entries under `prefix` in one reply. For unbounded
    /// result sizes prefer [`get_result_set`](Self::get_result_set) or
    /// [`get_entries_all`](Self::get_entries_all).
    pub async fn get_entries(&self, prefix: impl Into<Key>) -> Result<Vec<Entry>, Status> {
        let prefix = prefix.into();
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_blob(prefix.as_bytes());
        let reply = self.call(StoreOp::GetEntries, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(codec::read_entries(&mut r)?)
    }

    pub async fn get_entries_with_query(&self, query: &str) -> Result<Vec<Entry>, Status> {
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_string(query);
        let reply = self.call(StoreOp::GetEntriesWithQuery, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        Ok(codec::read_entries(&mut r)?)
    }

    /// Opens a result set over a snapshot taken now.
    pub async fn get_result_set(&self, prefix: impl Into<Key>) -> Result<KvStoreResultSet, Status> {
        let prefix = prefix.into();
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_blob(prefix.as_bytes());
        let reply = self.call(StoreOp::GetResultSet, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        let handle = r.read_u64()?;
        Ok(KvStoreResultSet::new(Arc::clone(&self.endpoint), handle))
    }

    pub async fn get_result_set_with_query(
        &self,
        query: &str,
    ) -> Result<KvStoreResultSet, Status> {
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_string(query);
        let reply = self.call(StoreOp::GetResultSetWithQuery, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        let handle = r.read_u64()?;
        Ok(KvStoreResultSet::new(Arc::clone(&self.endpoint), handle))
    }

    /// Releases the service-side snapshot. The proxy stays usable as a
    /// value but every call through it fails once the handle is gone.
    pub async fn close_result_set(&self, result_set: &KvStoreResultSet) -> Result<(), Status> {
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_u64(result_set.handle());
        self.call_status(StoreOp::CloseResultSet, w).await
    }

    /// Pages through a fresh result set until exhaustion and returns the
    /// union. The result set is closed before returning; any page error
    /// discards the partial result.
    pub async fn get_entries_all(&self, prefix: impl Into<Key>) -> Result<Vec<Entry>, Status> {
        let prefix = prefix.into();
        let result_set = self.get_result_set(prefix.clone()).await?;
        let mut all = Vec::new();
        let mut continuation = Key::empty();
        let outcome = loop {
            match result_set.get_entries(&prefix, &continuation).await {
                Ok((page, next)) => {
                    all.extend(page);
                    if next.is_empty() {
                        break Ok(());
                    }
                    continuation = next;
                }
                Err(status) => break Err(status),
            }
        };
        self.close_result_set(&result_set).await?;
        outcome.map(|()| all)
    }

    pub async fn start_transaction(&self) -> Result<(), Status> {
        self.call_status(StoreOp::StartTransaction, ops::request(STORE_DESCRIPTOR))
            .await
    }

    pub async fn commit(&self) -> Result<(), Status> {
        self.call_status(StoreOp::Commit, ops::request(STORE_DESCRIPTOR))
            .await
    }

    pub async fn rollback(&self) -> Result<(), Status> {
        self.call_status(StoreOp::Rollback, ops::request(STORE_DESCRIPTOR))
            .await
    }

    /// Subscribes `observer` to this store's change notifications. The
    /// same observer (by identity) can subscribe once; a second attempt
    /// fails locally with [`Status::StoreAlreadySubscribe`].
    pub async fn subscribe(
        &self,
        subscribe_type: SubscribeType,
        observer: &Arc<dyn KvStoreObserver>,
    ) -> Result<(), Status> {
        let id = identity(observer);
        {
            let subscriptions = self.subscriptions.lock().map_err(|_| Status::IllegalState)?;
            if subscriptions.iter().any(|(existing, _)| *existing == id) {
                return Err(Status::StoreAlreadySubscribe);
            }
        }
        let subscriber = self.router.register_observer(Arc::clone(observer));
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_u32(subscribe_type.code());
        w.write_u64(subscriber);
        match self.call_status(StoreOp::SubscribeKvStore, w).await {
            Ok(()) => {
                let mut subscriptions =
                    self.subscriptions.lock().map_err(|_| Status::IllegalState)?;
                if subscriptions.iter().any(|(existing, _)| *existing == id) {
                    // Lost a race with an identical subscribe.
                    drop(subscriptions);
                    self.router.unregister_observer(subscriber);
                    return Err(Status::StoreAlreadySubscribe);
                }
                subscriptions.push((id, subscriber));
                debug!(store = %self.store_id, subscriber, "subscribed");
                Ok(())
            }
            Err(status) => {
                self.router.unregister_observer(subscriber);
                Err(status)
            }
        }
    }

    /// Unsubscribing an observer that is not subscribed fails locally with
    /// [`Status::StoreNotSubscribe`].
    pub async fn unsubscribe(&self, observer: &Arc<dyn KvStoreObserver>) -> Result<(), Status> {
        let id = identity(observer);
        let subscriber = {
            let subscriptions = self.subscriptions.lock().map_err(|_| Status::IllegalState)?;
            subscriptions
                .iter()
                .find(|(existing, _)| *existing == id)
                .map(|(_, subscriber)| *subscriber)
        };
        let Some(subscriber) = subscriber else {
            return Err(Status::StoreNotSubscribe);
        };
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_u64(subscriber);
        self.call_status(StoreOp::UnsubscribeKvStore, w).await?;
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.retain(|(existing, _)| *existing != id);
        }
        self.router.unregister_observer(subscriber);
        debug!(store = %self.store_id, subscriber, "unsubscribed");
        Ok(())
    }

    /// Requests a sync with `devices`. The reply only acknowledges
    /// acceptance; completion arrives at the registered sync callback.
    pub async fn sync(
        &self,
        devices: &[String],
        mode: SyncMode,
        delay_ms: u32,
    ) -> Result<(), Status> {
        if devices.is_empty() || devices.iter().any(String::is_empty) {
            return Err(Status::InvalidArgument);
        }
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_string_list(devices);
        w.write_u32(mode.code());
        w.write_u32(delay_ms);
        self.call_status(StoreOp::Sync, w).await
    }

    /// At most one sync callback is active per store handle; registering a
    /// new one replaces the old.
    pub async fn register_sync_callback(
        &self,
        callback: &Arc<dyn SyncCallback>,
    ) -> Result<(), Status> {
        let callback_id = self.router.register_callback(Arc::clone(callback));
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_u64(callback_id);
        match self.call_status(StoreOp::RegisterSyncCallback, w).await {
            Ok(()) => {
                let previous = {
                    let mut slot = self.sync_callback.lock().map_err(|_| Status::IllegalState)?;
                    slot.replace((identity(callback), callback_id))
                };
                if let Some((_, old_id)) = previous {
                    self.router.unregister_callback(old_id);
                }
                Ok(())
            }
            Err(status) => {
                self.router.unregister_callback(callback_id);
                Err(status)
            }
        }
    }

    pub async fn unregister_sync_callback(&self) -> Result<(), Status> {
        let registered = {
            let slot = self.sync_callback.lock().map_err(|_| Status::IllegalState)?;
            *slot
        };
        let Some((_, callback_id)) = registered else {
            return Err(Status::StoreNotSubscribe);
        };
        self.call_status(StoreOp::UnregisterSyncCallback, ops::request(STORE_DESCRIPTOR))
            .await?;
        if let Ok(mut slot) = self.sync_callback.lock() {
            *slot = None;
        }
        self.router.unregister_callback(callback_id);
        Ok(())
    }

    pub async fn remove_device_data(&self, device_id: &str) -> Result<(), Status> {
        if device_id.is_empty() {
            return Err(Status::InvalidArgument);
        }
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_string(device_id);
        self.call_status(StoreOp::RemoveDeviceData, w).await
    }

    /// Out-of-band control command. Returns the output parameter when the
    /// service produced one small enough to travel structured.
    pub async fn control(
        &self,
        cmd: ControlCmd,
        param: &KvParam,
    ) -> Result<Option<KvParam>, Status> {
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_u32(cmd.code());
        w.write_blob(param.as_bytes());
        let reply = self.call(StoreOp::Control, w).await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        let out_size = r.read_u32()? as usize;
        if out_size == 0 || r.remaining() == 0 {
            return Ok(None);
        }
        Ok(Some(KvParam::new(r.read_blob()?.to_vec())))
    }

    pub async fn set_capability_enabled(&self, enabled: bool) -> Result<(), Status> {
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_bool(enabled);
        self.call_status(StoreOp::SetCapabilityEnabled, w).await
    }

    pub async fn set_capability_range(
        &self,
        local_labels: &[String],
        remote_labels: &[String],
    ) -> Result<(), Status> {
        let mut w = ops::request(STORE_DESCRIPTOR);
        w.write_string_list(local_labels);
        w.write_string_list(remote_labels);
        self.call_status(StoreOp::SetCapabilityRange, w).await
    }

    pub async fn get_security_level(&self) -> Result<SecurityLevel, Status> {
        let reply = self
            .call(StoreOp::GetSecurityLevel, ops::request(STORE_DESCRIPTOR))
            .await?;
        let mut r = BufReader::new(&reply);
        expect_success(&mut r)?;
        SecurityLevel::from_code(r.read_u32()?).ok_or(Status::IpcError)
    }
}
