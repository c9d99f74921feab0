//! One open store on the service side.
//!
//! Requests arrive as `(code, payload)`; the code indexes a fixed handler
//! table and anything outside it gets a generic error reply. Handlers
//! decode with the checked cursor, consult the delegate, and answer with a
//! status-first payload. Mutations that take effect fan out exactly one
//! change notification to the store's subscribers.

use crate::delegate::{ChangeSet, SnapshotDelegate, StoreDelegate};
use crate::observer::ObserverPusher;
use crate::paginator::{PaginatorConfig, SnapshotPaginator};
use crate::snapshot_service::SnapshotService;
use bytes::Bytes;
use dkv_transport::channel::ServiceHost;
use dkv_transport::{HandleFuture, RemoteService, ServiceId};
use dkv_types::constant::{MAX_BATCH_SIZE, MAX_KEY_LENGTH, MAX_VALUE_LENGTH, SWITCH_RAW_DATA_SIZE};
use dkv_types::{
    ChangeNotification, ControlCmd, Entry, Key, SecurityLevel, Status, SubscribeType, SyncMode,
    Value,
};
use dkv_wire::codec;
use dkv_wire::ops::{self, PushOp, STORE_DESCRIPTOR};
use dkv_wire::{BufReader, BufWriter, StoreOp, WireError};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type Handler = for<'a> fn(&SingleStoreService, &mut BufReader<'a>) -> Result<Bytes, WireError>;

pub struct SingleStoreService {
    store_id: String,
    device_id: String,
    security_level: SecurityLevel,
    delegate: Arc<dyn StoreDelegate>,
    host: Arc<ServiceHost>,
    observers: ObserverPusher,
    subscribers: Mutex<HashSet<u64>>,
    sync_callback: Arc<Mutex<Option<u64>>>,
    sync_param: Mutex<Bytes>,
    capability_enabled: AtomicBool,
    capability_range: Mutex<(Vec<String>, Vec<String>)>,
    result_sets: Mutex<HashSet<ServiceId>>,
    paginator_config: PaginatorConfig,
}

impl SingleStoreService {
    pub fn new(
        store_id: impl Into<String>,
        device_id: impl Into<String>,
        security_level: SecurityLevel,
        delegate: Arc<dyn StoreDelegate>,
        host: Arc<ServiceHost>,
    ) -> Self {
        let observers = ObserverPusher::new(host.pusher());
        SingleStoreService {
            store_id: store_id.into(),
            device_id: device_id.into(),
            security_level,
            delegate,
            host,
            observers,
            subscribers: Mutex::new(HashSet::new()),
            sync_callback: Arc::new(Mutex::new(None)),
            sync_param: Mutex::new(Bytes::new()),
            capability_enabled: AtomicBool::new(false),
            capability_range: Mutex::new((Vec::new(), Vec::new())),
            result_sets: Mutex::new(HashSet::new()),
            paginator_config: PaginatorConfig::default(),
        }
    }

    pub fn with_paginator_config(mut self, config: PaginatorConfig) -> Self {
        self.paginator_config = config;
        self
    }

    /// Drops every result set this store handed out. Called when the store
    /// is closed so handles do not outlive it.
    pub fn release_result_sets(&self) {
        let ids: Vec<ServiceId> = match self.result_sets.lock() {
            Ok(mut sets) => sets.drain().collect(),
            Err(_) => return,
        };
        for id in ids {
            self.host.unregister(id);
        }
    }

    const HANDLERS: [Handler; StoreOp::COUNT] = [
        Self::put,
        Self::delete,
        Self::get,
        Self::subscribe,
        Self::unsubscribe,
        Self::get_entries,
        Self::get_entries_with_query,
        Self::get_result_set,
        Self::get_result_set_with_query,
        Self::close_result_set,
        Self::sync,
        Self::remove_device_data,
        Self::register_sync_callback,
        Self::unregister_sync_callback,
        Self::put_batch,
        Self::delete_batch,
        Self::start_transaction,
        Self::commit,
        Self::rollback,
        Self::control,
        Self::set_capability_enabled,
        Self::set_capability_range,
        Self::get_security_level,
    ];

    fn dispatch(&self, code: u32, data: &[u8]) -> Bytes {
        let mut r = BufReader::new(data);
        if let Err(err) = ops::check_descriptor(&mut r, STORE_DESCRIPTOR) {
            warn!(store = %self.store_id, %err, "request refused");
            return ops::status_reply(Status::IpcError);
        }
        let Some(handler) = Self::HANDLERS.get(code as usize) else {
            warn!(store = %self.store_id, code, "operation code out of range");
            return ops::status_reply(Status::Error);
        };
        handler(self, &mut r).unwrap_or_else(|err| {
            warn!(store = %self.store_id, code, %err, "malformed request");
            ops::status_reply(Status::IpcError)
        })
    }

    /// One notification per effective mutation batch.
    fn publish_change(&self, change: Option<ChangeSet>) {
        let Some(change) = change else { return };
        if change.is_empty() {
            return;
        }
        let subscribers: Vec<u64> = match self.subscribers.lock() {
            Ok(subs) => subs.iter().copied().collect(),
            Err(_) => return,
        };
        if subscribers.is_empty() {
            return;
        }
        let notification = ChangeNotification::new(
            change.inserted,
            change.updated,
            change.deleted,
            self.device_id.clone(),
            false,
        );
        debug!(store = %self.store_id, subscribers = subscribers.len(),
               "publishing change notification");
        self.observers.notify(&subscribers, &notification, None);
    }

    fn check_entry(key: &Key, value: &Value) -> Result<(), Status> {
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(Status::InvalidArgument);
        }
        if value.len() > MAX_VALUE_LENGTH {
            return Err(Status::InvalidArgument);
        }
        Ok(())
    }

    fn put(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let (key, value) = codec::read_key_value(r)?;
        if let Err(status) = Self::check_entry(&key, &value) {
            return Ok(ops::status_reply(status));
        }
        let reply = match self.delegate.put(Entry { key, value }) {
            Ok(change) => {
                self.publish_change(change);
                Status::Success
            }
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn delete(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let key = Key::from_raw(r.read_blob()?.to_vec());
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Ok(ops::status_reply(Status::InvalidArgument));
        }
        let reply = match self.delegate.delete(&key) {
            Ok(change) => {
                self.publish_change(change);
                Status::Success
            }
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn get(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let key = Key::from_raw(r.read_blob()?.to_vec());
        let mut w = BufWriter::new();
        match self.delegate.get(&key) {
            Ok(value) => {
                ops::write_status(&mut w, Status::Success);
                codec::write_value(&mut w, &value);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn subscribe(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let Some(_subscribe_type) = SubscribeType::from_code(r.read_u32()?) else {
            return Ok(ops::status_reply(Status::InvalidArgument));
        };
        let subscriber = r.read_u64()?;
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        subscribers.insert(subscriber);
        Ok(ops::status_reply(Status::Success))
    }

    fn unsubscribe(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let subscriber = r.read_u64()?;
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        subscribers.remove(&subscriber);
        Ok(ops::status_reply(Status::Success))
    }

    fn get_entries(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let prefix = Key::from_raw(r.read_blob()?.to_vec());
        let mut w = BufWriter::new();
        match self.delegate.scan_prefix(&prefix) {
            Ok(entries) => {
                ops::write_status(&mut w, Status::Success);
                codec::write_entries(&mut w, &entries);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn get_entries_with_query(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let query = r.read_string()?;
        let mut w = BufWriter::new();
        match self.delegate.query_entries(&query) {
            Ok(entries) => {
                ops::write_status(&mut w, Status::Success);
                codec::write_entries(&mut w, &entries);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn register_result_set(&self, snapshot: Arc<dyn SnapshotDelegate>) -> Result<ServiceId, Status> {
        let paginator = SnapshotPaginator::with_config(snapshot, self.paginator_config);
        let id = self.host.register(Arc::new(SnapshotService::new(paginator)));
        let Ok(mut sets) = self.result_sets.lock() else {
            self.host.unregister(id);
            return Err(Status::IllegalState);
        };
        sets.insert(id);
        debug!(store = %self.store_id, handle = id, "result set opened");
        Ok(id)
    }

    fn get_result_set(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let _prefix = Key::from_raw(r.read_blob()?.to_vec());
        let mut w = BufWriter::new();
        let result = self
            .delegate
            .snapshot()
            .and_then(|snapshot| self.register_result_set(snapshot));
        match result {
            Ok(id) => {
                ops::write_status(&mut w, Status::Success);
                w.write_u64(id);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn get_result_set_with_query(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let query = r.read_string()?;
        let mut w = BufWriter::new();
        let result = self
            .delegate
            .query_entries(&query)
            .map(FrozenView::new)
            .and_then(|view| self.register_result_set(Arc::new(view)));
        match result {
            Ok(id) => {
                ops::write_status(&mut w, Status::Success);
                w.write_u64(id);
            }
            Err(status) => ops::write_status(&mut w, status),
        }
        Ok(w.freeze())
    }

    fn close_result_set(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let id = r.read_u64()?;
        let Ok(mut sets) = self.result_sets.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        if !sets.remove(&id) {
            return Ok(ops::status_reply(Status::IllegalState));
        }
        self.host.unregister(id);
        debug!(store = %self.store_id, handle = id, "result set closed");
        Ok(ops::status_reply(Status::Success))
    }

    /// Accepts the sync and answers immediately; the outcome arrives later
    /// through the sync-completed push.
    fn sync(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let devices = r.read_string_list()?;
        let mode = SyncMode::from_code(r.read_u32()?);
        let delay_ms = r.read_u32()?;
        if devices.is_empty() || devices.iter().any(String::is_empty) {
            return Ok(ops::status_reply(Status::InvalidArgument));
        }
        let Some(mode) = mode else {
            return Ok(ops::status_reply(Status::InvalidArgument));
        };
        let delegate = Arc::clone(&self.delegate);
        let callback = Arc::clone(&self.sync_callback);
        let pusher = self.host.pusher();
        let store_id = self.store_id.clone();
        tokio::spawn(async move {
            let results = delegate.sync(&devices, mode, delay_ms);
            let registered = callback.lock().ok().and_then(|slot| *slot);
            let Some(callback_id) = registered else {
                debug!(store = %store_id, "sync finished with no callback registered");
                return;
            };
            let mut w = BufWriter::new();
            w.write_u64(callback_id);
            codec::write_sync_result(&mut w, &results);
            pusher.send(PushOp::SyncCompleted.code(), w.freeze());
        });
        Ok(ops::status_reply(Status::Success))
    }

    fn remove_device_data(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let device = r.read_string()?;
        if device.is_empty() {
            return Ok(ops::status_reply(Status::InvalidArgument));
        }
        let reply = match self.delegate.remove_device_data(&device) {
            Ok(()) => Status::Success,
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn register_sync_callback(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let callback_id = r.read_u64()?;
        let Ok(mut slot) = self.sync_callback.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        *slot = Some(callback_id);
        Ok(ops::status_reply(Status::Success))
    }

    fn unregister_sync_callback(&self, _r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let Ok(mut slot) = self.sync_callback.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        *slot = None;
        Ok(ops::status_reply(Status::Success))
    }

    fn put_batch(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let entries = codec::read_entries(r)?;
        if entries.len() > MAX_BATCH_SIZE {
            return Ok(ops::status_reply(Status::InvalidArgument));
        }
        for entry in &entries {
            if let Err(status) = Self::check_entry(&entry.key, &entry.value) {
                return Ok(ops::status_reply(status));
            }
        }
        info!(store = %self.store_id, count = entries.len(), "applying batch put");
        let reply = match self.delegate.put_batch(entries) {
            Ok(change) => {
                self.publish_change(change);
                Status::Success
            }
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn delete_batch(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let keys = codec::read_keys(r)?;
        if keys.len() > MAX_BATCH_SIZE
            || keys.iter().any(|k| k.is_empty() || k.len() > MAX_KEY_LENGTH)
        {
            return Ok(ops::status_reply(Status::InvalidArgument));
        }
        let reply = match self.delegate.delete_batch(keys) {
            Ok(change) => {
                self.publish_change(change);
                Status::Success
            }
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn start_transaction(&self, _r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let reply = match self.delegate.begin_transaction() {
            Ok(()) => Status::Success,
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn commit(&self, _r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let reply = match self.delegate.commit() {
            Ok(change) => {
                self.publish_change(Some(change));
                Status::Success
            }
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    fn rollback(&self, _r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let reply = match self.delegate.rollback() {
            Ok(()) => Status::Success,
            Err(status) => status,
        };
        Ok(ops::status_reply(reply))
    }

    /// Out-of-band control: the reply carries the output parameter only
    /// when it is small enough for the structured path.
    fn control(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let cmd = ControlCmd::from_code(r.read_u32()?);
        let param = r.read_blob()?.to_vec();
        let mut w = BufWriter::new();
        let Some(cmd) = cmd else {
            ops::write_status(&mut w, Status::InvalidArgument);
            return Ok(w.freeze());
        };
        match cmd {
            ControlCmd::SetSyncParam => {
                let Ok(mut stored) = self.sync_param.lock() else {
                    ops::write_status(&mut w, Status::IllegalState);
                    return Ok(w.freeze());
                };
                *stored = Bytes::from(param);
                ops::write_status(&mut w, Status::Success);
                w.write_u32(0);
            }
            ControlCmd::GetSyncParam => {
                let Ok(stored) = self.sync_param.lock() else {
                    ops::write_status(&mut w, Status::IllegalState);
                    return Ok(w.freeze());
                };
                let out_size = if stored.is_empty() { 0 } else { 4 + stored.len() };
                ops::write_status(&mut w, Status::Success);
                w.write_u32(out_size as u32);
                if out_size > 0 && out_size < SWITCH_RAW_DATA_SIZE {
                    w.write_blob(&stored);
                }
            }
        }
        Ok(w.freeze())
    }

    fn set_capability_enabled(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let enabled = r.read_bool()?;
        self.capability_enabled.store(enabled, Ordering::Relaxed);
        Ok(ops::status_reply(Status::Success))
    }

    fn set_capability_range(&self, r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let local_labels = r.read_string_list()?;
        let remote_labels = r.read_string_list()?;
        let Ok(mut range) = self.capability_range.lock() else {
            return Ok(ops::status_reply(Status::IllegalState));
        };
        *range = (local_labels, remote_labels);
        Ok(ops::status_reply(Status::Success))
    }

    fn get_security_level(&self, _r: &mut BufReader<'_>) -> Result<Bytes, WireError> {
        let mut w = BufWriter::new();
        ops::write_status(&mut w, Status::Success);
        w.write_u32(self.security_level.code());
        Ok(w.freeze())
    }
}

impl RemoteService for SingleStoreService {
    fn handle(&self, code: u32, data: Bytes) -> HandleFuture<'_> {
        Box::pin(async move { self.dispatch(code, &data) })
    }
}

/// Materialized query result behaving like a snapshot, so query result
/// sets page through the same machinery as prefix ones.
struct FrozenView {
    map: BTreeMap<Key, Value>,
}

impl FrozenView {
    fn new(entries: Vec<Entry>) -> Self {
        FrozenView {
            map: entries.into_iter().map(|e| (e.key, e.value)).collect(),
        }
    }
}

impl SnapshotDelegate for FrozenView {
    fn get(&self, key: &Key) -> Result<Value, Status> {
        self.map.get(key).cloned().ok_or(Status::KeyNotFound)
    }

    fn entries_with_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, Status> {
        Ok(self
            .map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Entry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }
}
