//! Routes incoming pushes to the observers that asked for them.
//!
//! Subscriber and callback ids are allocated here, travel to the service
//! inside subscribe/register requests, and come back at the head of every
//! push. A push for an id that is gone (unsubscribed in the meantime) is
//! dropped quietly.

use dkv_transport::PushHandler;
use dkv_types::{ChangeNotification, Status};
use dkv_wire::ops::PushOp;
use dkv_wire::{codec, BufReader, WireError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Receives change notifications for one subscription.
pub trait KvStoreObserver: Send + Sync {
    fn on_change(&self, change: &ChangeNotification);
}

/// Receives the per-device outcome of a completed sync.
pub trait SyncCallback: Send + Sync {
    fn sync_completed(&self, results: &HashMap<String, Status>);
}

#[derive(Default)]
pub struct PushRouter {
    observers: Mutex<HashMap<u64, Arc<dyn KvStoreObserver>>>,
    callbacks: Mutex<HashMap<u64, Arc<dyn SyncCallback>>>,
    next_id: AtomicU64,
}

impl PushRouter {
    pub fn new() -> Self {
        PushRouter::default()
    }

    pub(crate) fn register_observer(&self, observer: Arc<dyn KvStoreObserver>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut observers) = self.observers.lock() {
            observers.insert(id, observer);
        }
        id
    }

    pub(crate) fn unregister_observer(&self, id: u64) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.remove(&id);
        }
    }

    pub(crate) fn register_callback(&self, callback: Arc<dyn SyncCallback>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.insert(id, callback);
        }
        id
    }

    pub(crate) fn unregister_callback(&self, id: u64) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.remove(&id);
        }
    }

    fn route_change(&self, data: &[u8]) -> Result<(), WireError> {
        let mut r = BufReader::new(data);
        let subscriber = r.read_u64()?;
        let (change, _snapshot) = codec::read_change(&mut r)?;
        let observer = self
            .observers
            .lock()
            .ok()
            .and_then(|observers| observers.get(&subscriber).cloned());
        match observer {
            Some(observer) => observer.on_change(&change),
            None => debug!(subscriber, "change push for unknown subscriber dropped"),
        }
        Ok(())
    }

    fn route_sync_completed(&self, data: &[u8]) -> Result<(), WireError> {
        let mut r = BufReader::new(data);
        let callback_id = r.read_u64()?;
        let results = codec::read_sync_result(&mut r)?;
        let callback = self
            .callbacks
            .lock()
            .ok()
            .and_then(|callbacks| callbacks.get(&callback_id).cloned());
        match callback {
            Some(callback) => callback.sync_completed(&results),
            None => debug!(callback_id, "sync push with no registered callback dropped"),
        }
        Ok(())
    }
}

impl PushHandler for PushRouter {
    fn on_push(&self, code: u32, data: bytes::Bytes) {
        let result = match PushOp::try_from(code) {
            Ok(PushOp::OnChange) => self.route_change(&data),
            Ok(PushOp::SyncCompleted) => self.route_sync_completed(&data),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(code, %err, "malformed push dropped");
        }
    }
}
