//! Fan-out of the peer-death signal.
//!
//! The transport exposes one death signal per connection; this registry is
//! the single listener and forwards the event to every watcher added to
//! it. Watchers are compared by pointer identity; adding the same watcher
//! twice means it is told twice.

use dkv_transport::Endpoint;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub trait DeathRecipient: Send + Sync {
    fn on_remote_died(&self);
}

pub struct DeathWatch {
    watchers: Mutex<Vec<Arc<dyn DeathRecipient>>>,
    died: Mutex<bool>,
}

impl DeathWatch {
    /// Hooks the connection's death signal. One of these per connection.
    pub fn new(endpoint: &Arc<dyn Endpoint>) -> Arc<Self> {
        let watch = Arc::new(DeathWatch {
            watchers: Mutex::new(Vec::new()),
            died: Mutex::new(false),
        });
        let weak = Arc::downgrade(&watch);
        let mut closed = endpoint.closed();
        tokio::spawn(async move {
            loop {
                if closed.changed().await.is_err() {
                    break;
                }
                if *closed.borrow() {
                    if let Some(watch) = weak.upgrade() {
                        watch.notify();
                    }
                    break;
                }
            }
        });
        watch
    }

    /// A watcher added after the peer already died is told right away.
    pub fn add(&self, watcher: Arc<dyn DeathRecipient>) {
        let already_dead = self.died.lock().map(|d| *d).unwrap_or(false);
        if already_dead {
            watcher.on_remote_died();
            return;
        }
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.push(watcher);
        }
    }

    /// Removes the first watcher with the same identity. Removing one that
    /// was never added is a no-op.
    pub fn remove(&self, watcher: &Arc<dyn DeathRecipient>) -> bool {
        let Ok(mut watchers) = self.watchers.lock() else {
            return false;
        };
        let target = Arc::as_ptr(watcher) as *const ();
        match watchers
            .iter()
            .position(|w| Arc::as_ptr(w) as *const () == target)
        {
            Some(index) => {
                watchers.remove(index);
                true
            }
            None => false,
        }
    }

    fn notify(&self) {
        if let Ok(mut died) = self.died.lock() {
            *died = true;
        }
        let watchers: Vec<Arc<dyn DeathRecipient>> = match self.watchers.lock() {
            Ok(watchers) => watchers.clone(),
            Err(_) => {
                warn!("death watch list poisoned, watchers not notified");
                return;
            }
        };
        info!(watchers = watchers.len(), "service peer died");
        for watcher in watchers {
            watcher.on_remote_died();
        }
    }
}
