//! The engine seam. The service owns protocol and notification concerns;
//! everything that actually stores bytes hides behind [`StoreDelegate`].

use dkv_types::{Entry, Key, Status, SyncMode, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Outcome of one applied mutation batch, grouped the way subscribers see
/// it. Deletes carry the value that was removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub inserted: Vec<Entry>,
    pub updated: Vec<Entry>,
    pub deleted: Vec<Entry>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Storage engine behind one open store.
///
/// Mutating operations return `Ok(None)` while a transaction is open (the
/// writes are staged) and `Ok(Some(change_set))` when applied directly;
/// `commit` returns the accumulated change set of the whole transaction.
/// All methods are synchronous; the service invokes them off its dispatch
/// path where completion may take long (sync).
pub trait StoreDelegate: Send + Sync {
    fn get(&self, key: &Key) -> Result<Value, Status>;

    fn put(&self, entry: Entry) -> Result<Option<ChangeSet>, Status>;

    fn put_batch(&self, entries: Vec<Entry>) -> Result<Option<ChangeSet>, Status>;

    fn delete(&self, key: &Key) -> Result<Option<ChangeSet>, Status>;

    fn delete_batch(&self, keys: Vec<Key>) -> Result<Option<ChangeSet>, Status>;

    /// All current entries whose key starts with `prefix`, sorted by key.
    fn scan_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, Status>;

    /// Entries matched by an engine-interpreted query string.
    fn query_entries(&self, query: &str) -> Result<Vec<Entry>, Status>;

    fn begin_transaction(&self) -> Result<(), Status>;

    fn commit(&self) -> Result<ChangeSet, Status>;

    fn rollback(&self) -> Result<(), Status>;

    /// A read-consistent view of the store as of this call.
    fn snapshot(&self) -> Result<Arc<dyn SnapshotDelegate>, Status>;

    fn remove_device_data(&self, device_id: &str) -> Result<(), Status>;

    /// Synchronize with the named devices; per-device outcome.
    fn sync(&self, devices: &[String], mode: SyncMode, delay_ms: u32) -> HashMap<String, Status>;
}

/// Frozen view handed out by [`StoreDelegate::snapshot`]. Later mutations
/// of the store never show through it.
pub trait SnapshotDelegate: Send + Sync {
    fn get(&self, key: &Key) -> Result<Value, Status>;

    /// Sorted by key.
    fn entries_with_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, Status>;
}

/// In-memory engine. Backs tests and examples; a transaction stages writes
/// and applies them atomically at commit. Queries are interpreted as key
/// prefixes.
#[derive(Default)]
pub struct MemoryDelegate {
    inner: Mutex<MemoryInner>,
    /// Devices whose sync is reported failed, for exercising partial
    /// sync outcomes.
    failing_devices: Mutex<HashSet<String>>,
}

#[derive(Default)]
struct MemoryInner {
    map: BTreeMap<Key, Value>,
    // None: no open transaction. Some: staged writes, None value = delete.
    txn: Option<BTreeMap<Key, Option<Value>>>,
}

impl MemoryDelegate {
    pub fn new() -> Self {
        MemoryDelegate::default()
    }

    pub fn fail_device(&self, device_id: impl Into<String>) {
        if let Ok(mut failing) = self.failing_devices.lock() {
            failing.insert(device_id.into());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn classify(map: &BTreeMap<Key, Value>, staged: BTreeMap<Key, Option<Value>>) -> ChangeSet {
    let mut change = ChangeSet::default();
    for (key, slot) in staged {
        match slot {
            Some(value) => {
                if map.contains_key(&key) {
                    change.updated.push(Entry { key, value });
                } else {
                    change.inserted.push(Entry { key, value });
                }
            }
            None => {
                if let Some(old) = map.get(&key) {
                    change.deleted.push(Entry {
                        key,
                        value: old.clone(),
                    });
                }
            }
        }
    }
    change
}

fn apply(map: &mut BTreeMap<Key, Value>, change: &ChangeSet, staged_deletes: &[Key]) {
    for entry in change.inserted.iter().chain(&change.updated) {
        map.insert(entry.key.clone(), entry.value.clone());
    }
    for key in staged_deletes {
        map.remove(key);
    }
}

impl MemoryInner {
    fn mutate(&mut self, writes: Vec<(Key, Option<Value>)>) -> Option<ChangeSet> {
        if let Some(txn) = &mut self.txn {
            for (key, slot) in writes {
                txn.insert(key, slot);
            }
            return None;
        }
        let staged: BTreeMap<Key, Option<Value>> = writes.into_iter().collect();
        let deletes: Vec<Key> = staged
            .iter()
            .filter_map(|(k, v)| v.is_none().then(|| k.clone()))
            .collect();
        let change = classify(&self.map, staged);
        apply(&mut self.map, &change, &deletes);
        Some(change)
    }
}

impl StoreDelegate for MemoryDelegate {
    fn get(&self, key: &Key) -> Result<Value, Status> {
        let inner = self.inner.lock().map_err(|_| Status::DbError)?;
        inner.map.get(key).cloned().ok_or(Status::KeyNotFound)
    }

    fn put(&self, entry: Entry) -> Result<Option<ChangeSet>, Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        Ok(inner.mutate(vec![(entry.key, Some(entry.value))]))
    }

    fn put_batch(&self, entries: Vec<Entry>) -> Result<Option<ChangeSet>, Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        let writes = entries
            .into_iter()
            .map(|e| (e.key, Some(e.value)))
            .collect();
        Ok(inner.mutate(writes))
    }

    fn delete(&self, key: &Key) -> Result<Option<ChangeSet>, Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        Ok(inner.mutate(vec![(key.clone(), None)]))
    }

    fn delete_batch(&self, keys: Vec<Key>) -> Result<Option<ChangeSet>, Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        let writes = keys.into_iter().map(|k| (k, None)).collect();
        Ok(inner.mutate(writes))
    }

    fn scan_prefix(&self, prefix: &Key) -> Result<Vec<Entry>, Status> {
        let inner = self.inner.lock().map_err(|_| Status::DbError)?;
        Ok(inner
            .map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Entry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    fn query_entries(&self, query: &str) -> Result<Vec<Entry>, Status> {
        self.scan_prefix(&Key::from(query))
    }

    fn begin_transaction(&self) -> Result<(), Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        if inner.txn.is_some() {
            return Err(Status::IllegalState);
        }
        inner.txn = Some(BTreeMap::new());
        Ok(())
    }

    fn commit(&self) -> Result<ChangeSet, Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        let staged = inner.txn.take().ok_or(Status::IllegalState)?;
        let deletes: Vec<Key> = staged
            .iter()
            .filter_map(|(k, v)| v.is_none().then(|| k.clone()))
            .collect();
        let change = classify(&inner.map, staged);
        let map = &mut inner.map;
        apply(map, &change, &deletes);
        Ok(change)
    }

    fn rollback(&self) -> Result<(), Status> {
        let mut inner = self.inner.lock().map_err(|_| Status::DbError)?;
        if inner.txn.take().is_none() {
            return Err(Status::IllegalState);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Arc<dyn SnapshotDelegate>, Status> {
        let inner = self.inner.lock().map_err(|_| Status::DbError)?;
        Ok(Arc::new(MemorySnapshot {
            map: inner.map.clone(),
        }))
    }

    fn remove_device_data(&self, _device_id: &str) -> Result<(), Status> {
        // No per-device provenance in the in-memory engine.
        Ok(())
    }

    fn sync(&self, devices: &[String], _mode: SyncMode, _delay_ms: u32) -> HashMap<String, Status> {
        let failing = self
            .failing_devices
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();
        devices
            .iter()
            .map(|device| {
                let status = if failing.contains(device) {
                    Status::DbError
                } else {
                    Status::Success
                };
                (device.clone(), status)
            })
            .collect()
    }
}

struct MemorySnapshot {
    map: BTreeMap<Key, Value>,
}

impl SnapshotDelegate for MemorySnapshot {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_classifies_insert_then_update() {
        let store = MemoryDelegate::new();
        let change = store.put(Entry::new("a", "1")).unwrap().unwrap();
        assert_eq!(change.inserted.len(), 1);
        assert!(change.updated.is_empty());

        let change = store.put(Entry::new("a", "2")).unwrap().unwrap();
        assert!(change.inserted.is_empty());
        assert_eq!(change.updated, vec![Entry::new("a", "2")]);
    }

    #[test]
    fn delete_of_absent_key_is_quiet_success() {
        let store = MemoryDelegate::new();
        let change = store.delete(&Key::from("ghost")).unwrap().unwrap();
        assert!(change.is_empty());
    }

    #[test]
    fn transaction_stages_until_commit() {
        let store = MemoryDelegate::new();
        store.begin_transaction().unwrap();
        assert!(store.put(Entry::new("a", "1")).unwrap().is_none());
        assert!(store.delete(&Key::from("a")).unwrap().is_none());
        assert_eq!(store.get(&Key::from("a")), Err(Status::KeyNotFound));

        let change = store.commit().unwrap();
        // Put then delete of a key absent before the transaction nets out.
        assert!(change.is_empty());
        assert_eq!(store.get(&Key::from("a")), Err(Status::KeyNotFound));
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let store = MemoryDelegate::new();
        store.begin_transaction().unwrap();
        store.put(Entry::new("a", "1")).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.get(&Key::from("a")), Err(Status::KeyNotFound));
        assert_eq!(store.commit(), Err(Status::IllegalState));
    }

    #[test]
    fn nested_transactions_are_refused() {
        let store = MemoryDelegate::new();
        store.begin_transaction().unwrap();
        assert_eq!(store.begin_transaction(), Err(Status::IllegalState));
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = MemoryDelegate::new();
        store.put(Entry::new("a", "1")).unwrap();
        let snapshot = store.snapshot().unwrap();
        store.put(Entry::new("a", "2")).unwrap();
        store.put(Entry::new("b", "new")).unwrap();
        assert_eq!(snapshot.get(&Key::from("a")).unwrap(), Value::from("1"));
        assert_eq!(snapshot.get(&Key::from("b")), Err(Status::KeyNotFound));
    }

    #[test]
    fn sync_reports_per_device_status() {
        let store = MemoryDelegate::new();
        store.fail_device("bad");
        let devices = vec!["good".to_string(), "bad".to_string()];
        let results = store.sync(&devices, SyncMode::PushPull, 0);
        assert_eq!(results["good"], Status::Success);
        assert_eq!(results["bad"], Status::DbError);
    }
}
