//! Snapshot pagination with a bounded cache of partially-consumed scans.
//!
//! A page accumulates entries until their raw size would cross the soft
//! limit, then reports the first unreturned key as the continuation key.
//! The tail of the scan stays buffered so the next page is served without
//! rescanning; the buffer holds a fixed number of scans and evicts the
//! least recently used one. A continuation key that cannot be found in a
//! fresh scan fails the page instead of silently restarting.

use crate::delegate::SnapshotDelegate;
use dkv_types::constant::{SCAN_BUFFER_SIZE, SOFT_LIMIT};
use dkv_types::{Entry, Key, Status, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug)]
pub struct PaginatorConfig {
    /// Stop accumulating a page once its raw size reaches this.
    pub soft_limit: usize,
    /// How many partially-consumed scans stay buffered.
    pub buffer_size: usize,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        PaginatorConfig {
            soft_limit: SOFT_LIMIT,
            buffer_size: SCAN_BUFFER_SIZE,
        }
    }
}

struct BufferedScan {
    prefix: Key,
    tail: VecDeque<Entry>,
}

/// Pages through one frozen snapshot. Most recently touched scans live at
/// the back of the buffer; eviction pops the front.
pub struct SnapshotPaginator {
    snapshot: Arc<dyn SnapshotDelegate>,
    scans: Mutex<VecDeque<BufferedScan>>,
    config: PaginatorConfig,
}

impl SnapshotPaginator {
    pub fn new(snapshot: Arc<dyn SnapshotDelegate>) -> Self {
        Self::with_config(snapshot, PaginatorConfig::default())
    }

    pub fn with_config(snapshot: Arc<dyn SnapshotDelegate>, config: PaginatorConfig) -> Self {
        SnapshotPaginator {
            snapshot,
            scans: Mutex::new(VecDeque::new()),
            config,
        }
    }

    pub fn get(&self, key: &Key) -> Result<Value, Status> {
        self.snapshot.get(key)
    }

    /// One page of entries at and after `continuation` (empty key: from the
    /// start). Returns the page and the next continuation key, empty when
    /// the scan is done.
    pub fn entries_page(
        &self,
        prefix: &Key,
        continuation: &Key,
    ) -> Result<(Vec<Entry>, Key), Status> {
        self.page(prefix, continuation, Entry::raw_size)
    }

    /// Like [`entries_page`](Self::entries_page) but sized by keys alone,
    /// so key pages hold more items.
    pub fn keys_page(&self, prefix: &Key, continuation: &Key) -> Result<(Vec<Key>, Key), Status> {
        let (entries, next) = self.page(prefix, continuation, |e| e.key.raw_size())?;
        Ok((entries.into_iter().map(|e| e.key).collect(), next))
    }

    fn page(
        &self,
        prefix: &Key,
        continuation: &Key,
        measure: fn(&Entry) -> usize,
    ) -> Result<(Vec<Entry>, Key), Status> {
        let mut scans = self.scans.lock().map_err(|_| Status::IllegalState)?;

        let mut scan = match self.take_buffered(&mut scans, prefix, continuation) {
            Some(scan) => scan,
            None => self.fresh_scan(prefix, continuation)?,
        };

        let (page, next) = self.take_page(&mut scan.tail, measure);
        if !scan.tail.is_empty() {
            if scans.len() >= self.config.buffer_size {
                let evicted = scans.pop_front();
                if let Some(evicted) = evicted {
                    debug!(prefix = ?evicted.prefix, "evicting least recently used scan");
                }
            }
            scans.push_back(scan);
        }
        Ok((page, next))
    }

    /// A buffered scan matches when its prefix is the requested one and its
    /// head entry is exactly the requested continuation key.
    fn take_buffered(
        &self,
        scans: &mut VecDeque<BufferedScan>,
        prefix: &Key,
        continuation: &Key,
    ) -> Option<BufferedScan> {
        if continuation.is_empty() {
            return None;
        }
        let index = scans.iter().position(|scan| {
            scan.prefix == *prefix && scan.tail.front().map(|e| &e.key) == Some(continuation)
        })?;
        scans.remove(index)
    }

    fn fresh_scan(&self, prefix: &Key, continuation: &Key) -> Result<BufferedScan, Status> {
        let mut tail: VecDeque<Entry> = self.snapshot.entries_with_prefix(prefix)?.into();
        if !continuation.is_empty() {
            match tail.iter().position(|e| e.key == *continuation) {
                Some(index) => {
                    tail.drain(..index);
                }
                None => {
                    warn!(continuation = ?continuation, "continuation key absent from scan");
                    return Err(Status::IllegalState);
                }
            }
        }
        Ok(BufferedScan {
            prefix: prefix.clone(),
            tail,
        })
    }

    fn take_page(
        &self,
        tail: &mut VecDeque<Entry>,
        measure: fn(&Entry) -> usize,
    ) -> (Vec<Entry>, Key) {
        let mut page = Vec::new();
        let mut size = 0usize;
        while let Some(front) = tail.front() {
            let item = measure(front);
            // An entry only joins while the page stays strictly under the
            // limit. A single oversized entry still makes progress.
            if !page.is_empty() && size + item >= self.config.soft_limit {
                break;
            }
            size += item;
            if let Some(entry) = tail.pop_front() {
                page.push(entry);
            }
        }
        let next = tail.front().map(|e| e.key.clone()).unwrap_or_default();
        (page, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{MemoryDelegate, StoreDelegate};

    fn snapshot_with(count: usize, value_len: usize) -> Arc<dyn SnapshotDelegate> {
        let store = MemoryDelegate::new();
        for i in 0..count {
            store
                .put(Entry::new(format!("key-{i:04}"), vec![b'x'; value_len]))
                .unwrap();
        }
        store.snapshot().unwrap()
    }

    fn small_config() -> PaginatorConfig {
        PaginatorConfig {
            soft_limit: 64,
            buffer_size: 2,
        }
    }

    #[test]
    fn pagination_returns_every_entry_once_in_order() {
        let paginator = SnapshotPaginator::with_config(snapshot_with(10, 20), small_config());
        let mut seen = Vec::new();
        let mut continuation = Key::empty();
        loop {
            let (page, next) = paginator
                .entries_page(&Key::empty(), &continuation)
                .unwrap();
            assert!(!page.is_empty());
            seen.extend(page);
            if next.is_empty() {
                break;
            }
            continuation = next;
        }
        assert_eq!(seen.len(), 10);
        let keys: Vec<_> = seen.iter().map(|e| &e.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn entry_landing_exactly_on_the_limit_waits_for_the_next_page() {
        // Each entry measures 32 raw bytes; two together hit the 64-byte
        // limit exactly, so the second one belongs to the next page.
        let paginator = SnapshotPaginator::with_config(snapshot_with(3, 16), small_config());
        let (page, next) = paginator.entries_page(&Key::empty(), &Key::empty()).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(next, Key::from("key-0001"));
    }

    #[test]
    fn single_oversized_entry_still_makes_progress() {
        let paginator = SnapshotPaginator::with_config(snapshot_with(2, 500), small_config());
        let (page, next) = paginator.entries_page(&Key::empty(), &Key::empty()).unwrap();
        assert_eq!(page.len(), 1);
        assert!(!next.is_empty());
    }

    #[test]
    fn evicted_scan_restarts_from_continuation() {
        let paginator = SnapshotPaginator::with_config(snapshot_with(20, 20), small_config());
        let (_, next_a) = paginator
            .entries_page(&Key::from("key-00"), &Key::empty())
            .unwrap();
        // Two more scans push the first one out of the buffer.
        paginator.entries_page(&Key::from("key-000"), &Key::empty()).unwrap();
        paginator.entries_page(&Key::from("key-001"), &Key::empty()).unwrap();
        // The continuation still resolves through a fresh scan.
        let (page, _) = paginator.entries_page(&Key::from("key-00"), &next_a).unwrap();
        assert_eq!(page.first().map(|e| e.key.clone()), Some(next_a));
    }

    #[test]
    fn unknown_continuation_fails_the_page() {
        let paginator = SnapshotPaginator::with_config(snapshot_with(5, 20), small_config());
        let result = paginator.entries_page(&Key::empty(), &Key::from("no-such-key"));
        assert_eq!(result.unwrap_err(), Status::IllegalState);
    }

    #[test]
    fn key_pages_fit_more_items_than_entry_pages() {
        let snapshot = snapshot_with(30, 40);
        let paginator = SnapshotPaginator::with_config(snapshot, small_config());
        let (entry_page, _) = paginator.entries_page(&Key::empty(), &Key::empty()).unwrap();
        let paginator2 =
            SnapshotPaginator::with_config(snapshot_with(30, 40), small_config());
        let (key_page, _) = paginator2.keys_page(&Key::empty(), &Key::empty()).unwrap();
        assert!(key_page.len() > entry_page.len());
    }
}
