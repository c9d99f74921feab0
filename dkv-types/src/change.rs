//! Change notifications delivered to subscribers.

use crate::types::Entry;

/// One batch of observed mutations, grouped by kind. Immutable once built;
/// observers only ever read it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    inserts: Vec<Entry>,
    updates: Vec<Entry>,
    deletes: Vec<Entry>,
    device_id: String,
    is_clear: bool,
}

impl ChangeNotification {
    pub fn new(
        inserts: Vec<Entry>,
        updates: Vec<Entry>,
        deletes: Vec<Entry>,
        device_id: impl Into<String>,
        is_clear: bool,
    ) -> Self {
        ChangeNotification {
            inserts,
            updates,
            deletes,
            device_id: device_id.into(),
            is_clear,
        }
    }

    pub fn insert_entries(&self) -> &[Entry] {
        &self.inserts
    }

    pub fn update_entries(&self) -> &[Entry] {
        &self.updates
    }

    pub fn delete_entries(&self) -> &[Entry] {
        &self.deletes
    }

    /// Device the mutations originated from; the local device id for
    /// locally-applied writes.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// True when the batch represents a whole-store clear.
    pub fn is_clear(&self) -> bool {
        self.is_clear
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty() && !self.is_clear
    }

    /// Raw wire size of the three entry lists combined.
    pub fn raw_size(&self) -> usize {
        self.inserts
            .iter()
            .chain(&self.updates)
            .chain(&self.deletes)
            .map(Entry::raw_size)
            .sum()
    }
}
