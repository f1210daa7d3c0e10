use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{RecordKey, RecordStore, StoredRecordEntry};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    entries: HashMap<RecordKey, StoredRecordEntry>,
    /// Keys in first-insertion order, for deterministic snapshots
    order: Vec<RecordKey>,
}

/// Process-local record store
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-written entry behind,
        // so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Option<StoredRecordEntry>> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn put(&self, key: RecordKey, entry: StoredRecordEntry) -> Result<()> {
        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) {
            inner.order.push(key.clone());
        }
        debug!("Stored record {} (update_count={})", key, entry.update_count);
        inner.entries.insert(key, entry);
        Ok(())
    }

    fn put_all(&self, entries: Vec<(RecordKey, StoredRecordEntry)>) -> Result<()> {
        let mut inner = self.lock();
        for (key, entry) in entries {
            if !inner.entries.contains_key(&key) {
                inner.order.push(key.clone());
            }
            inner.entries.insert(key, entry);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<(RecordKey, StoredRecordEntry)>> {
        let inner = self.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|key| inner.entries.get(key).map(|e| (key.clone(), e.clone())))
            .collect())
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn reset(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        debug!("Record store reset");
    }
}
