pub mod fingerprint;
pub mod in_memory;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::domain::CanonicalRecord;
use crate::error::Result;

pub use fingerprint::{compute_content_hash, compute_record_key, RecordKey};
pub use in_memory::InMemoryRecordStore;

/// What the store keeps per key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecordEntry {
    pub data: CanonicalRecord,
    pub content_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub update_count: u64,
}

impl StoredRecordEntry {
    pub fn new(data: CanonicalRecord, now: DateTime<Utc>) -> Self {
        let content_hash = compute_content_hash(&data);
        Self {
            data,
            content_hash,
            first_seen: now,
            last_updated: now,
            update_count: 0,
        }
    }

    /// Swap in new data and account for exactly one applied update
    pub fn apply_update(&mut self, data: CanonicalRecord, now: DateTime<Utc>) {
        self.content_hash = compute_content_hash(&data);
        self.data = data;
        self.last_updated = now;
        self.update_count += 1;
    }

    /// Flat export row: canonical fields plus `_`-prefixed store metadata
    pub fn to_export_row(&self, key: &RecordKey) -> Map<String, Value> {
        let mut row = self.data.to_row();
        row.insert("_global_key".to_string(), json!(key.as_str()));
        row.insert(
            "_first_seen".to_string(),
            json!(self.first_seen.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        row.insert(
            "_last_updated".to_string(),
            json!(self.last_updated.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        row.insert("_update_count".to_string(), json!(self.update_count));
        row
    }
}

/// Aggregate view of the store for status reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreSummary {
    pub total_records: usize,
    pub total_updates: u64,
    pub oldest_first_seen: Option<DateTime<Utc>>,
    pub latest_update: Option<DateTime<Utc>>,
}

/// Keyed record storage behind the deduplication engine. Implementations are shared
/// across batches; callers serialize writes.
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &RecordKey) -> Result<Option<StoredRecordEntry>>;

    fn put(&self, key: RecordKey, entry: StoredRecordEntry) -> Result<()>;

    /// Write a set of entries as one unit, in order
    fn put_all(&self, entries: Vec<(RecordKey, StoredRecordEntry)>) -> Result<()> {
        for (key, entry) in entries {
            self.put(key, entry)?;
        }
        Ok(())
    }

    /// Every entry in first-insertion order
    fn snapshot(&self) -> Result<Vec<(RecordKey, StoredRecordEntry)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reset(&self);

    fn summary(&self) -> Result<StoreSummary> {
        let entries = self.snapshot()?;
        Ok(StoreSummary {
            total_records: entries.len(),
            total_updates: entries.iter().map(|(_, e)| e.update_count).sum(),
            oldest_first_seen: entries.iter().map(|(_, e)| e.first_seen).min(),
            latest_update: entries.iter().map(|(_, e)| e.last_updated).max(),
        })
    }
}
