//! Cross-batch deduplication: decides new / updated / ignored for every record and
//! keeps the global record store current.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{DuplicateStrategy, ProcessingConfig};
use crate::domain::CanonicalRecord;
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::processing::change_detect::ChangeDetector;
use crate::pipeline::processing::merge::MergeResolver;
use crate::pipeline::storage::{
    compute_content_hash, compute_record_key, RecordKey, RecordStore, StoredRecordEntry,
};

/// Per-batch upsert counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpsertStats {
    pub new_records: usize,
    pub updated_records: usize,
    pub ignored_duplicates: usize,
    pub processing_time_seconds: f64,
}

impl UpsertStats {
    pub fn total(&self) -> usize {
        self.new_records + self.updated_records + self.ignored_duplicates
    }
}

/// What happened to one incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertDecision {
    New,
    Updated,
    Ignored,
}

pub struct DeduplicationEngine {
    store: Arc<dyn RecordStore>,
    strategy: DuplicateStrategy,
    window_minutes: i64,
    detector: ChangeDetector,
    resolver: MergeResolver,
}

impl DeduplicationEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: &ProcessingConfig) -> Self {
        Self {
            store,
            strategy: config.duplicate_strategy,
            window_minutes: config.time_window_minutes.max(1),
            detector: ChangeDetector::new(),
            resolver: MergeResolver::default(),
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_resolver(mut self, resolver: MergeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn strategy(&self) -> DuplicateStrategy {
        self.strategy
    }

    pub fn upsert_batch(&self, records: Vec<CanonicalRecord>) -> Result<(Vec<CanonicalRecord>, UpsertStats)> {
        self.upsert_batch_at(records, Utc::now())
    }

    /// Fold the batch into the store in input order. Records sharing a key see each
    /// other's results. Nothing reaches the store until the whole batch has been
    /// folded, so a failed batch leaves the store untouched.
    pub fn upsert_batch_at(
        &self,
        records: Vec<CanonicalRecord>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<CanonicalRecord>, UpsertStats)> {
        let started = Instant::now();
        let mut stats = UpsertStats::default();
        let mut kept = Vec::with_capacity(records.len());
        let mut staged: HashMap<RecordKey, StoredRecordEntry> = HashMap::new();
        let mut staged_order: Vec<RecordKey> = Vec::new();

        for record in records {
            let key = compute_record_key(&record, self.window_minutes);
            let current = match staged.get(&key) {
                Some(entry) => Some(entry.clone()),
                None => self.store.get(&key)?,
            };

            let (decision, entry, kept_record) = match current {
                None => {
                    let entry = StoredRecordEntry::new(record.clone(), now);
                    (UpsertDecision::New, Some(entry), Some(record))
                }
                Some(mut entry) => match self.reconcile(&mut entry, record, now) {
                    Some(result) => (UpsertDecision::Updated, Some(entry), Some(result)),
                    None => (UpsertDecision::Ignored, None, None),
                },
            };

            debug!("record {} -> {:?}", key, decision);
            match decision {
                UpsertDecision::New => stats.new_records += 1,
                UpsertDecision::Updated => stats.updated_records += 1,
                UpsertDecision::Ignored => stats.ignored_duplicates += 1,
            }
            if let Some(entry) = entry {
                if !staged.contains_key(&key) {
                    staged_order.push(key.clone());
                }
                staged.insert(key, entry);
            }
            if let Some(record) = kept_record {
                kept.push(record);
            }
        }

        let writes: Vec<(RecordKey, StoredRecordEntry)> = staged_order
            .into_iter()
            .filter_map(|key| staged.remove(&key).map(|entry| (key, entry)))
            .collect();
        self.store.put_all(writes)?;

        stats.processing_time_seconds = started.elapsed().as_secs_f64();
        metrics::dedup::batch_upserted(&stats, self.store.len());
        info!(
            "Upsert ({}): {} new, {} updated, {} ignored; store size {}",
            self.strategy,
            stats.new_records,
            stats.updated_records,
            stats.ignored_duplicates,
            self.store.len()
        );
        Ok((kept, stats))
    }

    /// Apply the duplicate strategy to an existing entry. Returns the record to keep
    /// for this batch when the entry was updated, `None` when the incoming record is
    /// an ignored duplicate.
    fn reconcile(
        &self,
        entry: &mut StoredRecordEntry,
        incoming: CanonicalRecord,
        now: DateTime<Utc>,
    ) -> Option<CanonicalRecord> {
        if compute_content_hash(&incoming) == entry.content_hash {
            return None;
        }
        let changes = self.detector.detect_changes(&entry.data, &incoming);
        if !changes.has_changes() {
            return None;
        }

        match self.strategy {
            DuplicateStrategy::SmartUpsert => {
                let merged = self.resolver.merge(&entry.data, &incoming, &changes, now);
                entry.apply_update(merged.clone(), now);
                Some(merged)
            }
            DuplicateStrategy::TimestampPriority => {
                let newer = match (entry.data.timestamp, incoming.timestamp) {
                    (Some(stored), Some(candidate)) => candidate > stored,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if newer {
                    entry.apply_update(incoming.clone(), now);
                    Some(incoming)
                } else {
                    None
                }
            }
            DuplicateStrategy::Ignore => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::pipeline::storage::InMemoryRecordStore;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn flow(minute: u32, bytes: i64) -> CanonicalRecord {
        CanonicalRecord {
            source_ip: Some("10.0.0.1".to_string()),
            destination_ip: Some("10.0.0.2".to_string()),
            protocol: Some("TCP".to_string()),
            port: Some(80),
            application: Some("unknown".to_string()),
            bytes: Some(bytes),
            timestamp: Some(at(minute)),
            ..Default::default()
        }
    }

    fn engine(strategy: DuplicateStrategy) -> DeduplicationEngine {
        let config = ProcessingConfig {
            duplicate_strategy: strategy,
            time_window_minutes: 5,
            ..ProcessingConfig::default()
        };
        DeduplicationEngine::new(Arc::new(InMemoryRecordStore::new()), &config)
    }

    #[test]
    fn test_new_then_duplicate_then_merge() {
        let engine = engine(DuplicateStrategy::SmartUpsert);

        let (kept, stats) = engine.upsert_batch_at(vec![flow(0, 100)], at(0)).unwrap();
        assert_eq!((stats.new_records, kept.len(), engine.store().len()), (1, 1, 1));

        let (kept, stats) = engine.upsert_batch_at(vec![flow(0, 100)], at(1)).unwrap();
        assert_eq!(stats.ignored_duplicates, 1);
        assert!(kept.is_empty());

        let (kept, stats) = engine.upsert_batch_at(vec![flow(3, 50)], at(3)).unwrap();
        assert_eq!(stats.updated_records, 1);
        assert_eq!(kept[0].bytes, Some(150));
        let (_, entry) = engine.store().snapshot().unwrap().remove(0);
        assert_eq!(entry.update_count, 1);
        assert_eq!(entry.first_seen, at(0));
        assert_eq!(entry.last_updated, at(3));
        assert_eq!(entry.data.timestamp, Some(at(3)));
    }

    #[test]
    fn test_ignored_duplicate_leaves_metadata_alone() {
        let engine = engine(DuplicateStrategy::SmartUpsert);
        engine.upsert_batch_at(vec![flow(0, 100)], at(0)).unwrap();
        engine.upsert_batch_at(vec![flow(0, 100)], at(30)).unwrap();
        let (_, entry) = engine.store().snapshot().unwrap().remove(0);
        assert_eq!(entry.last_updated, at(0));
        assert_eq!(entry.update_count, 0);
    }

    #[test]
    fn test_same_key_records_fold_sequentially() {
        let engine = engine(DuplicateStrategy::SmartUpsert);
        let (kept, stats) = engine
            .upsert_batch_at(vec![flow(0, 100), flow(1, 50), flow(2, 25)], at(5))
            .unwrap();
        assert_eq!((stats.new_records, stats.updated_records), (1, 2));
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[2].bytes, Some(175));

        let snapshot = engine.store().snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.update_count, 2);
        assert_eq!(snapshot[0].1.data.bytes, Some(175));
    }

    #[test]
    fn test_window_crossing_creates_new_key() {
        let engine = engine(DuplicateStrategy::SmartUpsert);
        engine.upsert_batch_at(vec![flow(0, 100)], at(0)).unwrap();
        let (_, stats) = engine.upsert_batch_at(vec![flow(10, 100)], at(10)).unwrap();
        assert_eq!(stats.new_records, 1);
        assert_eq!(engine.store().len(), 2);
    }

    #[test]
    fn test_timestamp_priority() {
        let engine = engine(DuplicateStrategy::TimestampPriority);
        engine.upsert_batch_at(vec![flow(2, 100)], at(2)).unwrap();

        // older observation in the same window is ignored
        let (kept, stats) = engine.upsert_batch_at(vec![flow(1, 999)], at(3)).unwrap();
        assert_eq!(stats.ignored_duplicates, 1);
        assert!(kept.is_empty());

        // newer one replaces wholesale, no accumulation
        let (kept, stats) = engine.upsert_batch_at(vec![flow(4, 7)], at(4)).unwrap();
        assert_eq!(stats.updated_records, 1);
        assert_eq!(kept[0].bytes, Some(7));
        let (_, entry) = engine.store().snapshot().unwrap().remove(0);
        assert_eq!(entry.data.bytes, Some(7));
        assert_eq!(entry.first_seen, at(2));
        assert_eq!(entry.update_count, 1);
    }

    #[test]
    fn test_timestamp_priority_without_times_is_ignored() {
        let engine = engine(DuplicateStrategy::TimestampPriority);
        let mut untimed = flow(0, 1);
        untimed.timestamp = None;
        engine.upsert_batch_at(vec![untimed.clone()], at(0)).unwrap();

        // same untimed bucket, but the stored record has no time at all
        let mut other = untimed.clone();
        other.bytes = Some(2);
        let (_, stats) = engine.upsert_batch_at(vec![other], at(1)).unwrap();
        assert_eq!(stats.ignored_duplicates, 1);
    }

    #[test]
    fn test_ignore_strategy() {
        let engine = engine(DuplicateStrategy::Ignore);
        engine.upsert_batch_at(vec![flow(0, 100)], at(0)).unwrap();
        let (kept, stats) = engine.upsert_batch_at(vec![flow(1, 5)], at(1)).unwrap();
        assert_eq!(stats.ignored_duplicates, 1);
        assert!(kept.is_empty());
        assert_eq!(engine.store().snapshot().unwrap()[0].1.data.bytes, Some(100));
    }

    #[test]
    fn test_accumulation_law() {
        let engine = engine(DuplicateStrategy::SmartUpsert);
        let values = [10, 20, 30, 40, 55];
        for (i, v) in values.iter().enumerate() {
            engine.upsert_batch_at(vec![flow(i as u32 % 5, *v)], at(i as u32)).unwrap();
        }
        let (_, entry) = engine.store().snapshot().unwrap().remove(0);
        assert_eq!(entry.data.bytes, Some(values.iter().sum::<i64>()));
        assert_eq!(entry.update_count, values.len() as u64 - 1);
    }

    /// Reads from a real store; every write fails
    struct ReadOnlyStore {
        inner: Arc<InMemoryRecordStore>,
    }

    impl RecordStore for ReadOnlyStore {
        fn get(&self, key: &RecordKey) -> Result<Option<StoredRecordEntry>> {
            self.inner.get(key)
        }

        fn put(&self, _key: RecordKey, _entry: StoredRecordEntry) -> Result<()> {
            Err(IngestError::Io(std::io::Error::other("store is read-only")))
        }

        fn put_all(&self, _entries: Vec<(RecordKey, StoredRecordEntry)>) -> Result<()> {
            Err(IngestError::Io(std::io::Error::other("store is read-only")))
        }

        fn snapshot(&self) -> Result<Vec<(RecordKey, StoredRecordEntry)>> {
            self.inner.snapshot()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn reset(&self) {
            self.inner.reset()
        }
    }

    #[test]
    fn test_failed_commit_leaves_store_unchanged() {
        let inner = Arc::new(InMemoryRecordStore::new());
        let config = ProcessingConfig {
            time_window_minutes: 5,
            ..ProcessingConfig::default()
        };
        DeduplicationEngine::new(inner.clone(), &config)
            .upsert_batch_at(vec![flow(0, 100)], at(0))
            .unwrap();
        let before = inner.snapshot().unwrap();

        let engine = DeduplicationEngine::new(Arc::new(ReadOnlyStore { inner: inner.clone() }), &config);
        let mut other = flow(0, 7);
        other.port = Some(22);
        let err = engine.upsert_batch_at(vec![flow(1, 50), other], at(1));

        assert!(err.is_err());
        assert_eq!(inner.snapshot().unwrap(), before);
        assert_eq!(inner.len(), 1);
    }
}
