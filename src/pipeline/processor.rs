//! Batch orchestration: mapping → normalization → upsert → quality and features over the kept records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info_span;
use uuid::Uuid;

use crate::config::{AppConfig, ProcessingConfig, VectorizerConfig};
use crate::domain::{RawBatch, RecordBatch};
use crate::error::{IngestError, Result};
use crate::observability::metrics;
use crate::observability::ProcessingLog;
use crate::pipeline::dedup::{DeduplicationEngine, UpsertStats};
use crate::pipeline::ingestion::{parse_batch, BatchFormat};
use crate::pipeline::processing::canonicalize::{FieldCanonicalizer, FieldMapping};
use crate::pipeline::processing::normalize::DefaultNormalizer;
use crate::pipeline::processing::quality_gate::{DefaultQualityGate, QualityGate, QualitySeverity};
use crate::pipeline::processing::vectorize::{FeatureBundle, Vectorizer};
use crate::pipeline::storage::{InMemoryRecordStore, RecordStore, StoreSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Completed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Error => "error",
        }
    }
}

/// Outcome of one batch. Always produced, even when the batch is rejected.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub batch_id: Uuid,
    pub source_identifier: String,
    pub status: ProcessingStatus,
    pub started_at: DateTime<Utc>,
    pub total_rows: usize,
    /// Records that survived normalization
    pub processed_records: usize,
    pub dropped_rows: usize,
    pub new_records: usize,
    pub updated_records: usize,
    pub ignored_duplicates: usize,
    pub quality_score: f64,
    pub quality_passed: bool,
    pub field_mapping: FieldMapping,
    pub duplicate_info: UpsertStats,
    pub vectorization: Option<FeatureBundle>,
    pub processing_time_seconds: f64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ProcessingResult {
    fn started(source_identifier: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_identifier: source_identifier.to_string(),
            status: ProcessingStatus::Completed,
            started_at,
            total_rows: 0,
            processed_records: 0,
            dropped_rows: 0,
            new_records: 0,
            updated_records: 0,
            ignored_duplicates: 0,
            quality_score: 0.0,
            quality_passed: false,
            field_mapping: FieldMapping::default(),
            duplicate_info: UpsertStats::default(),
            vectorization: None,
            processing_time_seconds: 0.0,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }

    /// Turn this result into a rejection: counts zeroed, error recorded
    fn fail(&mut self, error: &IngestError) {
        self.status = ProcessingStatus::Error;
        self.processed_records = 0;
        self.dropped_rows = 0;
        self.new_records = 0;
        self.updated_records = 0;
        self.ignored_duplicates = 0;
        self.quality_score = 0.0;
        self.quality_passed = false;
        self.duplicate_info = UpsertStats::default();
        self.vectorization = None;
        self.errors.push(error.to_string());
    }
}

/// Single-writer batch processor over an injected record store
pub struct DataProcessor {
    config: ProcessingConfig,
    canonicalizer: FieldCanonicalizer,
    normalizer: DefaultNormalizer,
    quality_gate: DefaultQualityGate,
    vectorizer: Vectorizer,
    dedup: DeduplicationEngine,
    log: ProcessingLog,
}

impl DataProcessor {
    pub fn new(
        config: ProcessingConfig,
        vectorizer_config: VectorizerConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        config.validate()?;
        let mut log = ProcessingLog::new();
        log.info(
            "system",
            "Data processor initialized",
            json!({
                "duplicate_strategy": config.duplicate_strategy.as_str(),
                "time_window_minutes": config.time_window_minutes,
                "quality_threshold": config.quality_threshold,
            }),
        );
        Ok(Self {
            dedup: DeduplicationEngine::new(store, &config),
            quality_gate: DefaultQualityGate::with_threshold(config.quality_threshold),
            vectorizer: Vectorizer::new(vectorizer_config),
            canonicalizer: FieldCanonicalizer::new(),
            normalizer: DefaultNormalizer::new(),
            config,
            log,
        })
    }

    /// Processor backed by a fresh in-memory store
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.processing.clone(),
            config.vectorizer.clone(),
            Arc::new(InMemoryRecordStore::new()),
        )
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn log(&self) -> &ProcessingLog {
        &self.log
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.dedup.store()
    }

    pub fn process_batch(&mut self, raw: RawBatch, source_identifier: &str) -> ProcessingResult {
        self.process_batch_at(raw, source_identifier, Utc::now())
    }

    /// Process with an explicit clock for store metadata
    pub fn process_batch_at(
        &mut self,
        raw: RawBatch,
        source_identifier: &str,
        now: DateTime<Utc>,
    ) -> ProcessingResult {
        let mut result = ProcessingResult::started(source_identifier, Utc::now());
        self.run_and_finish(&mut result, raw, now);
        result
    }

    /// Parse a payload and process it. Parse failures are reported as a rejected batch.
    pub fn process_bytes(&mut self, bytes: &[u8], format: BatchFormat, source_identifier: &str) -> ProcessingResult {
        let mut result = ProcessingResult::started(source_identifier, Utc::now());
        match parse_batch(bytes, format) {
            Ok(parsed) => {
                result.total_rows = parsed.skipped_rows;
                result.dropped_rows = parsed.skipped_rows;
                result.warnings.extend(parsed.warnings);
                self.run_and_finish(&mut result, parsed.batch, Utc::now());
            }
            Err(e) => {
                let started = Instant::now();
                result.fail(&e);
                self.finish(&mut result, started);
            }
        }
        result
    }

    fn run_and_finish(&mut self, result: &mut ProcessingResult, raw: RawBatch, now: DateTime<Utc>) {
        let span = info_span!("batch", batch_id = %result.batch_id, source = %result.source_identifier);
        let _enter = span.enter();
        let started = Instant::now();

        if let Err(e) = self.run(result, raw, now) {
            result.fail(&e);
        }
        self.finish(result, started);
    }

    fn run(&mut self, result: &mut ProcessingResult, raw: RawBatch, now: DateTime<Utc>) -> Result<()> {
        result.total_rows += raw.len();
        self.log.info(
            "ingest",
            format!("Processing batch from {}", result.source_identifier),
            json!({"batch_id": result.batch_id, "rows": raw.len(), "columns": raw.columns.len()}),
        );
        if raw.is_empty() {
            return Err(IngestError::Format("batch contains no rows".to_string()));
        }

        let mapping = if self.config.field_mapping_enabled {
            self.canonicalizer.canonicalize(&raw.columns)
        } else {
            self.canonicalizer.identity(&raw.columns)
        };
        self.log.info(
            "mapping",
            format!("Mapped {}/{} columns", mapping.mapped, mapping.total),
            json!({"confidence": mapping.confidence}),
        );

        let normalized = self.normalizer.normalize_batch(&raw, &mapping);
        result.field_mapping = mapping;
        result.dropped_rows += normalized.dropped_rows;
        result.processed_records = normalized.batch.len();
        for warning in &normalized.warnings {
            self.log.warning("normalize", warning.clone(), Value::Null);
        }
        result.warnings.extend(normalized.warnings);

        let columns = normalized.batch.columns;
        let (kept, stats) = self.dedup.upsert_batch_at(normalized.batch.records, now)?;
        result.new_records = stats.new_records;
        result.updated_records = stats.updated_records;
        result.ignored_duplicates = stats.ignored_duplicates;
        self.log.info("dedup", "Batch upserted", serde_json::to_value(&stats)?);
        result.duplicate_info = stats;

        // quality and features describe only what this batch changed in the store
        let kept = RecordBatch::new(columns, kept);

        let assessment = self.quality_gate.assess(&kept);
        result.quality_score = assessment.quality_score;
        result.quality_passed = assessment.passed;
        let quality_data = json!({
            "components": assessment.components,
            "issues": assessment.issues,
        });
        if kept.is_empty() {
            self.log.info("quality", "No kept records to assess", quality_data);
        } else if !assessment.passed {
            let message = format!(
                "Quality score {:.2} below threshold {:.2}",
                assessment.quality_score, self.config.quality_threshold
            );
            self.log.warning("quality", message.clone(), quality_data);
            result.warnings.push(message);
        } else if !assessment.issues.is_empty() {
            self.log.info(
                "quality",
                format!("{} quality issue(s) found", assessment.issues.len()),
                quality_data,
            );
        }
        result.warnings.extend(
            assessment
                .issues
                .iter()
                .filter(|issue| issue.severity == QualitySeverity::Error)
                .map(|issue| issue.description.clone()),
        );

        if self.config.vectorization_enabled {
            let bundle = self.vectorizer.vectorize(&kept);
            self.log.info(
                "vectorize",
                format!("Extracted {} features", bundle.total_features),
                json!({"ready_for_ml": bundle.ready_for_ml, "rows": bundle.rows}),
            );
            result.vectorization = Some(bundle);
        }
        Ok(())
    }

    fn finish(&mut self, result: &mut ProcessingResult, started: Instant) {
        result.processing_time_seconds = started.elapsed().as_secs_f64();
        match result.status {
            ProcessingStatus::Completed => {
                metrics::processor::batch_completed(result.processing_time_seconds);
                self.log.info(
                    "ingest",
                    "Batch completed",
                    json!({
                        "batch_id": result.batch_id,
                        "new": result.new_records,
                        "updated": result.updated_records,
                        "ignored": result.ignored_duplicates,
                        "quality_score": result.quality_score,
                    }),
                );
            }
            ProcessingStatus::Error => {
                metrics::processor::batch_failed();
                self.log.error(
                    "ingest",
                    "Batch rejected",
                    json!({"batch_id": result.batch_id, "errors": result.errors}),
                );
            }
        }
    }

    /// Snapshot rows: canonical fields plus `_global_key` and store metadata
    pub fn export_snapshot_rows(&self) -> Result<Vec<Map<String, Value>>> {
        Ok(self
            .store()
            .snapshot()?
            .iter()
            .map(|(key, entry)| entry.to_export_row(key))
            .collect())
    }

    pub fn store_summary(&self) -> Result<StoreSummary> {
        self.store().summary()
    }

    /// Drop every stored record and the processing log
    pub fn reset(&mut self) {
        self.store().reset();
        self.log.clear();
        self.log.info("system", "Processor reset", Value::Null);
    }
}
