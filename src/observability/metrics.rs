//! Metrics for the ingestion pipeline
//!
//! Recording goes through the `metrics` facade, so every call is a no-op until
//! a recorder is installed with [`init`].

use std::fmt;
use std::net::SocketAddr;
use tracing::info;

/// Environment variable holding the Prometheus listener address
pub const METRICS_ADDR_ENV: &str = "FLOW_INGEST_METRICS_ADDR";

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Normalize metrics
    NormalizeRecordsProcessed,
    NormalizeRowsDropped,
    NormalizeFieldsDefaulted,
    NormalizeWarnings,
    NormalizeBatchesProcessed,
    NormalizeBatchSize,

    // Dedup metrics
    DedupRecordsNew,
    DedupRecordsUpdated,
    DedupRecordsIgnored,
    DedupUpsertDuration,
    DedupStoreSize,

    // Quality metrics
    QualityScore,
    QualityBatchesPassed,
    QualityBatchesFailed,

    // Vectorize metrics
    VectorizeBatchesProcessed,
    VectorizeFeatureCount,

    // Processor metrics
    ProcessorBatchesCompleted,
    ProcessorBatchesFailed,
    ProcessorDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::NormalizeRecordsProcessed => "flow_normalize_records_processed_total",
            MetricName::NormalizeRowsDropped => "flow_normalize_rows_dropped_total",
            MetricName::NormalizeFieldsDefaulted => "flow_normalize_fields_defaulted_total",
            MetricName::NormalizeWarnings => "flow_normalize_warnings_total",
            MetricName::NormalizeBatchesProcessed => "flow_normalize_batches_processed_total",
            MetricName::NormalizeBatchSize => "flow_normalize_batch_size",

            MetricName::DedupRecordsNew => "flow_dedup_records_new_total",
            MetricName::DedupRecordsUpdated => "flow_dedup_records_updated_total",
            MetricName::DedupRecordsIgnored => "flow_dedup_records_ignored_total",
            MetricName::DedupUpsertDuration => "flow_dedup_upsert_duration_seconds",
            MetricName::DedupStoreSize => "flow_dedup_store_size",

            MetricName::QualityScore => "flow_quality_score",
            MetricName::QualityBatchesPassed => "flow_quality_batches_passed_total",
            MetricName::QualityBatchesFailed => "flow_quality_batches_failed_total",

            MetricName::VectorizeBatchesProcessed => "flow_vectorize_batches_processed_total",
            MetricName::VectorizeFeatureCount => "flow_vectorize_feature_count",

            MetricName::ProcessorBatchesCompleted => "flow_processor_batches_completed_total",
            MetricName::ProcessorBatchesFailed => "flow_processor_batches_failed_total",
            MetricName::ProcessorDuration => "flow_processor_duration_seconds",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder when `FLOW_INGEST_METRICS_ADDR` is set.
/// Returns whether a recorder was installed. Must run inside a tokio runtime.
pub fn init() -> Result<bool, Box<dyn std::error::Error>> {
    let Ok(addr) = std::env::var(METRICS_ADDR_ENV) else {
        info!("Metrics disabled ({} not set)", METRICS_ADDR_ENV);
        return Ok(false);
    };
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| format!("Invalid {} '{}': {}", METRICS_ADDR_ENV, addr, e))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;

    info!("Metrics exporter listening on {}", addr);
    Ok(true)
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn record_normalized() {
        ::metrics::counter!(MetricName::NormalizeRecordsProcessed.as_str()).increment(1);
    }

    pub fn row_dropped() {
        ::metrics::counter!(MetricName::NormalizeRowsDropped.as_str()).increment(1);
    }

    /// A field fell back to its default value
    pub fn field_defaulted(column: &str) {
        ::metrics::counter!(MetricName::NormalizeFieldsDefaulted.as_str(), "column" => column.to_string())
            .increment(1);
    }

    pub fn batch_processed(records: usize, warnings: usize) {
        ::metrics::histogram!(MetricName::NormalizeBatchSize.as_str()).record(records as f64);
        ::metrics::counter!(MetricName::NormalizeBatchesProcessed.as_str()).increment(1);
        ::metrics::counter!(MetricName::NormalizeWarnings.as_str()).increment(warnings as u64);
    }
}

// ============================================================================
// Dedup Metrics
// ============================================================================

pub mod dedup {
    use super::MetricName;
    use crate::pipeline::dedup::UpsertStats;

    pub fn batch_upserted(stats: &UpsertStats, store_len: usize) {
        ::metrics::counter!(MetricName::DedupRecordsNew.as_str()).increment(stats.new_records as u64);
        ::metrics::counter!(MetricName::DedupRecordsUpdated.as_str()).increment(stats.updated_records as u64);
        ::metrics::counter!(MetricName::DedupRecordsIgnored.as_str())
            .increment(stats.ignored_duplicates as u64);
        ::metrics::histogram!(MetricName::DedupUpsertDuration.as_str()).record(stats.processing_time_seconds);
        ::metrics::gauge!(MetricName::DedupStoreSize.as_str()).set(store_len as f64);
    }
}

// ============================================================================
// Quality Metrics
// ============================================================================

pub mod quality {
    use super::MetricName;

    pub fn score_recorded(score: f64, passed: bool) {
        ::metrics::histogram!(MetricName::QualityScore.as_str()).record(score);
        let name = if passed {
            MetricName::QualityBatchesPassed
        } else {
            MetricName::QualityBatchesFailed
        };
        ::metrics::counter!(name.as_str()).increment(1);
    }
}

// ============================================================================
// Vectorize Metrics
// ============================================================================

pub mod vectorize {
    use super::MetricName;

    pub fn batch_vectorized(total_features: usize) {
        ::metrics::counter!(MetricName::VectorizeBatchesProcessed.as_str()).increment(1);
        ::metrics::histogram!(MetricName::VectorizeFeatureCount.as_str()).record(total_features as f64);
    }
}

// ============================================================================
// Processor Metrics
// ============================================================================

pub mod processor {
    use super::MetricName;

    pub fn batch_completed(duration_secs: f64) {
        ::metrics::counter!(MetricName::ProcessorBatchesCompleted.as_str()).increment(1);
        ::metrics::histogram!(MetricName::ProcessorDuration.as_str()).record(duration_secs);
    }

    pub fn batch_failed() {
        ::metrics::counter!(MetricName::ProcessorBatchesFailed.as_str()).increment(1);
    }
}
