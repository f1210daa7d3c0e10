use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{IngestError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "flow_ingest.toml";

/// How an incoming record is reconciled with a stored record under the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStrategy {
    /// Merge field-by-field through the merge policy table
    #[default]
    SmartUpsert,
    /// Replace the stored record only when the incoming one is strictly newer
    TimestampPriority,
    /// Keep whatever was stored first. Unrecognized strategy names land here too.
    #[serde(other)]
    Ignore,
}

impl DuplicateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStrategy::SmartUpsert => "smart_upsert",
            DuplicateStrategy::TimestampPriority => "timestamp_priority",
            DuplicateStrategy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for DuplicateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicateStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "smart_upsert" => DuplicateStrategy::SmartUpsert,
            "timestamp_priority" => DuplicateStrategy::TimestampPriority,
            _ => DuplicateStrategy::Ignore,
        })
    }
}

/// Per-processor settings, fixed at construction and applied to every batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub duplicate_strategy: DuplicateStrategy,
    pub vectorization_enabled: bool,
    pub field_mapping_enabled: bool,
    pub time_window_minutes: i64,
    pub quality_threshold: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            duplicate_strategy: DuplicateStrategy::SmartUpsert,
            vectorization_enabled: true,
            field_mapping_enabled: true,
            time_window_minutes: 5,
            quality_threshold: 0.7,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.time_window_minutes < 1 {
            return Err(IngestError::Config(format!(
                "time_window_minutes must be >= 1, got {}",
                self.time_window_minutes
            )));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(IngestError::Config(format!(
                "quality_threshold must be within [0, 1], got {}",
                self.quality_threshold
            )));
        }
        Ok(())
    }
}

/// Field lists the vectorizer draws features from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerConfig {
    pub numeric_fields: Vec<String>,
    pub categorical_fields: Vec<String>,
    pub temporal_fields: Vec<String>,
    pub ip_fields: Vec<String>,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            numeric_fields: owned(&[
                "port",
                "source_port",
                "bytes",
                "packets",
                "traffic_volume",
                "connection_count",
            ]),
            categorical_fields: owned(&[
                "protocol",
                "application",
                "source_subnet",
                "destination_subnet",
            ]),
            temporal_fields: owned(&["timestamp"]),
            ip_fields: owned(&["source_ip", "destination_ip"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub inbox_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub poll_interval_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("inbox"),
            processed_dir: PathBuf::from("inbox/processed"),
            failed_dir: PathBuf::from("inbox/failed"),
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub snapshot_path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("output/store_snapshot.ndjson"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub processing: ProcessingConfig,
    pub vectorizer: VectorizerConfig,
    pub intake: IntakeConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.processing.validate()?;
        Ok(config)
    }
}
