//! ML feature extraction for normalized flow batches.
//!
//! Every batch is encoded on its own; nothing is carried between batches, so the
//! same batch always yields the same bundle.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use tracing::debug;

use crate::config::VectorizerConfig;
use crate::domain::{FieldValue, RecordBatch};
use crate::observability::metrics;
use crate::pipeline::processing::normalize::{derive_subnet, field_value_timestamp, UNKNOWN};

/// Range of the bounded subnet hash
pub const SUBNET_HASH_BUCKETS: u64 = 10_000;

/// One named feature column, one value per batch row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStatistics {
    pub mean: f64,
    /// Sample standard deviation, 0 with fewer than two rows
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Non-null source values
    pub count: usize,
}

/// Category values in first-seen order; a value's code is its position
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EncodingMap {
    pub categories: Vec<String>,
}

impl EncodingMap {
    pub fn code_of(&self, value: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == value)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureBundle {
    pub numerical_features: Vec<FeatureColumn>,
    pub categorical_features: Vec<FeatureColumn>,
    pub temporal_features: Vec<FeatureColumn>,
    pub network_features: Vec<FeatureColumn>,
    /// All feature columns in matrix order
    pub feature_names: Vec<String>,
    pub encoding_maps: BTreeMap<String, EncodingMap>,
    pub statistics: BTreeMap<String, FieldStatistics>,
    pub total_features: usize,
    pub ready_for_ml: bool,
    pub rows: usize,
}

impl FeatureBundle {
    fn columns(&self) -> impl Iterator<Item = &FeatureColumn> {
        self.numerical_features
            .iter()
            .chain(&self.categorical_features)
            .chain(&self.temporal_features)
            .chain(&self.network_features)
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns().find(|c| c.name == name)
    }

    /// Row-major matrix with one column per entry of `feature_names`
    pub fn to_matrix(&self) -> Vec<Vec<f64>> {
        let by_name: HashMap<&str, &FeatureColumn> = self.columns().map(|c| (c.name.as_str(), c)).collect();
        let ordered: Vec<&FeatureColumn> = self
            .feature_names
            .iter()
            .filter_map(|n| by_name.get(n.as_str()).copied())
            .collect();
        (0..self.rows)
            .map(|row| ordered.iter().map(|c| c.values.get(row).copied().unwrap_or(0.0)).collect())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Vectorizer {
    config: VectorizerConfig,
}

impl Vectorizer {
    pub fn new(config: VectorizerConfig) -> Self {
        Self { config }
    }

    pub fn vectorize(&self, batch: &RecordBatch) -> FeatureBundle {
        let mut bundle = FeatureBundle {
            rows: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return bundle;
        }

        for field in self.present(batch, &self.config.numeric_fields) {
            if let Some((column, stats)) = numerical_feature(batch, field) {
                bundle.statistics.insert(field.to_string(), stats);
                bundle.numerical_features.push(column);
            }
        }

        for field in self.present(batch, &self.config.categorical_fields) {
            if let Some((column, map)) = categorical_feature(batch, field) {
                bundle.encoding_maps.insert(field.to_string(), map);
                bundle.categorical_features.push(column);
            }
        }

        for field in self.present(batch, &self.config.temporal_fields) {
            if let Some(column) = temporal_feature(batch, field) {
                bundle.temporal_features.push(column);
            }
        }

        for field in self.present(batch, &self.config.ip_fields) {
            bundle.network_features.extend(network_features(batch, field));
        }

        bundle.feature_names = bundle.columns().map(|c| c.name.clone()).collect();
        bundle.total_features = bundle.feature_names.len();
        bundle.ready_for_ml = bundle.total_features > 0;

        debug!(
            "Vectorized {} rows into {} features",
            bundle.rows, bundle.total_features
        );
        metrics::vectorize::batch_vectorized(bundle.total_features);
        bundle
    }

    fn present<'a>(&'a self, batch: &'a RecordBatch, fields: &'a [String]) -> impl Iterator<Item = &'a str> {
        fields
            .iter()
            .map(String::as_str)
            .filter(move |f| batch.has_column(f))
    }
}

fn numeric_value(value: &FieldValue) -> f64 {
    match value {
        FieldValue::Bool(b) => f64::from(u8::from(*b)),
        FieldValue::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        other => other.as_f64().unwrap_or(0.0),
    }
}

fn numerical_feature(batch: &RecordBatch, field: &str) -> Option<(FeatureColumn, FieldStatistics)> {
    let raw = batch.column_values(field);
    let values: Vec<f64> = raw.iter().map(numeric_value).collect();
    if values.iter().all(|v| *v == 0.0) {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    let stats = FieldStatistics {
        mean,
        std,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count: raw.iter().filter(|v| !v.is_null()).count(),
    };
    Some((
        FeatureColumn {
            name: field.to_string(),
            values,
        },
        stats,
    ))
}

fn categorical_feature(batch: &RecordBatch, field: &str) -> Option<(FeatureColumn, EncodingMap)> {
    let labels: Vec<String> = batch
        .column_values(field)
        .iter()
        .map(|v| v.as_text().unwrap_or_else(|| UNKNOWN.to_string()))
        .collect();

    let mut map = EncodingMap::default();
    for label in &labels {
        if map.code_of(label).is_none() {
            map.categories.push(label.clone());
        }
    }
    if map.len() < 2 {
        return None;
    }

    let values = labels
        .iter()
        .map(|l| map.code_of(l).unwrap_or(0) as f64)
        .collect();
    Some((
        FeatureColumn {
            name: format!("{}_encoded", field),
            values,
        },
        map,
    ))
}

fn temporal_feature(batch: &RecordBatch, field: &str) -> Option<FeatureColumn> {
    let parsed: Vec<_> = batch.column_values(field).iter().map(field_value_timestamp).collect();
    let min = parsed.iter().flatten().min().copied()?;
    let values = parsed
        .iter()
        .map(|ts| match ts {
            Some(ts) => (*ts - min).num_milliseconds() as f64 / 3_600_000.0,
            None => 0.0,
        })
        .collect();
    Some(FeatureColumn {
        name: format!("{}_hours", field),
        values,
    })
}

fn network_features(batch: &RecordBatch, field: &str) -> [FeatureColumn; 2] {
    let ips = batch.column_values(field);
    let embedding = ips
        .iter()
        .map(|v| v.as_text().map(|s| ipv4_embedding(&s)).unwrap_or(0.0))
        .collect();
    let subnet_hash = ips
        .iter()
        .map(|v| subnet_hash(&derive_subnet(v.as_text().as_deref())) as f64)
        .collect();
    [
        FeatureColumn {
            name: format!("{}_embedding", field),
            values: embedding,
        },
        FeatureColumn {
            name: format!("{}_subnet_hash", field),
            values: subnet_hash,
        },
    ]
}

/// Σ octet·256^(3−i); 0 for anything that is not an IPv4 address
pub fn ipv4_embedding(ip: &str) -> f64 {
    match ip.trim().parse::<Ipv4Addr>() {
        Ok(addr) => addr
            .octets()
            .iter()
            .enumerate()
            .map(|(i, o)| f64::from(*o) * 256f64.powi(3 - i as i32))
            .sum(),
        Err(_) => 0.0,
    }
}

/// First eight bytes of SHA-256(subnet) reduced into [0, SUBNET_HASH_BUCKETS)
pub fn subnet_hash(subnet: &str) -> u64 {
    let digest = Sha256::digest(subnet.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % SUBNET_HASH_BUCKETS
}
