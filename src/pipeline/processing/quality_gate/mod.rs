use serde::Serialize;

use crate::domain::{CanonicalField, RecordBatch};
use crate::observability::metrics;

/// Columns whose completeness matters most for flow analysis
pub const CRITICAL_FIELDS: [CanonicalField; 3] = [
    CanonicalField::SourceIp,
    CanonicalField::DestinationIp,
    CanonicalField::Protocol,
];

/// Quality assessment result for one batch
#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    /// Mean of the applicable components (0.0 to 1.0)
    pub quality_score: f64,
    pub components: QualityComponents,
    /// Whether the score reached the configured threshold
    pub passed: bool,
    pub issues: Vec<QualityIssue>,
}

/// Individual completeness ratios; `None` when not applicable to the batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityComponents {
    pub known_app_ratio: Option<f64>,
    pub completeness: Option<f64>,
    pub critical_completeness: Option<f64>,
}

impl QualityComponents {
    /// Mean of the applicable components. Inapplicable ones are left out, not scored as zero.
    pub fn score(&self) -> f64 {
        let applicable: Vec<f64> = [self.known_app_ratio, self.completeness, self.critical_completeness]
            .into_iter()
            .flatten()
            .collect();
        if applicable.is_empty() {
            return 0.0;
        }
        (applicable.iter().sum::<f64>() / applicable.len() as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityIssue {
    pub issue_type: QualityIssueType,
    pub severity: QualitySeverity,
    pub description: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityIssueType {
    /// Column with a high share of null cells
    MissingData,
    /// Most flows could not be attributed to an application
    UnknownApplications,
    /// Score below the configured threshold
    BelowThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize)]
pub enum QualitySeverity {
    Info,
    Warning,
    Error,
}

/// Trait for batch quality assessment
pub trait QualityGate {
    fn assess(&self, batch: &RecordBatch) -> QualityAssessment;
}

#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Minimum quality score for a batch to pass
    pub min_quality_score: f64,
    /// Null share above which a column is reported as an issue
    pub max_column_null_ratio: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 0.7,
            max_column_null_ratio: 0.5,
        }
    }
}

/// Default completeness-based quality gate
#[derive(Debug, Clone, Default)]
pub struct DefaultQualityGate {
    pub config: QualityGateConfig,
}

impl DefaultQualityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            config: QualityGateConfig {
                min_quality_score: threshold,
                ..QualityGateConfig::default()
            },
        }
    }

    /// The batch score alone
    pub fn score(&self, batch: &RecordBatch) -> f64 {
        self.components(batch).score()
    }

    pub fn components(&self, batch: &RecordBatch) -> QualityComponents {
        if batch.is_empty() {
            return QualityComponents::default();
        }
        let rows = batch.len() as f64;

        let known_app_ratio = batch.has_column(CanonicalField::Application.name()).then(|| {
            batch.records.iter().filter(|r| r.is_known_app).count() as f64 / rows
        });

        let completeness = mean_null_ratio(batch, batch.columns.iter().map(String::as_str))
            .map(|null_ratio| 1.0 - null_ratio);

        let critical_present = CRITICAL_FIELDS
            .iter()
            .map(|f| f.name())
            .filter(|name| batch.has_column(name));
        let critical_completeness = mean_null_ratio(batch, critical_present).map(|r| 1.0 - r);

        QualityComponents {
            known_app_ratio,
            completeness,
            critical_completeness,
        }
    }

    fn column_issues(&self, batch: &RecordBatch) -> Vec<QualityIssue> {
        let mut issues = Vec::new();
        if batch.is_empty() {
            return issues;
        }
        for column in &batch.columns {
            let ratio = null_ratio(batch, column);
            if ratio > self.config.max_column_null_ratio {
                let critical = CRITICAL_FIELDS.iter().any(|f| f.name() == column);
                issues.push(QualityIssue {
                    issue_type: QualityIssueType::MissingData,
                    severity: if critical { QualitySeverity::Error } else { QualitySeverity::Warning },
                    description: format!("{:.0}% of '{}' values are missing", ratio * 100.0, column),
                    field: Some(column.clone()),
                });
            }
        }
        issues
    }
}

impl QualityGate for DefaultQualityGate {
    fn assess(&self, batch: &RecordBatch) -> QualityAssessment {
        let components = self.components(batch);
        let quality_score = components.score();
        let mut issues = self.column_issues(batch);

        if let Some(ratio) = components.known_app_ratio {
            if ratio < 0.5 {
                issues.push(QualityIssue {
                    issue_type: QualityIssueType::UnknownApplications,
                    severity: QualitySeverity::Info,
                    description: format!("only {:.0}% of flows have a known application", ratio * 100.0),
                    field: Some(CanonicalField::Application.name().to_string()),
                });
            }
        }

        let passed = quality_score >= self.config.min_quality_score;
        if !passed {
            issues.push(QualityIssue {
                issue_type: QualityIssueType::BelowThreshold,
                severity: QualitySeverity::Warning,
                description: format!(
                    "quality score {:.2} below threshold {:.2}",
                    quality_score, self.config.min_quality_score
                ),
                field: None,
            });
        }

        metrics::quality::score_recorded(quality_score, passed);
        QualityAssessment {
            quality_score,
            components,
            passed,
            issues,
        }
    }
}

fn null_ratio(batch: &RecordBatch, column: &str) -> f64 {
    let nulls = batch
        .records
        .iter()
        .filter(|r| r.get_by_name(column).is_null())
        .count();
    nulls as f64 / batch.len() as f64
}

/// Mean per-column null share, `None` when there are no columns to look at
fn mean_null_ratio<'a>(batch: &RecordBatch, columns: impl Iterator<Item = &'a str>) -> Option<f64> {
    let ratios: Vec<f64> = columns.map(|c| null_ratio(batch, c)).collect();
    if ratios.is_empty() {
        None
    } else {
        Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
    }
}
