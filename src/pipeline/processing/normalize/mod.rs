use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::net::IpAddr;
use tracing::debug;

use crate::domain::{CanonicalField, CanonicalRecord, FieldValue, RawBatch, RawRecord, RecordBatch};
use crate::error::{IngestError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::canonicalize::FieldMapping;

/// Application values that mean "we don't know"
pub const APPLICATION_SENTINELS: &[&str] = &["", "na", "none", "unknown", "null", "n/a", "-", "undefined"];
pub const UNKNOWN: &str = "unknown";

/// A canonical record plus the field-level problems hit while building it
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub record: CanonicalRecord,
    pub warnings: Vec<String>,
}

/// Outcome of normalizing a whole batch
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub batch: RecordBatch,
    pub dropped_rows: usize,
    pub warnings: Vec<String>,
}

/// Trait for turning raw rows into canonical records
pub trait Normalizer {
    /// Normalize one row. Bad fields degrade to defaults; an `Err` means the row is unusable.
    fn normalize(&self, row: &RawRecord, mapping: &FieldMapping) -> Result<NormalizedRow>;
}

/// Default normalizer implementing the coerce-or-default policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNormalizer;

impl DefaultNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize every row, dropping the ones that cannot be built. The batch never fails here.
    pub fn normalize_batch(&self, raw: &RawBatch, mapping: &FieldMapping) -> NormalizedBatch {
        let mut out = NormalizedBatch {
            batch: RecordBatch::new(batch_columns(mapping), Vec::with_capacity(raw.len())),
            ..Default::default()
        };

        for (index, row) in raw.rows.iter().enumerate() {
            match self.normalize(row, mapping) {
                Ok(normalized) => {
                    for warning in normalized.warnings {
                        out.warnings.push(format!("row {}: {}", index, warning));
                    }
                    out.batch.records.push(normalized.record);
                }
                Err(e) => {
                    let message = format!("row {} dropped: {}", index, e);
                    debug!("{}", message);
                    metrics::normalize::row_dropped();
                    out.dropped_rows += 1;
                    out.warnings.push(message);
                }
            }
        }

        metrics::normalize::batch_processed(out.batch.len(), out.warnings.len());
        out
    }

    fn apply_field(
        &self,
        record: &mut CanonicalRecord,
        field: CanonicalField,
        raw_column: &str,
        value: &Value,
        warnings: &mut Vec<String>,
    ) {
        match field {
            CanonicalField::SourceIp => record.source_ip = text_of(value),
            CanonicalField::DestinationIp => record.destination_ip = text_of(value),
            CanonicalField::Protocol => {
                record.protocol = text_of(value).map(|p| p.to_uppercase());
            }
            CanonicalField::SourcePort => {
                record.source_port = Some(coerce_or_zero(raw_column, value, warnings));
            }
            CanonicalField::Port => record.port = Some(coerce_or_zero(raw_column, value, warnings)),
            CanonicalField::Bytes => record.bytes = Some(coerce_or_zero(raw_column, value, warnings)),
            CanonicalField::Packets => {
                record.packets = Some(coerce_or_zero(raw_column, value, warnings));
            }
            CanonicalField::ConnectionCount => {
                record.connection_count = Some(coerce_or_zero(raw_column, value, warnings));
            }
            CanonicalField::TrafficVolume => {
                record.traffic_volume = Some(match coerce_f64(value) {
                    Some(v) => v,
                    None => {
                        warnings.push(format!(
                            "{} value {} is not numeric; defaulted to 0",
                            raw_column, value
                        ));
                        0.0
                    }
                });
            }
            CanonicalField::Timestamp => {
                record.timestamp = parse_timestamp_value(value);
                if record.timestamp.is_none() && !is_blank(value) {
                    warnings.push(format!("{} value {} is not a recognizable time; set to null", raw_column, value));
                }
            }
            CanonicalField::Application => {
                record.application = Some(normalize_application(value));
            }
            CanonicalField::SourceSubnet
            | CanonicalField::DestinationSubnet
            | CanonicalField::IsKnownApp
            | CanonicalField::LastSeen => {
                debug!("ignoring input column '{}' for derived field {}", raw_column, field);
            }
        }
    }
}

impl Normalizer for DefaultNormalizer {
    fn normalize(&self, row: &RawRecord, mapping: &FieldMapping) -> Result<NormalizedRow> {
        if row.values().all(is_blank) {
            return Err(IngestError::field("*", "row has no values"));
        }

        let mut record = CanonicalRecord::default();
        let mut warnings = Vec::new();
        let mut has_application = false;
        let mut has_source_ip = false;
        let mut has_destination_ip = false;

        for column in &mapping.columns {
            let value = row.get(&column.raw).unwrap_or(&Value::Null);
            match CanonicalField::from_name(&column.target) {
                Some(field) => {
                    match field {
                        CanonicalField::Application => has_application = true,
                        CanonicalField::SourceIp => has_source_ip = true,
                        CanonicalField::DestinationIp => has_destination_ip = true,
                        _ => {}
                    }
                    self.apply_field(&mut record, field, &column.raw, value, &mut warnings);
                }
                None => {
                    record
                        .extra
                        .insert(column.target.clone(), FieldValue::from_json(value));
                }
            }
        }

        if has_source_ip {
            record.source_subnet = Some(derive_subnet(record.source_ip.as_deref()));
        }
        if has_destination_ip {
            record.destination_subnet = Some(derive_subnet(record.destination_ip.as_deref()));
        }
        if has_application {
            record.is_known_app = record.application.as_deref().is_some_and(|a| a != UNKNOWN);
        }

        metrics::normalize::record_normalized();
        Ok(NormalizedRow { record, warnings })
    }
}

/// Column set of a normalized batch: mapped targets in order (derived names dropped),
/// followed by the derived columns the mapped ones imply.
pub fn batch_columns(mapping: &FieldMapping) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for target in mapping.target_columns() {
        let derived = CanonicalField::from_name(&target).is_some_and(|f| f.is_derived());
        if !derived && !columns.contains(&target) {
            columns.push(target);
        }
    }
    let implied = [
        (CanonicalField::SourceIp, CanonicalField::SourceSubnet),
        (CanonicalField::DestinationIp, CanonicalField::DestinationSubnet),
        (CanonicalField::Application, CanonicalField::IsKnownApp),
    ];
    for (source, derived) in implied {
        if columns.iter().any(|c| c == source.name()) {
            columns.push(derived.name().to_string());
        }
    }
    columns
}

/// /24 for IPv4, /64 for IPv6, "unknown" when the address does not parse
pub fn derive_subnet(ip: Option<&str>) -> String {
    match ip.map(str::trim).and_then(|s| s.parse::<IpAddr>().ok()) {
        Some(IpAddr::V4(v4)) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        Some(IpAddr::V6(v6)) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", s[0], s[1], s[2], s[3])
        }
        None => UNKNOWN.to_string(),
    }
}

pub fn normalize_application(value: &Value) -> String {
    match text_of(value) {
        Some(app) if !APPLICATION_SENTINELS.contains(&app.to_lowercase().as_str()) => app,
        _ => UNKNOWN.to_string(),
    }
}

/// Epoch seconds (9-10 digits) or milliseconds (12-13 digits), optional fraction
static EPOCH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{9,10}|\d{12,13})(\.\d+)?$").expect("epoch pattern is valid"));

/// Parse the time formats seen in flow exports. Numbers are epoch seconds, or
/// milliseconds when too large to be seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    if EPOCH_PATTERN.is_match(s) {
        return s.parse::<f64>().ok().and_then(epoch_to_datetime);
    }
    None
}

pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

/// Resolve a typed value to an instant: timestamps as-is, text through the parser
pub fn field_value_timestamp(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Timestamp(ts) => Some(*ts),
        FieldValue::Text(s) => parse_timestamp(s),
        FieldValue::Int(v) => epoch_to_datetime(*v as f64),
        FieldValue::Float(v) => epoch_to_datetime(*v),
        _ => None,
    }
}

fn epoch_to_datetime(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value > 1e12 { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        other => Some(other.to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
            if cleaned.is_empty() {
                Some(0.0)
            } else {
                cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
        _ => None,
    }
}

/// Integer coercion where anything unusable becomes 0 and leaves a warning behind
fn coerce_or_zero(raw_column: &str, value: &Value, warnings: &mut Vec<String>) -> i64 {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return i;
        }
    }
    match coerce_f64(value) {
        Some(v) => v.round() as i64,
        None => {
            metrics::normalize::field_defaulted(raw_column);
            warnings.push(format!("{} value {} is not numeric; defaulted to 0", raw_column, value));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::canonicalize::FieldCanonicalizer;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn row(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn normalize_one(value: Value) -> NormalizedRow {
        let raw = RawBatch::from_rows(vec![row(value)]);
        let mapping = FieldCanonicalizer::new().canonicalize(&raw.columns);
        DefaultNormalizer::new().normalize(&raw.rows[0], &mapping).unwrap()
    }

    #[test]
    fn test_basic_flow_row() {
        let out = normalize_one(json!({
            "src": "10.0.0.1",
            "dst": "10.0.0.2",
            "protocol": " tcp ",
            "port": "80",
            "application": "",
            "bytes": "100"
        }));
        let r = out.record;
        assert_eq!(r.protocol.as_deref(), Some("TCP"));
        assert_eq!(r.port, Some(80));
        assert_eq!(r.bytes, Some(100));
        assert_eq!(r.application.as_deref(), Some("unknown"));
        assert!(!r.is_known_app);
        assert_eq!(r.source_subnet.as_deref(), Some("10.0.0.0/24"));
        assert_eq!(r.destination_subnet.as_deref(), Some("10.0.0.0/24"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_bad_port_coerces_to_zero_with_warning() {
        let out = normalize_one(json!({"src": "10.0.0.1", "port": "abc"}));
        assert_eq!(out.record.port, Some(0));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("port"));
    }

    #[test]
    fn test_application_sentinels() {
        for sentinel in ["N/A", "none", "-", "Undefined", "NULL", "  "] {
            assert_eq!(normalize_application(&json!(sentinel)), "unknown");
        }
        assert_eq!(normalize_application(&Value::Null), "unknown");
        assert_eq!(normalize_application(&json!("ssh")), "ssh");

        let out = normalize_one(json!({"src": "10.0.0.1", "application": "HTTPS"}));
        assert!(out.record.is_known_app);
    }

    #[test]
    fn test_unparsable_ip_gets_unknown_subnet() {
        let out = normalize_one(json!({"src": "not-an-ip", "dst": "fe80::1:2"}));
        assert_eq!(out.record.source_subnet.as_deref(), Some("unknown"));
        assert_eq!(out.record.destination_subnet.as_deref(), Some("fe80:0:0:0::/64"));
    }

    #[test]
    fn test_timestamp_formats() {
        let ts = parse_timestamp("2024-03-01 12:30:00").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day(), ts.hour(), ts.minute()), (2024, 3, 1, 12, 30));
        assert!(parse_timestamp("2024-03-01T12:30:00Z").is_some());
        assert!(parse_timestamp("03/01/2024 12:30:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert_eq!(parse_timestamp("1700000000").unwrap().timestamp(), 1_700_000_000);
        assert_eq!(parse_timestamp("1700000000000").unwrap().timestamp(), 1_700_000_000);
        assert!(parse_timestamp("yesterday-ish").is_none());
        assert!(parse_timestamp("42").is_none());
    }

    #[test]
    fn test_bad_timestamp_is_null_with_warning() {
        let out = normalize_one(json!({"src": "10.0.0.1", "timestamp": "soon"}));
        assert!(out.record.timestamp.is_none());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_unmapped_columns_go_to_extra() {
        let out = normalize_one(json!({"src": "10.0.0.1", "vlan": 12, "note": " x "}));
        assert_eq!(out.record.extra.get("vlan"), Some(&FieldValue::Int(12)));
        assert_eq!(out.record.extra.get("note"), Some(&FieldValue::Text("x".to_string())));
    }

    #[test]
    fn test_counters_accept_separators_and_nulls() {
        let out = normalize_one(json!({"src": "10.0.0.1", "bytes": "1,024", "packets": null}));
        assert_eq!(out.record.bytes, Some(1024));
        assert_eq!(out.record.packets, Some(0));
    }

    #[test]
    fn test_blank_row_is_dropped_and_batch_continues() {
        let raw = RawBatch::from_rows(vec![
            row(json!({"src": "10.0.0.1", "port": 22})),
            row(json!({"src": "", "port": null})),
        ]);
        let mapping = FieldCanonicalizer::new().canonicalize(&raw.columns);
        let out = DefaultNormalizer::new().normalize_batch(&raw, &mapping);
        assert_eq!(out.batch.len(), 1);
        assert_eq!(out.dropped_rows, 1);
        assert_eq!(
            out.batch.columns,
            vec!["source_ip", "port", "source_subnet"]
        );
    }
}
