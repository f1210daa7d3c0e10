//! Domain data shapes shared across the ingestion pipeline

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One untyped row as it arrived in a batch
pub type RawRecord = Map<String, Value>;

/// A tabular batch before any schema work: ordered column names plus rows
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub columns: Vec<String>,
    pub rows: Vec<RawRecord>,
}

impl RawBatch {
    /// Build a batch from rows, collecting columns in order of first appearance
    pub fn from_rows(rows: Vec<RawRecord>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Typed scalar carried by canonical records and change sets
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldValue::Int(_) | FieldValue::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() => Some(v.round() as i64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) if s.is_empty() => None,
            other => Some(other.to_string()),
        }
    }

    /// Stable, type-tagged rendering used when hashing record content
    pub fn stable_repr(&self) -> String {
        match self {
            FieldValue::Null => "n:".to_string(),
            FieldValue::Bool(b) => format!("b:{}", b),
            FieldValue::Int(v) => format!("i:{}", v),
            FieldValue::Float(v) => format!("f:{}", v),
            FieldValue::Timestamp(ts) => {
                format!("t:{}", ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
            FieldValue::Text(s) => format!("s:{}", s),
        }
    }

    /// Convert a JSON scalar into a typed value. Nested values are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Text(trimmed.to_string())
                }
            }
            other => FieldValue::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => json!(b),
            FieldValue::Int(v) => json!(v),
            FieldValue::Float(v) => json!(v),
            FieldValue::Timestamp(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            FieldValue::Text(s) => json!(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}

impl From<Option<i64>> for FieldValue {
    fn from(value: Option<i64>) -> Self {
        value.map(FieldValue::Int).unwrap_or(FieldValue::Null)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map(FieldValue::Float).unwrap_or(FieldValue::Null)
    }
}

impl From<Option<DateTime<Utc>>> for FieldValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map(FieldValue::Timestamp).unwrap_or(FieldValue::Null)
    }
}

/// The standard schema every batch is mapped onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    SourceIp,
    DestinationIp,
    Protocol,
    SourcePort,
    Port,
    Bytes,
    Packets,
    TrafficVolume,
    ConnectionCount,
    Timestamp,
    Application,
    SourceSubnet,
    DestinationSubnet,
    IsKnownApp,
    LastSeen,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 15] = [
        CanonicalField::SourceIp,
        CanonicalField::DestinationIp,
        CanonicalField::Protocol,
        CanonicalField::SourcePort,
        CanonicalField::Port,
        CanonicalField::Bytes,
        CanonicalField::Packets,
        CanonicalField::TrafficVolume,
        CanonicalField::ConnectionCount,
        CanonicalField::Timestamp,
        CanonicalField::Application,
        CanonicalField::SourceSubnet,
        CanonicalField::DestinationSubnet,
        CanonicalField::IsKnownApp,
        CanonicalField::LastSeen,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::SourceIp => "source_ip",
            CanonicalField::DestinationIp => "destination_ip",
            CanonicalField::Protocol => "protocol",
            CanonicalField::SourcePort => "source_port",
            CanonicalField::Port => "port",
            CanonicalField::Bytes => "bytes",
            CanonicalField::Packets => "packets",
            CanonicalField::TrafficVolume => "traffic_volume",
            CanonicalField::ConnectionCount => "connection_count",
            CanonicalField::Timestamp => "timestamp",
            CanonicalField::Application => "application",
            CanonicalField::SourceSubnet => "source_subnet",
            CanonicalField::DestinationSubnet => "destination_subnet",
            CanonicalField::IsKnownApp => "is_known_app",
            CanonicalField::LastSeen => "last_seen",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Fields computed by the normalizer or merge step rather than read from input
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            CanonicalField::SourceSubnet
                | CanonicalField::DestinationSubnet
                | CanonicalField::IsKnownApp
                | CanonicalField::LastSeen
        )
    }

    pub fn is_counter(&self) -> bool {
        matches!(
            self,
            CanonicalField::Bytes
                | CanonicalField::Packets
                | CanonicalField::TrafficVolume
                | CanonicalField::ConnectionCount
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A network flow in the standard schema, plus whatever columns could not be mapped
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CanonicalRecord {
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    pub protocol: Option<String>,
    pub source_port: Option<i64>,
    pub port: Option<i64>,
    pub bytes: Option<i64>,
    pub packets: Option<i64>,
    pub traffic_volume: Option<f64>,
    pub connection_count: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub application: Option<String>,
    pub source_subnet: Option<String>,
    pub destination_subnet: Option<String>,
    pub is_known_app: bool,
    /// Refreshed whenever a merge touches a temporal field; not part of the content hash
    pub last_seen: Option<DateTime<Utc>>,
    pub extra: BTreeMap<String, FieldValue>,
}

impl CanonicalRecord {
    pub fn get(&self, field: CanonicalField) -> FieldValue {
        match field {
            CanonicalField::SourceIp => self.source_ip.clone().into(),
            CanonicalField::DestinationIp => self.destination_ip.clone().into(),
            CanonicalField::Protocol => self.protocol.clone().into(),
            CanonicalField::SourcePort => self.source_port.into(),
            CanonicalField::Port => self.port.into(),
            CanonicalField::Bytes => self.bytes.into(),
            CanonicalField::Packets => self.packets.into(),
            CanonicalField::TrafficVolume => self.traffic_volume.into(),
            CanonicalField::ConnectionCount => self.connection_count.into(),
            CanonicalField::Timestamp => self.timestamp.into(),
            CanonicalField::Application => self.application.clone().into(),
            CanonicalField::SourceSubnet => self.source_subnet.clone().into(),
            CanonicalField::DestinationSubnet => self.destination_subnet.clone().into(),
            CanonicalField::IsKnownApp => FieldValue::Bool(self.is_known_app),
            CanonicalField::LastSeen => self.last_seen.into(),
        }
    }

    /// Assign a value, coercing it to the field's native type. Values that cannot be
    /// coerced clear the field.
    pub fn set(&mut self, field: CanonicalField, value: FieldValue) {
        match field {
            CanonicalField::SourceIp => self.source_ip = value.as_text(),
            CanonicalField::DestinationIp => self.destination_ip = value.as_text(),
            CanonicalField::Protocol => self.protocol = value.as_text(),
            CanonicalField::SourcePort => self.source_port = value.as_i64(),
            CanonicalField::Port => self.port = value.as_i64(),
            CanonicalField::Bytes => self.bytes = value.as_i64(),
            CanonicalField::Packets => self.packets = value.as_i64(),
            CanonicalField::TrafficVolume => self.traffic_volume = value.as_f64(),
            CanonicalField::ConnectionCount => self.connection_count = value.as_i64(),
            CanonicalField::Timestamp => self.timestamp = value.as_timestamp(),
            CanonicalField::Application => self.application = value.as_text(),
            CanonicalField::SourceSubnet => self.source_subnet = value.as_text(),
            CanonicalField::DestinationSubnet => self.destination_subnet = value.as_text(),
            CanonicalField::IsKnownApp => {
                self.is_known_app = matches!(value, FieldValue::Bool(true))
            }
            CanonicalField::LastSeen => self.last_seen = value.as_timestamp(),
        }
    }

    pub fn get_by_name(&self, name: &str) -> FieldValue {
        match CanonicalField::from_name(name) {
            Some(field) => self.get(field),
            None => self.extra.get(name).cloned().unwrap_or(FieldValue::Null),
        }
    }

    pub fn set_by_name(&mut self, name: &str, value: FieldValue) {
        match CanonicalField::from_name(name) {
            Some(field) => self.set(field, value),
            None => {
                self.extra.insert(name.to_string(), value);
            }
        }
    }

    /// Non-null data fields keyed by name, excluding the `last_seen` freshness stamp.
    /// This is the view hashed for content identity and diffed by change detection.
    pub fn data_fields(&self) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        for field in CanonicalField::ALL {
            if field == CanonicalField::LastSeen {
                continue;
            }
            let value = self.get(field);
            if !value.is_null() {
                fields.insert(field.name().to_string(), value);
            }
        }
        for (name, value) in &self.extra {
            if !value.is_null() {
                fields.insert(name.clone(), value.clone());
            }
        }
        fields
    }

    /// Flat JSON row: every canonical field (nulls included) followed by extras
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        for field in CanonicalField::ALL {
            row.insert(field.name().to_string(), self.get(field).to_json());
        }
        for (name, value) in &self.extra {
            row.insert(name.clone(), value.to_json());
        }
        row
    }
}

/// Normalized records of one batch together with the batch's column set
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    /// Canonical and pass-through column names present in the batch, in batch order
    pub columns: Vec<String>,
    pub records: Vec<CanonicalRecord>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>, records: Vec<CanonicalRecord>) -> Self {
        Self { columns, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Values of one column across all records, in record order
    pub fn column_values(&self, name: &str) -> Vec<FieldValue> {
        self.records.iter().map(|r| r.get_by_name(name)).collect()
    }
}
