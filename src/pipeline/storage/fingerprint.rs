use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::domain::{CanonicalField, CanonicalRecord};

/// Fields that identify "the same logical flow"
pub const KEY_FIELDS: [CanonicalField; 5] = [
    CanonicalField::SourceIp,
    CanonicalField::DestinationIp,
    CanonicalField::Protocol,
    CanonicalField::Port,
    CanonicalField::Application,
];

/// Deterministic fingerprint of a record's identity fields and time bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Index of the fixed-width window containing `ts`. Windows are aligned to the epoch,
/// so two instants share a bucket only if they fall in the same aligned interval.
pub fn time_bucket(ts: Option<DateTime<Utc>>, window_minutes: i64) -> Option<i64> {
    let window_secs = window_minutes.max(1) * 60;
    ts.map(|t| t.timestamp().div_euclid(window_secs))
}

/// Records without a timestamp all fall into one "untimed" bucket per identity.
pub fn compute_record_key(record: &CanonicalRecord, window_minutes: i64) -> RecordKey {
    // Simple canonical string; versioned so the layout can evolve
    let mut s = String::from("key-v1");
    for field in KEY_FIELDS {
        s.push('|');
        s.push_str(&record.get(field).stable_repr());
    }
    s.push('|');
    match time_bucket(record.timestamp, window_minutes) {
        Some(bucket) => s.push_str(&format!("w{}:{}", window_minutes.max(1), bucket)),
        None => s.push_str("untimed"),
    }
    RecordKey(sha256_hex(&s))
}

/// Hash of the record's data fields only. Store metadata and `last_seen` never
/// participate, so resubmitting identical content yields an identical hash.
pub fn compute_content_hash(record: &CanonicalRecord) -> String {
    let mut s = String::from("content-v1");
    for (name, value) in record.data_fields() {
        s.push('\n');
        s.push_str(&name);
        s.push('=');
        s.push_str(&value.stable_repr());
    }
    sha256_hex(&s)
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
