//! Smart-upsert merge: combines a stored record with an incoming one field by field.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::{CanonicalField, CanonicalRecord, FieldValue};
use crate::pipeline::processing::change_detect::{ChangeSet, ChangeType};
use crate::pipeline::processing::normalize::field_value_timestamp;
use crate::pipeline::storage::fingerprint::KEY_FIELDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Only ever fill a gap
    FillIfMissing,
    /// Traffic counters: stored + incoming
    Accumulate,
    /// Chronologically later value wins
    LatestWins,
    /// Take the incoming value when the change is significant
    OverwriteIfSignificant,
    /// Never change once set
    Retain,
}

const COUNTER_PATTERNS: &[&str] = &["bytes", "packets", "traffic_volume", "connection_count"];
const TEMPORAL_PATTERNS: &[&str] = &["timestamp", "time", "date", "seen"];

/// Field → merge policy, resolved once when the processor is built
#[derive(Debug, Clone)]
pub struct MergePolicyTable {
    explicit: HashMap<String, MergePolicy>,
    fallback: MergePolicy,
}

impl Default for MergePolicyTable {
    fn default() -> Self {
        let mut explicit = HashMap::new();
        for field in KEY_FIELDS {
            explicit.insert(field.name().to_string(), MergePolicy::Retain);
        }
        for field in CanonicalField::ALL {
            let policy = if field.is_counter() {
                MergePolicy::Accumulate
            } else if matches!(field, CanonicalField::Timestamp | CanonicalField::LastSeen) {
                MergePolicy::LatestWins
            } else if field.is_derived() {
                MergePolicy::FillIfMissing
            } else {
                continue;
            };
            explicit.insert(field.name().to_string(), policy);
        }
        Self {
            explicit,
            fallback: MergePolicy::OverwriteIfSignificant,
        }
    }
}

impl MergePolicyTable {
    pub fn with_policy(mut self, field: &str, policy: MergePolicy) -> Self {
        self.explicit.insert(field.to_string(), policy);
        self
    }

    /// Explicit entry first, then name patterns for pass-through columns
    pub fn policy_for(&self, field: &str) -> MergePolicy {
        if let Some(policy) = self.explicit.get(field) {
            return *policy;
        }
        let lower = field.to_lowercase();
        if COUNTER_PATTERNS.iter().any(|p| lower.contains(p)) {
            MergePolicy::Accumulate
        } else if TEMPORAL_PATTERNS.iter().any(|p| lower.contains(p)) {
            MergePolicy::LatestWins
        } else {
            self.fallback
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeResolver {
    policies: MergePolicyTable,
}

impl MergeResolver {
    pub fn new(policies: MergePolicyTable) -> Self {
        Self { policies }
    }

    pub fn policies(&self) -> &MergePolicyTable {
        &self.policies
    }

    /// Merge `incoming` into `existing`. Precedence per changed field: fill a gap,
    /// accumulate counters, keep the later time, overwrite on significant change,
    /// otherwise retain.
    pub fn merge(
        &self,
        existing: &CanonicalRecord,
        incoming: &CanonicalRecord,
        changes: &ChangeSet,
        now: DateTime<Utc>,
    ) -> CanonicalRecord {
        let mut merged = existing.clone();
        let mut temporal_touched = false;

        for change in changes.iter() {
            let policy = self.policies.policy_for(&change.field);
            if policy == MergePolicy::LatestWins {
                temporal_touched = true;
            }

            if change.change_type == ChangeType::Addition && change.old_value.is_null() {
                merged.set_by_name(&change.field, change.new_value.clone());
                continue;
            }

            match policy {
                MergePolicy::Accumulate => {
                    merged.set_by_name(&change.field, accumulate(&change.old_value, &change.new_value));
                }
                MergePolicy::LatestWins => {
                    let old = field_value_timestamp(&change.old_value);
                    let new = field_value_timestamp(&change.new_value);
                    if let (Some(old), Some(new)) = (old, new) {
                        if new > old {
                            merged.set_by_name(&change.field, change.new_value.clone());
                        }
                    }
                }
                MergePolicy::OverwriteIfSignificant => {
                    if change.change_type == ChangeType::Significant {
                        merged.set_by_name(&change.field, change.new_value.clone());
                    }
                }
                MergePolicy::FillIfMissing | MergePolicy::Retain => {}
            }
        }

        // Counters carried unchanged are still fresh traffic for this flow
        for (name, value) in incoming.data_fields() {
            if changes.get(&name).is_none() && self.policies.policy_for(&name) == MergePolicy::Accumulate {
                let current = merged.get_by_name(&name);
                merged.set_by_name(&name, accumulate(&current, &value));
            }
        }

        if temporal_touched {
            merged.last_seen = Some(now);
        }
        merged
    }
}

/// Numeric sum where nulls and non-numbers count as 0. Stays integral when both sides are.
fn accumulate(existing: &FieldValue, incoming: &FieldValue) -> FieldValue {
    let is_float = matches!(existing, FieldValue::Float(_)) || matches!(incoming, FieldValue::Float(_));
    if is_float {
        FieldValue::Float(existing.as_f64().unwrap_or(0.0) + incoming.as_f64().unwrap_or(0.0))
    } else {
        let a = if existing.is_numeric() { existing.as_i64().unwrap_or(0) } else { 0 };
        let b = if incoming.is_numeric() { incoming.as_i64().unwrap_or(0) } else { 0 };
        FieldValue::Int(a.saturating_add(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::change_detect::ChangeDetector;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn flow() -> CanonicalRecord {
        CanonicalRecord {
            source_ip: Some("10.0.0.1".to_string()),
            protocol: Some("TCP".to_string()),
            port: Some(443),
            bytes: Some(100),
            timestamp: Some(at(0)),
            ..Default::default()
        }
    }

    fn merge(existing: &CanonicalRecord, incoming: &CanonicalRecord) -> CanonicalRecord {
        let changes = ChangeDetector::new().detect_changes(existing, incoming);
        MergeResolver::default().merge(existing, incoming, &changes, at(59))
    }

    #[test]
    fn test_counters_accumulate_even_when_significant() {
        let mut incoming = flow();
        incoming.bytes = Some(50);
        let merged = merge(&flow(), &incoming);
        assert_eq!(merged.bytes, Some(150));
    }

    #[test]
    fn test_unchanged_counter_still_accumulates() {
        let mut incoming = flow();
        incoming.extra.insert("site".to_string(), FieldValue::Text("dc2".to_string()));
        let merged = merge(&flow(), &incoming);
        assert_eq!(merged.bytes, Some(200));
        assert_eq!(merged.extra.get("site"), Some(&FieldValue::Text("dc2".to_string())));
    }

    #[test]
    fn test_gap_is_filled() {
        let mut existing = flow();
        existing.packets = None;
        let mut incoming = flow();
        incoming.packets = Some(7);
        incoming.bytes = None;
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.packets, Some(7));
        // deletion of a counter leaves the stored total alone
        assert_eq!(merged.bytes, Some(100));
    }

    #[test]
    fn test_timestamp_keeps_later_value_and_refreshes_last_seen() {
        let mut incoming = flow();
        incoming.timestamp = Some(at(3));
        let merged = merge(&flow(), &incoming);
        assert_eq!(merged.timestamp, Some(at(3)));
        assert_eq!(merged.last_seen, Some(at(59)));

        let mut older = flow();
        older.timestamp = Some(at(3));
        let merged = merge(&older, &flow());
        assert_eq!(merged.timestamp, Some(at(3)));
        assert_eq!(merged.last_seen, Some(at(59)));
    }

    #[test]
    fn test_minor_change_never_clobbers() {
        let mut existing = flow();
        existing.source_port = Some(50000);
        let mut incoming = flow();
        incoming.source_port = Some(50001);
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.source_port, Some(50000));
    }

    #[test]
    fn test_significant_change_overwrites() {
        let mut existing = flow();
        existing.extra.insert("rtt_ms".to_string(), FieldValue::Int(10));
        let mut incoming = flow();
        incoming.extra.insert("rtt_ms".to_string(), FieldValue::Int(40));
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.extra.get("rtt_ms"), Some(&FieldValue::Int(40)));
    }

    #[test]
    fn test_plain_modification_is_retained() {
        let mut existing = flow();
        existing.extra.insert("site".to_string(), FieldValue::Text("dc1".to_string()));
        let mut incoming = flow();
        incoming.extra.insert("site".to_string(), FieldValue::Text("dc2".to_string()));
        let merged = merge(&existing, &incoming);
        assert_eq!(merged.extra.get("site"), Some(&FieldValue::Text("dc1".to_string())));
    }

    #[test]
    fn test_policy_table_resolution() {
        let table = MergePolicyTable::default();
        assert_eq!(table.policy_for("bytes"), MergePolicy::Accumulate);
        assert_eq!(table.policy_for("bytes_out"), MergePolicy::Accumulate);
        assert_eq!(table.policy_for("timestamp"), MergePolicy::LatestWins);
        assert_eq!(table.policy_for("flow_end_time"), MergePolicy::LatestWins);
        assert_eq!(table.policy_for("source_ip"), MergePolicy::Retain);
        assert_eq!(table.policy_for("source_subnet"), MergePolicy::FillIfMissing);
        assert_eq!(table.policy_for("vlan"), MergePolicy::OverwriteIfSignificant);

        let table = table.with_policy("vlan", MergePolicy::Retain);
        assert_eq!(table.policy_for("vlan"), MergePolicy::Retain);
    }

    #[test]
    fn test_float_and_int_accumulate() {
        assert_eq!(accumulate(&FieldValue::Int(2), &FieldValue::Int(3)), FieldValue::Int(5));
        assert_eq!(accumulate(&FieldValue::Float(1.5), &FieldValue::Int(1)), FieldValue::Float(2.5));
        assert_eq!(accumulate(&FieldValue::Null, &FieldValue::Text("x".into())), FieldValue::Int(0));
    }
}
