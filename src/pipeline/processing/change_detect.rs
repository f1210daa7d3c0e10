//! Field-level diff between a stored record and an incoming one.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::domain::{CanonicalRecord, FieldValue};

/// Relative change above which a numeric difference counts as significant
pub const DEFAULT_SIGNIFICANCE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Present only in the incoming record
    Addition,
    /// Present only in the stored record
    Deletion,
    /// Numeric change beyond the significance threshold
    Significant,
    /// Numeric change within the threshold
    Minor,
    /// Non-numeric value change
    Modification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
    pub change_type: ChangeType,
}

/// Field-level differences between a stored record and an incoming one, in field-name order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    threshold: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_SIGNIFICANCE_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Diff over the union of data fields; nulls count as absent.
    pub fn detect_changes(&self, existing: &CanonicalRecord, incoming: &CanonicalRecord) -> ChangeSet {
        let old_fields = existing.data_fields();
        let new_fields = incoming.data_fields();
        let names: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();

        let mut changes = Vec::new();
        for name in names {
            let change = match (old_fields.get(name), new_fields.get(name)) {
                (None, Some(new)) => Some((FieldValue::Null, new.clone(), ChangeType::Addition)),
                (Some(old), None) => Some((old.clone(), FieldValue::Null, ChangeType::Deletion)),
                (Some(old), Some(new)) => self
                    .classify(old, new)
                    .map(|change_type| (old.clone(), new.clone(), change_type)),
                (None, None) => None,
            };
            if let Some((old_value, new_value, change_type)) = change {
                changes.push(FieldChange {
                    field: name.clone(),
                    old_value,
                    new_value,
                    change_type,
                });
            }
        }
        ChangeSet { changes }
    }

    /// `None` when the values are equal
    fn classify(&self, old: &FieldValue, new: &FieldValue) -> Option<ChangeType> {
        if let (Some(a), Some(b)) = (old.as_f64(), new.as_f64()) {
            if a == b {
                return None;
            }
            let significant = a != 0.0 && (b - a).abs() / a.abs() > self.threshold;
            return Some(if significant {
                ChangeType::Significant
            } else {
                ChangeType::Minor
            });
        }
        (old != new).then_some(ChangeType::Modification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CanonicalRecord {
        CanonicalRecord {
            source_ip: Some("10.0.0.1".to_string()),
            protocol: Some("TCP".to_string()),
            bytes: Some(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_records_have_no_changes() {
        let set = ChangeDetector::new().detect_changes(&base(), &base());
        assert!(!set.has_changes());
    }

    #[test]
    fn test_numeric_significance() {
        let detector = ChangeDetector::new();
        let mut incoming = base();
        incoming.bytes = Some(150);
        let set = detector.detect_changes(&base(), &incoming);
        assert_eq!(set.get("bytes").unwrap().change_type, ChangeType::Significant);

        incoming.bytes = Some(105);
        let set = detector.detect_changes(&base(), &incoming);
        assert_eq!(set.get("bytes").unwrap().change_type, ChangeType::Minor);

        // exactly 10% is not beyond the threshold
        incoming.bytes = Some(110);
        let set = detector.detect_changes(&base(), &incoming);
        assert_eq!(set.get("bytes").unwrap().change_type, ChangeType::Minor);
    }

    #[test]
    fn test_change_from_zero_is_minor() {
        let mut existing = base();
        existing.bytes = Some(0);
        let set = ChangeDetector::new().detect_changes(&existing, &base());
        assert_eq!(set.get("bytes").unwrap().change_type, ChangeType::Minor);
    }

    #[test]
    fn test_addition_deletion_modification() {
        let mut existing = base();
        existing.extra.insert("site".to_string(), FieldValue::Text("dc1".to_string()));
        let mut incoming = base();
        incoming.protocol = Some("UDP".to_string());
        incoming.packets = Some(3);

        let set = ChangeDetector::new().detect_changes(&existing, &incoming);
        assert_eq!(set.get("packets").unwrap().change_type, ChangeType::Addition);
        assert_eq!(set.get("site").unwrap().change_type, ChangeType::Deletion);
        assert_eq!(set.get("protocol").unwrap().change_type, ChangeType::Modification);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_custom_threshold() {
        let mut incoming = base();
        incoming.bytes = Some(105);
        let set = ChangeDetector::with_threshold(0.01).detect_changes(&base(), &incoming);
        assert_eq!(set.get("bytes").unwrap().change_type, ChangeType::Significant);
    }
}
