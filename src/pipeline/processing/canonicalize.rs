//! Maps arbitrary source column names onto the canonical flow schema.

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::domain::CanonicalField;

/// Short names that only match when they are the whole (normalized) column name
static EXACT_ALIASES: &[(CanonicalField, &[&str])] = &[
    (CanonicalField::SourceIp, &["src", "source", "sip", "saddr"]),
    (CanonicalField::DestinationIp, &["dst", "dest", "destination", "dip", "daddr"]),
];

/// Canonical field → aliases, in precedence order. When a column matches several
/// fields, the one listed first wins.
static ALIAS_TABLE: Lazy<Vec<(CanonicalField, Vec<String>)>> = Lazy::new(|| {
    let table: &[(CanonicalField, &[&str])] = &[
        (
            CanonicalField::SourceIp,
            &["source_ip", "src_ip", "source_address", "src_addr", "client_ip", "orig_h", "local_address"],
        ),
        (
            CanonicalField::DestinationIp,
            &[
                "destination_ip",
                "dest_ip",
                "dst_ip",
                "destination_address",
                "dest_addr",
                "dst_addr",
                "server_ip",
                "remote_address",
                "resp_h",
            ],
        ),
        (CanonicalField::Protocol, &["protocol", "proto", "ip_proto"]),
        (CanonicalField::SourcePort, &["source_port", "src_port", "sport", "client_port"]),
        (CanonicalField::Port, &["destination_port", "dest_port", "dst_port", "dport", "port"]),
        (CanonicalField::Bytes, &["bytes", "octets", "byte_count"]),
        (CanonicalField::Packets, &["packets", "pkts", "packet_count"]),
        (CanonicalField::TrafficVolume, &["traffic_volume", "volume", "throughput"]),
        (CanonicalField::ConnectionCount, &["connection_count", "connections", "conn_count", "sessions"]),
        (
            CanonicalField::Timestamp,
            &["timestamp", "datetime", "event_time", "start_time", "time", "date"],
        ),
        (CanonicalField::Application, &["application", "app_name", "app", "service"]),
    ];
    table
        .iter()
        .map(|(field, aliases)| (*field, aliases.iter().map(|a| normalize_name(a)).collect()))
        .collect()
});

/// Lower-case and strip everything that is not a letter or digit
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn is_exact_alias(field: CanonicalField, normalized: &str) -> bool {
    EXACT_ALIASES
        .iter()
        .any(|(f, names)| *f == field && names.contains(&normalized))
}

/// How one raw column was resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMapping {
    pub raw: String,
    pub target: String,
    pub matched: bool,
}

/// Raw → canonical mapping for a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldMapping {
    pub columns: Vec<ColumnMapping>,
    pub mapped: usize,
    pub total: usize,
    /// mapped / total, 0 for an empty column list
    pub confidence: f64,
}

impl FieldMapping {
    pub fn target_for(&self, raw: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.raw == raw)
            .map(|c| c.target.as_str())
    }

    /// Mapped column names in batch order
    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.target.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FieldCanonicalizer;

impl FieldCanonicalizer {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every column against the alias table. Each column only considers its
    /// first matching canonical field; if an earlier column already claimed that field
    /// the column passes through unchanged.
    pub fn canonicalize(&self, columns: &[String]) -> FieldMapping {
        let mut claimed: Vec<CanonicalField> = Vec::new();
        let mut mapping = FieldMapping {
            total: columns.len(),
            ..Default::default()
        };

        for raw in columns {
            let normalized = normalize_name(raw);
            let target = ALIAS_TABLE
                .iter()
                .find(|(field, aliases)| {
                    !normalized.is_empty()
                        && (is_exact_alias(*field, &normalized)
                            || aliases.iter().any(|alias| normalized.contains(alias.as_str())))
                })
                .map(|(field, _)| *field)
                .filter(|field| !claimed.contains(field));

            match target {
                Some(field) => {
                    claimed.push(field);
                    mapping.mapped += 1;
                    mapping.columns.push(ColumnMapping {
                        raw: raw.clone(),
                        target: field.name().to_string(),
                        matched: true,
                    });
                }
                None => mapping.columns.push(ColumnMapping {
                    raw: raw.clone(),
                    target: raw.clone(),
                    matched: false,
                }),
            }
        }

        mapping.confidence = if mapping.total == 0 {
            0.0
        } else {
            mapping.mapped as f64 / mapping.total as f64
        };
        mapping
    }

    /// Mapping used when field mapping is disabled: every column keeps its name and
    /// only exact canonical names count as mapped.
    pub fn identity(&self, columns: &[String]) -> FieldMapping {
        let columns_mapped: Vec<ColumnMapping> = columns
            .iter()
            .map(|raw| ColumnMapping {
                raw: raw.clone(),
                target: raw.clone(),
                matched: CanonicalField::from_name(raw).is_some(),
            })
            .collect();
        let mapped = columns_mapped.iter().filter(|c| c.matched).count();
        let total = columns.len();
        FieldMapping {
            columns: columns_mapped,
            mapped,
            total,
            confidence: if total == 0 { 0.0 } else { mapped as f64 / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_common_aliases() {
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&[
            "Source IP",
            "Dst-Addr",
            "PROTO",
            "Destination Port",
            "Total Bytes",
            "Event Time",
            "App Name",
        ]));
        assert_eq!(mapping.target_for("Source IP"), Some("source_ip"));
        assert_eq!(mapping.target_for("Dst-Addr"), Some("destination_ip"));
        assert_eq!(mapping.target_for("PROTO"), Some("protocol"));
        assert_eq!(mapping.target_for("Destination Port"), Some("port"));
        assert_eq!(mapping.target_for("Total Bytes"), Some("bytes"));
        assert_eq!(mapping.target_for("Event Time"), Some("timestamp"));
        assert_eq!(mapping.target_for("App Name"), Some("application"));
        assert_eq!(mapping.confidence, 1.0);
    }

    #[test]
    fn test_short_names_match_only_exactly() {
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&["src", "DST", "srcnode"]));
        assert_eq!(mapping.target_for("src"), Some("source_ip"));
        assert_eq!(mapping.target_for("DST"), Some("destination_ip"));
        assert_eq!(mapping.target_for("srcnode"), Some("srcnode"));
    }

    #[test]
    fn test_unmatched_columns_pass_through() {
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&["src_ip", "vlan_id"]));
        assert_eq!(mapping.target_for("vlan_id"), Some("vlan_id"));
        assert_eq!(mapping.mapped, 1);
        assert_eq!(mapping.confidence, 0.5);
    }

    #[test]
    fn test_earliest_defined_field_wins() {
        // "src_port" contains no ip alias, so it resolves before the generic port entry
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&["src_port", "dst_port"]));
        assert_eq!(mapping.target_for("src_port"), Some("source_port"));
        assert_eq!(mapping.target_for("dst_port"), Some("port"));

        // matches both protocol ("proto") and port ("port"); protocol is listed first
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&["proto_port"]));
        assert_eq!(mapping.target_for("proto_port"), Some("protocol"));
    }

    #[test]
    fn test_claimed_field_is_not_reassigned() {
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&["bytes_in", "bytes_out"]));
        assert_eq!(mapping.target_for("bytes_in"), Some("bytes"));
        assert_eq!(mapping.target_for("bytes_out"), Some("bytes_out"));

        // first match is protocol, already taken; no fall-through to port
        let mapping = FieldCanonicalizer::new().canonicalize(&cols(&["protocol", "proto_port"]));
        assert_eq!(mapping.target_for("protocol"), Some("protocol"));
        assert_eq!(mapping.target_for("proto_port"), Some("proto_port"));
        assert_eq!(mapping.mapped, 1);
    }

    #[test]
    fn test_empty_columns_have_zero_confidence() {
        let mapping = FieldCanonicalizer::new().canonicalize(&[]);
        assert_eq!(mapping.confidence, 0.0);
    }

    #[test]
    fn test_identity_mapping() {
        let mapping = FieldCanonicalizer::new().identity(&cols(&["source_ip", "Src IP"]));
        assert_eq!(mapping.target_for("Src IP"), Some("Src IP"));
        assert_eq!(mapping.mapped, 1);
    }
}
