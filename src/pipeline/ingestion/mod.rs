//! Turns raw uploaded bytes into a tabular [`RawBatch`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

use crate::domain::{RawBatch, RawRecord};
use crate::error::{IngestError, Result};

/// Wire formats the core accepts from the intake layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFormat {
    /// A JSON array of objects, or an object wrapping such an array under `records`/`data`/`rows`
    Json,
    /// One JSON object per line
    Ndjson,
}

impl BatchFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(BatchFormat::Json),
            "ndjson" | "jsonl" => Some(BatchFormat::Ndjson),
            _ => None,
        }
    }
}

/// Result of reading a payload: the batch plus rows skipped on the way
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub batch: RawBatch,
    pub skipped_rows: usize,
    pub warnings: Vec<String>,
}

/// Parse a payload. A payload that yields no object rows at all is a format error;
/// individual non-object rows are skipped with a warning.
pub fn parse_batch(bytes: &[u8], format: BatchFormat) -> Result<ParsedBatch> {
    let values = match format {
        BatchFormat::Json => json_rows(bytes)?,
        BatchFormat::Ndjson => ndjson_rows(bytes)?,
    };

    let mut parsed = ParsedBatch::default();
    let mut rows: Vec<RawRecord> = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match value {
            Value::Object(map) => rows.push(map),
            other => {
                let message = format!("row {} is not an object ({}); skipped", index, type_name(&other));
                warn!("{}", message);
                parsed.skipped_rows += 1;
                parsed.warnings.push(message);
            }
        }
    }

    if rows.is_empty() {
        return Err(IngestError::Format("batch contains no rows".to_string()));
    }

    parsed.batch = RawBatch::from_rows(rows);
    Ok(parsed)
}

fn json_rows(bytes: &[u8]) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| IngestError::Format(format!("invalid JSON payload: {}", e)))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["records", "data", "rows"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            // A lone object is a single-row batch
            Ok(vec![Value::Object(map)])
        }
        other => Err(IngestError::Format(format!(
            "expected an array of records, found {}",
            type_name(&other)
        ))),
    }
}

fn ndjson_rows(bytes: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| IngestError::Format(format!("payload is not UTF-8: {}", e)))?;
    let mut rows = Vec::new();
    let mut bad_lines = 0usize;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => rows.push(value),
            Err(e) => {
                bad_lines += 1;
                warn!("NDJSON line {} unparsable: {}", line_no + 1, e);
                rows.push(Value::Null);
            }
        }
    }
    if bad_lines > 0 && bad_lines == rows.len() {
        return Err(IngestError::Format(format!(
            "none of the {} NDJSON lines could be parsed",
            bad_lines
        )));
    }
    Ok(rows)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let parsed = parse_batch(br#"[{"src":"10.0.0.1"},{"src":"10.0.0.2","port":80}]"#, BatchFormat::Json).unwrap();
        assert_eq!(parsed.batch.len(), 2);
        assert_eq!(parsed.batch.columns, vec!["src", "port"]);
        assert_eq!(parsed.skipped_rows, 0);
    }

    #[test]
    fn test_parse_wrapped_json() {
        let parsed = parse_batch(br#"{"records":[{"a":1}]}"#, BatchFormat::Json).unwrap();
        assert_eq!(parsed.batch.len(), 1);
    }

    #[test]
    fn test_non_object_rows_are_skipped() {
        let parsed = parse_batch(br#"[{"a":1}, 5, "x"]"#, BatchFormat::Json).unwrap();
        assert_eq!(parsed.batch.len(), 1);
        assert_eq!(parsed.skipped_rows, 2);
        assert_eq!(parsed.warnings.len(), 2);
    }

    #[test]
    fn test_garbage_is_format_error() {
        let err = parse_batch(b"not json at all", BatchFormat::Json).unwrap_err();
        assert!(matches!(err, IngestError::Format(_)));

        let err = parse_batch(b"[]", BatchFormat::Json).unwrap_err();
        assert!(matches!(err, IngestError::Format(_)));
    }

    #[test]
    fn test_parse_ndjson_tolerates_bad_line() {
        let payload = b"{\"a\":1}\nnot-json\n\n{\"a\":2}\n";
        let parsed = parse_batch(payload, BatchFormat::Ndjson).unwrap();
        assert_eq!(parsed.batch.len(), 2);
        assert_eq!(parsed.skipped_rows, 1);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(BatchFormat::from_path(Path::new("x/flows.JSON")), Some(BatchFormat::Json));
        assert_eq!(BatchFormat::from_path(Path::new("flows.jsonl")), Some(BatchFormat::Ndjson));
        assert_eq!(BatchFormat::from_path(Path::new("flows.csv")), None);
    }
}
