use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::app::ports::SnapshotExportPort;
use crate::error::{IngestError, Result};

/// Writes the store snapshot as NDJSON, one row per line. The file is replaced
/// through a temporary sibling so readers never see a partial snapshot.
pub struct SnapshotExporter {
    path: PathBuf,
}

impl SnapshotExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, rows: &[Map<String, Value>]) -> std::result::Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
        }

        let mut buffer = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buffer, row).map_err(|e| e.to_string())?;
            buffer.push(b'\n');
        }

        let tmp = self.path.with_extension("ndjson.tmp");
        let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| e.to_string())?;
        file.write_all(&buffer).await.map_err(|e| e.to_string())?;
        file.flush().await.map_err(|e| e.to_string())?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SnapshotExportPort for SnapshotExporter {
    async fn export(&self, rows: &[Map<String, Value>]) -> Result<usize> {
        self.write(rows)
            .await
            .map_err(|e| IngestError::Export(format!("{}: {}", self.path.display(), e)))?;
        info!("Wrote {} rows to {}", rows.len(), self.path.display());
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_writes_ndjson() {
        let dir = TempDir::new().unwrap();
        let exporter = SnapshotExporter::new(dir.path().join("out/snapshot.ndjson"));
        let row = json!({"source_ip": "10.0.0.1", "_update_count": 0});
        let rows = vec![row.as_object().unwrap().clone(); 2];

        assert_eq!(exporter.export(&rows).await.unwrap(), 2);
        let content = std::fs::read_to_string(exporter.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["source_ip"], "10.0.0.1");
    }

    #[tokio::test]
    async fn test_unwritable_target_is_export_error() {
        let dir = TempDir::new().unwrap();
        // a directory sits where the file should go
        let target = dir.path().join("taken");
        std::fs::create_dir_all(target.join("x")).unwrap();
        let err = SnapshotExporter::new(&target).export(&[]).await.unwrap_err();
        assert!(matches!(err, IngestError::Export(_)));
    }
}
