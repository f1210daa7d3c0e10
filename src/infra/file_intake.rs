use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::app::ports::{IntakeItem, IntakePort};
use crate::config::IntakeConfig;
use crate::error::Result;
use crate::pipeline::ingestion::BatchFormat;
use crate::pipeline::processor::ProcessingStatus;

/// Inbox folder adapter. Picks up `.json` / `.ndjson` / `.jsonl` files and, once
/// acknowledged, moves each one into the processed or failed folder.
pub struct DirectoryIntake {
    inbox_dir: PathBuf,
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl DirectoryIntake {
    pub fn new(config: &IntakeConfig) -> Self {
        Self {
            inbox_dir: config.inbox_dir.clone(),
            processed_dir: config.processed_dir.clone(),
            failed_dir: config.failed_dir.clone(),
        }
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }

    async fn list_inbox(&self) -> Result<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.inbox_dir).await? {
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(&self.inbox_dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && BatchFormat::from_path(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl IntakePort for DirectoryIntake {
    async fn poll(&self) -> Result<Vec<IntakeItem>> {
        let mut items = Vec::new();
        for path in self.list_inbox().await? {
            let Some(format) = BatchFormat::from_path(&path) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            debug!("Picked up {} ({} bytes)", path.display(), bytes.len());
            items.push(IntakeItem {
                id: path.display().to_string(),
                format,
                bytes,
            });
        }
        if !items.is_empty() {
            info!("Found {} file(s) in {}", items.len(), self.inbox_dir.display());
        }
        Ok(items)
    }

    async fn acknowledge(&self, item: &IntakeItem, status: ProcessingStatus) -> Result<()> {
        let source = PathBuf::from(&item.id);
        let target_dir = match status {
            ProcessingStatus::Completed => &self.processed_dir,
            ProcessingStatus::Error => &self.failed_dir,
        };
        tokio::fs::create_dir_all(target_dir).await?;

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch".to_string());
        let mut target = target_dir.join(&file_name);
        if tokio::fs::try_exists(&target).await? {
            target = target_dir.join(format!("{}.{}", Utc::now().format("%Y%m%dT%H%M%S%3f"), file_name));
        }

        tokio::fs::rename(&source, &target).await?;
        info!("Moved {} to {} ({})", source.display(), target.display(), status.as_str());
        Ok(())
    }
}
