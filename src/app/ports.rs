use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::pipeline::ingestion::BatchFormat;
use crate::pipeline::processor::ProcessingStatus;

/// One payload picked up by an intake adapter
#[derive(Clone, Debug)]
pub struct IntakeItem {
    /// Stable identifier, used as the batch source identifier
    pub id: String,
    pub format: BatchFormat,
    pub bytes: Vec<u8>,
}

// Intake-side ports
#[async_trait]
pub trait IntakePort: Send + Sync {
    /// Payloads waiting to be processed, in a stable order
    async fn poll(&self) -> Result<Vec<IntakeItem>>;
    /// Report the outcome so the adapter can route the payload
    async fn acknowledge(&self, item: &IntakeItem, status: ProcessingStatus) -> Result<()>;
}

// Export-side ports
#[async_trait]
pub trait SnapshotExportPort: Send + Sync {
    /// Write the snapshot rows, returning how many were written
    async fn export(&self, rows: &[Map<String, Value>]) -> Result<usize>;
}
