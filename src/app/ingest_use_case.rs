use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::app::ports::{IntakePort, SnapshotExportPort};
use crate::config::AppConfig;
use crate::domain::RawBatch;
use crate::error::Result;
use crate::observability::LogEntry;
use crate::pipeline::ingestion::BatchFormat;
use crate::pipeline::processor::{DataProcessor, ProcessingResult};
use crate::pipeline::storage::StoreSummary;

/// Async entry point for batch submission. Submissions from concurrent callers are
/// serialized onto the single processor, so every batch sees the store exactly as
/// the previous batch left it.
#[derive(Clone)]
pub struct IngestService {
    processor: Arc<Mutex<DataProcessor>>,
}

impl IngestService {
    pub fn new(processor: DataProcessor) -> Self {
        Self {
            processor: Arc::new(Mutex::new(processor)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(DataProcessor::from_config(config)?))
    }

    pub async fn submit(&self, batch: RawBatch, source_identifier: &str) -> ProcessingResult {
        let mut processor = self.processor.lock().await;
        processor.process_batch(batch, source_identifier)
    }

    pub async fn submit_bytes(&self, bytes: &[u8], format: BatchFormat, source_identifier: &str) -> ProcessingResult {
        let mut processor = self.processor.lock().await;
        processor.process_bytes(bytes, format, source_identifier)
    }

    /// Process everything the intake currently offers, acknowledging each item.
    /// A failed acknowledgement is logged and does not stop the drain; the item is
    /// offered again on the next poll.
    pub async fn drain_intake(&self, intake: &dyn IntakePort) -> Result<Vec<ProcessingResult>> {
        let items = intake.poll().await?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let result = self.submit_bytes(&item.bytes, item.format, &item.id).await;
            if !result.is_completed() {
                warn!("Batch {} from {} rejected: {:?}", result.batch_id, item.id, result.errors);
            }
            if let Err(e) = intake.acknowledge(&item, result.status).await {
                error!("Failed to acknowledge {} ({}): {}", item.id, result.status.as_str(), e);
            }
            results.push(result);
        }
        Ok(results)
    }

    pub async fn export_snapshot(&self, exporter: &dyn SnapshotExportPort) -> Result<usize> {
        let rows = {
            let processor = self.processor.lock().await;
            processor.export_snapshot_rows()?
        };
        let written = exporter.export(&rows).await?;
        info!("Exported {} snapshot rows", written);
        Ok(written)
    }

    pub async fn summary(&self) -> Result<StoreSummary> {
        self.processor.lock().await.store_summary()
    }

    pub async fn recent_log(&self, n: usize) -> Vec<LogEntry> {
        self.processor.lock().await.log().recent(n).to_vec()
    }

    pub async fn reset(&self) {
        self.processor.lock().await.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::IntakeItem;
    use crate::error::IngestError;
    use crate::pipeline::processor::ProcessingStatus;
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    struct MockIntake {
        items: Vec<IntakeItem>,
        acked: Arc<Mutex<Vec<(String, ProcessingStatus)>>>,
        fail_ack: bool,
    }

    #[async_trait]
    impl IntakePort for MockIntake {
        async fn poll(&self) -> Result<Vec<IntakeItem>> {
            Ok(self.items.clone())
        }

        async fn acknowledge(&self, item: &IntakeItem, status: ProcessingStatus) -> Result<()> {
            if self.fail_ack {
                return Err(IngestError::Io(std::io::Error::other("inbox is read-only")));
            }
            self.acked.lock().await.push((item.id.clone(), status));
            Ok(())
        }
    }

    struct MockExport {
        rows: Arc<Mutex<Vec<Map<String, Value>>>>,
    }

    #[async_trait]
    impl SnapshotExportPort for MockExport {
        async fn export(&self, rows: &[Map<String, Value>]) -> Result<usize> {
            self.rows.lock().await.extend_from_slice(rows);
            Ok(rows.len())
        }
    }

    #[tokio::test]
    async fn test_drain_intake_routes_by_status() {
        let service = IngestService::from_config(&AppConfig::default()).unwrap();
        let acked = Arc::new(Mutex::new(Vec::new()));
        let intake = MockIntake {
            items: vec![
                IntakeItem {
                    id: "good.ndjson".to_string(),
                    format: BatchFormat::Ndjson,
                    bytes: b"{\"src\":\"10.0.0.1\",\"dst\":\"10.0.0.2\",\"bytes\":10}\n".to_vec(),
                },
                IntakeItem {
                    id: "bad.json".to_string(),
                    format: BatchFormat::Json,
                    bytes: b"[]".to_vec(),
                },
            ],
            acked: acked.clone(),
            fail_ack: false,
        };

        let results = service.drain_intake(&intake).await.unwrap();
        assert_eq!(results.len(), 2);
        let acked = acked.lock().await;
        assert_eq!(acked[0], ("good.ndjson".to_string(), ProcessingStatus::Completed));
        assert_eq!(acked[1], ("bad.json".to_string(), ProcessingStatus::Error));
        assert_eq!(service.summary().await.unwrap().total_records, 1);
    }

    #[tokio::test]
    async fn test_failed_acknowledge_does_not_stop_drain() {
        let service = IngestService::from_config(&AppConfig::default()).unwrap();
        let items = ["a.json", "b.json"]
            .iter()
            .enumerate()
            .map(|(i, id)| IntakeItem {
                id: id.to_string(),
                format: BatchFormat::Json,
                bytes: format!("[{{\"src\":\"10.0.0.{}\",\"dst\":\"10.0.0.9\"}}]", i + 1).into_bytes(),
            })
            .collect();
        let intake = MockIntake {
            items,
            acked: Arc::new(Mutex::new(Vec::new())),
            fail_ack: true,
        };

        let results = service.drain_intake(&intake).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_completed()));
        assert_eq!(service.summary().await.unwrap().total_records, 2);
    }

    #[tokio::test]
    async fn test_export_snapshot_passes_rows() {
        let service = IngestService::from_config(&AppConfig::default()).unwrap();
        service
            .submit_bytes(b"[{\"source_ip\":\"10.0.0.1\",\"bytes\":1}]", BatchFormat::Json, "t")
            .await;
        let rows = Arc::new(Mutex::new(Vec::new()));
        let written = service
            .export_snapshot(&MockExport { rows: rows.clone() })
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert!(rows.lock().await[0].contains_key("_global_key"));
    }
}
