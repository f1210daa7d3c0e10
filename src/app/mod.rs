pub mod ingest_use_case;
pub mod ports;

pub use ingest_use_case::IngestService;
pub use ports::{IntakeItem, IntakePort, SnapshotExportPort};
