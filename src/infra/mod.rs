pub mod file_intake;
pub mod snapshot_export;

pub use file_intake::DirectoryIntake;
pub use snapshot_export::SnapshotExporter;
