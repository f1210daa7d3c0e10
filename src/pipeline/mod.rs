// Flow processing pipeline: ingestion, processing, deduplication, and storage

pub mod dedup;
pub mod ingestion;
pub mod processing;
pub mod processor;
pub mod storage;

pub use dedup::{DeduplicationEngine, UpsertStats};
pub use processor::{DataProcessor, ProcessingResult, ProcessingStatus};
