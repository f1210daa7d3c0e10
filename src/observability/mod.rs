// Observability: metrics, logging, and the processing log

pub mod logging;
pub mod metrics;
pub mod processing_log;

pub use logging::init_logging;
pub use processing_log::{LogEntry, LogLevel, ProcessingLog};
