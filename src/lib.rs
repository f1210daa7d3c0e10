//! Network-flow ingestion engine: schema canonicalization, cross-batch
//! deduplication and merge, batch quality scoring and ML feature vectorization.

pub mod config;
pub mod error;

// Domain data shapes shared across layers
pub mod domain;

pub mod observability;
pub mod pipeline;

// Layered boundaries for application and infrastructure
pub mod app;
pub mod infra;

pub use app::IngestService;
pub use config::{AppConfig, DuplicateStrategy, ProcessingConfig, VectorizerConfig};
pub use error::{IngestError, Result};
pub use pipeline::{DataProcessor, ProcessingResult, ProcessingStatus};
