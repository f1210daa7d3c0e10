use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The batch as a whole could not be turned into rows.
    #[error("Batch format error: {0}")]
    Format(String),

    /// A single field or row could not be used as-is.
    #[error("Field error in '{field}': {message}")]
    Field { field: String, message: String },

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
