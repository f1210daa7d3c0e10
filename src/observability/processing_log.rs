//! Append-only processing log consumed by external viewers.
//!
//! Every entry is also emitted as a `tracing` event at the matching level.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingLog {
    entries: Vec<LogEntry>,
}

impl ProcessingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, level: LogLevel, category: &str, message: impl Into<String>, data: Value) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(category, data = %data, "{}", message),
            LogLevel::Info => info!(category, data = %data, "{}", message),
            LogLevel::Warning => warn!(category, data = %data, "{}", message),
            LogLevel::Error => error!(category, data = %data, "{}", message),
        }
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            category: category.to_string(),
            message,
            data,
        });
    }

    pub fn info(&mut self, category: &str, message: impl Into<String>, data: Value) {
        self.record(LogLevel::Info, category, message, data);
    }

    pub fn warning(&mut self, category: &str, message: impl Into<String>, data: Value) {
        self.record(LogLevel::Warning, category, message, data);
    }

    pub fn error(&mut self, category: &str, message: impl Into<String>, data: Value) {
        self.record(LogLevel::Error, category, message, data);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_level(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level == level)
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a LogEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// The last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
