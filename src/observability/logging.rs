use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for the rolling JSON log files
pub const LOG_DIR: &str = "logs";

/// Initializes logging with console output and a daily-rolling JSON file in `logs/`.
pub fn init_logging() {
    let _ = fs::create_dir_all(LOG_DIR);

    let file_appender = tracing_appender::rolling::daily(LOG_DIR, "flow_ingest.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flow_ingest=info"));

    // try_init so a second call (tests, embedding) leaves the first subscriber in place
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // The guard flushes on drop; keep it for the life of the process
    std::mem::forget(guard);
}
