use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use flow_ingest::app::IngestService;
use flow_ingest::config::{AppConfig, DuplicateStrategy, DEFAULT_CONFIG_PATH};
use flow_ingest::infra::{DirectoryIntake, SnapshotExporter};
use flow_ingest::observability::{init_logging, metrics};
use flow_ingest::pipeline::ingestion::BatchFormat;
use flow_ingest::ProcessingResult;

#[derive(Parser)]
#[command(name = "flow_ingest")]
#[command(about = "Network-flow ingestion: canonicalize, deduplicate, merge and vectorize flow batches")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Duplicate strategy: smart_upsert, timestamp_priority or ignore
    #[arg(long, global = true)]
    strategy: Option<DuplicateStrategy>,

    /// Time window in minutes for record keys
    #[arg(long, global = true)]
    window: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one or more JSON / NDJSON files in order
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Source identifier to use instead of the file path
        #[arg(long)]
        source: Option<String>,
        /// Write the store snapshot here after ingesting
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Poll the inbox directory until Ctrl-C, then export the snapshot
    Watch {
        #[arg(long)]
        inbox: Option<PathBuf>,
        #[arg(long)]
        processed: Option<PathBuf>,
        #[arg(long)]
        failed: Option<PathBuf>,
        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

fn print_result(result: &ProcessingResult) {
    println!("\n📊 Batch {} ({}):", result.batch_id, result.source_identifier);
    println!("   Status: {}", result.status.as_str());
    println!("   Rows: {} ({} dropped)", result.total_rows, result.dropped_rows);
    println!(
        "   New: {}  Updated: {}  Ignored: {}",
        result.new_records, result.updated_records, result.ignored_duplicates
    );
    println!(
        "   Quality: {:.2} ({})",
        result.quality_score,
        if result.quality_passed { "passed" } else { "below threshold" }
    );
    println!("   Mapping confidence: {:.2}", result.field_mapping.confidence);
    if let Some(bundle) = &result.vectorization {
        println!("   Features: {}", bundle.total_features);
    }
    if !result.warnings.is_empty() {
        println!("   Warnings: {}", result.warnings.len());
    }
    for e in &result.errors {
        println!("   ❌ {}", e);
    }
}

async fn export_snapshot(service: &IngestService, path: PathBuf) -> Result<()> {
    let exporter = SnapshotExporter::new(path.clone());
    let written = service
        .export_snapshot(&exporter)
        .await
        .with_context(|| format!("exporting snapshot to {}", path.display()))?;
    println!("💾 Wrote {} records to {}", written, path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(strategy) = cli.strategy {
        config.processing.duplicate_strategy = strategy;
    }
    if let Some(window) = cli.window {
        config.processing.time_window_minutes = window;
    }

    if let Err(e) = metrics::init() {
        warn!("Metrics exporter not started: {}", e);
    }

    let service = IngestService::from_config(&config).context("building processor")?;

    match cli.command {
        Commands::Ingest { files, source, export } => {
            for file in files {
                let Some(format) = BatchFormat::from_path(&file) else {
                    warn!("Skipping {}: unsupported extension", file.display());
                    continue;
                };
                let bytes = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?;
                let source_id = source.clone().unwrap_or_else(|| file.display().to_string());
                let result = service.submit_bytes(&bytes, format, &source_id).await;
                print_result(&result);
            }

            let summary = service.summary().await?;
            println!(
                "\n🗄️  Store: {} records, {} updates",
                summary.total_records, summary.total_updates
            );
            if let Some(path) = export {
                export_snapshot(&service, path).await?;
            }
        }
        Commands::Watch {
            inbox,
            processed,
            failed,
            interval,
            export,
        } => {
            if let Some(dir) = inbox {
                config.intake.inbox_dir = dir;
            }
            if let Some(dir) = processed {
                config.intake.processed_dir = dir;
            }
            if let Some(dir) = failed {
                config.intake.failed_dir = dir;
            }
            let interval = interval.unwrap_or(config.intake.poll_interval_secs).max(1);
            let intake = DirectoryIntake::new(&config.intake);

            info!(
                "Watching {} every {}s (Ctrl-C to stop)",
                config.intake.inbox_dir.display(),
                interval
            );
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.drain_intake(&intake).await {
                            Ok(results) => results.iter().for_each(print_result),
                            Err(e) => error!("Intake poll failed: {}", e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down watcher");
                        break;
                    }
                }
            }

            let path = export.unwrap_or_else(|| config.export.snapshot_path.clone());
            export_snapshot(&service, path).await?;
        }
    }

    Ok(())
}
