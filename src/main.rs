//! Harness - device telemetry harness
//!
//! CLI entry point for the harness daemon.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod harness;

use harness::config::LoggingConfig;

const DEFAULT_LOG_FILTER: &str =
    "harness=info,harness_core=info,harness_manifest=info,harness_uploader=info";

/// Console logging, plus daily-rotated files when a directory is configured.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = harness::load_config()?;
    let _guard = init_tracing(&config.logging);

    tracing::info!("Starting harness v{}", env!("CARGO_PKG_VERSION"));
    cli::run(cli, config).await
}
