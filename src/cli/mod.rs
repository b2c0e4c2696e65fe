//! CLI module for the harness
//!
//! Provides commands:
//! - `run`: Start the harness (default)
//! - `send`: Hand a file to the relay for the next upload batch
//! - `config`: Inspect the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use harness_uploader::FileRelay;

use crate::harness::{self, AppConfig};

pub mod config;

/// Device telemetry harness
#[derive(Parser, Debug)]
#[command(name = "harness")]
#[command(about = "Device telemetry harness")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the harness (default)
    Run {
        /// Run one round of checks, print the task states and exit
        #[arg(long)]
        once: bool,
    },
    /// Queue a file for upload through the relay
    Send {
        /// File to upload
        path: PathBuf,
    },
    /// View configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Some(Commands::Run { once }) => harness::run(config, once).await,
        Some(Commands::Send { path }) => send(config, path).await,
        Some(Commands::Config(cmd)) => config::run(cmd, &config),
        None => harness::run(config, false).await,
    }
}

async fn send(config: AppConfig, path: PathBuf) -> Result<()> {
    anyhow::ensure!(config.relay.enabled, "File relay is disabled");

    let path = tokio::fs::canonicalize(&path)
        .await
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    // The running harness owns the pending list; only hand it a note
    let note = FileRelay::submit_to(config.relay_root(), &path).await?;
    info!(path = %path.display(), note = %note.display(), "Queued for the next upload batch");
    println!("Queued {}", path.display());
    Ok(())
}
