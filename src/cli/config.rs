//! CLI configuration inspection
//!
//! Provides `harness config {show,get,defaults}`.

use crate::harness::{embedded_defaults, AppConfig};
use anyhow::{Context, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Get a specific setting value
    Get {
        /// Setting key (dot notation: manifest.url)
        key: String,
    },
    /// Print the built-in defaults
    Defaults,
}

pub fn run(cmd: ConfigCommands, config: &AppConfig) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigCommands::Get { key } => cmd_get(config, &key),
        ConfigCommands::Defaults => {
            print!("{}", embedded_defaults()?.to_toml()?);
            Ok(())
        }
    }
}

// ── get ──

fn cmd_get(config: &AppConfig, key: &str) -> Result<()> {
    let json = serde_json::to_value(config).context("Failed to serialize config")?;
    let value = lookup(&json, key).with_context(|| format!("Key not found: {}", key))?;

    match value {
        serde_json::Value::String(s) => println!("{}", s),
        serde_json::Value::Bool(b) => println!("{}", b),
        serde_json::Value::Number(n) => println!("{}", n),
        serde_json::Value::Null => println!("(unset)"),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }

    Ok(())
}

/// Navigate a dot-notation path
fn lookup<'a>(json: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    key.split('.').try_fold(json, |current, part| current.get(part))
}
