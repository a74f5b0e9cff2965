// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Fleet Node CLI
//!
//! The `fleet` binary runs one coordination node of an agent fleet.
//!
//! ## Commands
//!
//! - `fleet agent run` - Join the fleet and serve tasks until stopped
//! - `fleet agent simulate` - In-process fleet over one memory broker
//! - `fleet config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use fleet_cli::commands::{self, AgentCommand, ConfigCommand};
use fleet_core::domain::node_config::NodeConfigManifest;

const DEFAULT_LOG_LEVEL: &str = "info";

/// Fleet node - coordinate agents over a shared broker
#[derive(Parser)]
#[command(name = "fleet")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FLEET_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: config file, else info]
    #[arg(long, global = true, env = "FLEET_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run or simulate fleet agents
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is normal outside development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&resolve_log_level(cli.log_level.clone(), cli.config.clone()))?;

    match cli.command {
        Some(Commands::Agent { command }) => commands::agent::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// `--log-level` wins over `spec.observability.logging.level`. A config that
/// fails to load is reported later by the command itself.
fn resolve_log_level(flag: Option<String>, config_path: Option<PathBuf>) -> String {
    flag.or_else(|| {
        NodeConfigManifest::load_or_default(config_path)
            .ok()
            .and_then(|config| config.log_level().map(str::to_string))
    })
    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet-config.yaml");
        std::fs::write(
            &path,
            r#"
apiVersion: fleet/v1
kind: NodeConfig
metadata:
  name: builder
spec:
  agent:
    id: builder-1
  observability:
    logging:
      level: debug
"#,
        )
        .unwrap();

        assert_eq!(resolve_log_level(None, Some(path.clone())), "debug");
        assert_eq!(resolve_log_level(Some("warn".into()), Some(path)), "warn");
        assert_eq!(
            resolve_log_level(None, Some(dir.path().join("missing.yaml"))),
            DEFAULT_LOG_LEVEL
        );
    }
}
