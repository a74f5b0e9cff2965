// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use fleet_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with default values
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./fleet-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. FLEET_CONFIG_PATH: {}",
            std::env::var("FLEET_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./fleet-config.yaml");
        println!("  4. ~/.fleet/config.yaml");
        println!("  5. /etc/fleet/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Agent:".bold());
    println!("  ID: {}", config.spec.agent.id);
    if let Some(description) = &config.spec.agent.description {
        println!("  Description: {}", description);
    }
    println!();

    println!("{}", "Broker:".bold());
    println!("  URL: {}", config.spec.broker.url);
    println!();

    let coordination = &config.spec.coordination;
    println!("{}", "Coordination:".bold());
    println!("  Status interval: {}s", coordination.status_interval_secs);
    println!("  Heartbeat interval: {}s", coordination.heartbeat_interval_secs);
    println!("  Lock TTL: {}s", coordination.lock_ttl_secs);
    println!("  Default priority: {}", coordination.default_priority);
    println!();

    let metrics = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref());
    println!("{}", "Observability:".bold());
    match metrics {
        Some(m) if m.enabled => println!("  Prometheus exporter: port {}", m.port),
        _ => println!("  Prometheus exporter: {}", "disabled".dimmed()),
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    NodeConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet-config.yaml");

        generate(&path, false).await.unwrap();
        validate(Some(path.clone())).await.unwrap();

        let loaded = NodeConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.broker.url, NodeConfigManifest::default().spec.broker.url);
    }

    #[tokio::test]
    async fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet-config.yaml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(generate(&path, false).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

        generate(&path, true).await.unwrap();
        assert!(NodeConfigManifest::from_yaml_file(&path).is_ok());
    }

    #[tokio::test]
    async fn test_validate_rejects_unknown_broker_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        let mut config = NodeConfigManifest::default();
        config.spec.broker.url = "carrier-pigeon://coop".to_string();
        config.to_yaml_file(&path).unwrap();

        assert!(validate(Some(path)).await.is_err());
    }
}
