// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Configuration schema for a fleet agent node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Agent identity
// - Broker location
// - Coordination timings (status interval, heartbeat, lock TTL)
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::agent::AgentId;

pub const API_VERSION: &str = "fleet/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "fleet/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier used in channel and key names
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker URL (e.g. "memory://fleet")
    #[serde(default = "default_broker_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Interval between timer-driven status publications
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Interval between activity heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// TTL applied by lock helpers when the caller does not pick one
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Priority for tasks published without an explicit one
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| sanitize_agent_id(&h))
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "fleet-agent".to_string());

        Self {
            id: hostname,
            description: None,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            lock_ttl_secs: default_lock_ttl(),
            default_priority: default_priority(),
        }
    }
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        let spec = NodeConfigSpec::default();
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: spec.agent.id.clone(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec,
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. FLEET_CONFIG_PATH environment variable
    /// 2. ./fleet-config.yaml (working directory)
    /// 3. ~/.fleet/config.yaml (user home)
    /// 4. /etc/fleet/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLEET_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./fleet-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".fleet").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/fleet/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse.
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (container deployments)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("FLEET_AGENT_ID").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: FLEET_AGENT_ID={}", id);
            self.spec.agent.id = id;
        }

        if let Some(url) = lookup("FLEET_BROKER_URL").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: FLEET_BROKER_URL={}", url);
            self.spec.broker.url = url;
        }

        if let Some(val) = lookup("FLEET_STATUS_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: FLEET_STATUS_INTERVAL_SECS={}", secs);
                    self.spec.coordination.status_interval_secs = secs;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for FLEET_STATUS_INTERVAL_SECS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Log level from `spec.observability.logging`, if configured.
    pub fn log_level(&self) -> Option<&str> {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.as_ref())
            .map(|l| l.level.as_str())
    }

    /// The configured agent id, validated.
    pub fn agent_id(&self) -> anyhow::Result<AgentId> {
        AgentId::new(self.spec.agent.id.clone())
            .map_err(|e| anyhow::anyhow!("spec.agent.id is invalid: {}", e))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        self.agent_id()?;

        let url = &self.spec.broker.url;
        match url.split_once("://") {
            Some((scheme, _)) if scheme == crate::infrastructure::memory_broker::MEMORY_SCHEME => {}
            Some((scheme, _)) => anyhow::bail!("Unsupported broker scheme '{}' in '{}'", scheme, url),
            None => anyhow::bail!("spec.broker.url '{}' is not a URL", url),
        }

        let coordination = &self.spec.coordination;
        if coordination.status_interval_secs == 0 {
            anyhow::bail!("spec.coordination.status_interval_secs must be greater than zero");
        }
        if coordination.heartbeat_interval_secs == 0 {
            anyhow::bail!("spec.coordination.heartbeat_interval_secs must be greater than zero");
        }
        if coordination.lock_ttl_secs == 0 {
            anyhow::bail!("spec.coordination.lock_ttl_secs must be greater than zero");
        }

        Ok(())
    }
}

/// Replace characters an agent id may not contain.
fn sanitize_agent_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect()
}

fn default_broker_url() -> String {
    "memory://fleet".to_string()
}

fn default_status_interval() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_lock_ttl() -> u64 {
    30
}

fn default_priority() -> i32 {
    crate::domain::task::DEFAULT_PRIORITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}
