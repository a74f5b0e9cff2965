// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Control and activity messages exchanged over broker channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::domain::agent::AgentId;
use crate::domain::keys::{format_timestamp, parse_timestamp};

/// Envelope published on `agent:broadcast`.
///
/// Only `type` is required. Unknown types are carried through untouched so
/// that newer agents can broadcast commands older agents merely ignore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Broadcast commands every coordinator understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown { reason: Option<String> },
    StatusCheck,
}

impl BroadcastEnvelope {
    pub const SHUTDOWN: &'static str = "shutdown";
    pub const STATUS_CHECK: &'static str = "status_check";

    pub fn shutdown(reason: Option<String>) -> Self {
        let mut fields = Map::new();
        if let Some(reason) = reason {
            fields.insert("reason".to_string(), Value::String(reason));
        }
        Self {
            kind: Self::SHUTDOWN.to_string(),
            timestamp: Utc::now(),
            fields,
        }
    }

    pub fn status_check() -> Self {
        Self::custom(Self::STATUS_CHECK, Map::new())
    }

    pub fn custom(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            fields,
        }
    }

    /// Interpret the envelope as a known command; `None` for unknown types.
    pub fn command(&self) -> Option<ControlCommand> {
        match self.kind.as_str() {
            Self::SHUTDOWN => Some(ControlCommand::Shutdown {
                reason: self
                    .fields
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            Self::STATUS_CHECK => Some(ControlCommand::StatusCheck),
            _ => None,
        }
    }
}

/// Free-form activity event published on `agent-activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub agent_id: AgentId,
    pub kind: String,
    #[serde(default)]
    pub detail: Value,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(agent_id: AgentId, kind: impl Into<String>, detail: Value) -> Self {
        Self {
            agent_id,
            kind: kind.into(),
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Heartbeat metrics hash stored under `agent:<id>:activity`.
///
/// Records are written by the agent runtime and read by the metrics service,
/// which must cope with missing or partial hashes: numeric fields fall back to
/// zero and the status falls back to `"unknown"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    pub agent_id: String,
    pub status: String,
    pub messages_processed: u64,
    pub tasks_completed: u64,
    pub errors: u64,
    pub uptime_secs: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl AgentActivity {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn from_fields(agent_id: impl Into<String>, fields: &HashMap<String, String>) -> Self {
        let counter = |name: &str| {
            fields
                .get(name)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };

        Self {
            agent_id: agent_id.into(),
            status: fields
                .get("status")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| Self::UNKNOWN.to_string()),
            messages_processed: counter("messages_processed"),
            tasks_completed: counter("tasks_completed"),
            errors: counter("errors"),
            uptime_secs: counter("uptime_secs"),
            last_heartbeat: fields.get("last_heartbeat").and_then(|raw| parse_timestamp(raw)),
        }
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("status".to_string(), self.status.clone()),
            ("messages_processed".to_string(), self.messages_processed.to_string()),
            ("tasks_completed".to_string(), self.tasks_completed.to_string()),
            ("errors".to_string(), self.errors.to_string()),
            ("uptime_secs".to_string(), self.uptime_secs.to_string()),
        ];
        if let Some(ts) = self.last_heartbeat {
            fields.push(("last_heartbeat".to_string(), format_timestamp(ts)));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_known_commands() {
        let shutdown = BroadcastEnvelope::shutdown(Some("maintenance".into()));
        assert_eq!(
            shutdown.command(),
            Some(ControlCommand::Shutdown {
                reason: Some("maintenance".into())
            })
        );

        let json = serde_json::to_value(BroadcastEnvelope::status_check()).unwrap();
        assert_eq!(json["type"], "status_check");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_broadcast_unknown_type_is_preserved() {
        let envelope: BroadcastEnvelope =
            serde_json::from_value(json!({"type": "reload_prompts", "scope": "all"})).unwrap();
        assert_eq!(envelope.kind, "reload_prompts");
        assert_eq!(envelope.fields["scope"], "all");
        assert!(envelope.command().is_none());
    }

    #[test]
    fn test_broadcast_requires_type() {
        assert!(serde_json::from_value::<BroadcastEnvelope>(json!({"scope": "all"})).is_err());
    }

    #[test]
    fn test_activity_defaults_for_partial_record() {
        let mut fields = HashMap::new();
        fields.insert("messages_processed".to_string(), "12".to_string());
        fields.insert("errors".to_string(), "not-a-number".to_string());

        let activity = AgentActivity::from_fields("A", &fields);
        assert_eq!(activity.status, AgentActivity::UNKNOWN);
        assert_eq!(activity.messages_processed, 12);
        assert_eq!(activity.errors, 0);
        assert_eq!(activity.tasks_completed, 0);
        assert!(activity.last_heartbeat.is_none());
    }

    #[test]
    fn test_activity_fields_roundtrip() {
        let activity = AgentActivity {
            agent_id: "A".into(),
            status: "online".into(),
            messages_processed: 4,
            tasks_completed: 2,
            errors: 1,
            uptime_secs: 90,
            last_heartbeat: Some(Utc::now()),
        };
        let fields: HashMap<String, String> = activity.to_fields().into_iter().collect();
        let parsed = AgentActivity::from_fields("A", &fields);

        assert_eq!(parsed.status, "online");
        assert_eq!(parsed.tasks_completed, 2);
        assert_eq!(
            parsed.last_heartbeat.map(|t| t.timestamp_millis()),
            activity.last_heartbeat.map(|t| t.timestamp_millis())
        );
    }
}
