// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::task::TaskId;

/// Characters that would break channel names or key-scan patterns.
const RESERVED_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// Identifier of an agent in the fleet (e.g. `"builder-1"`).
///
/// Agent ids are embedded in broker keys such as `agent:<id>:tasks`, so they
/// must be non-empty and free of whitespace and glob/separator characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAgentId {
    #[error("agent id cannot be empty")]
    Empty,

    #[error("agent id '{0}' contains whitespace or a reserved character")]
    ReservedCharacter(String),
}

impl AgentId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidAgentId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidAgentId::Empty);
        }
        if id.chars().any(|c| c.is_whitespace() || RESERVED_CHARS.contains(&c)) {
            return Err(InvalidAgentId::ReservedCharacter(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = InvalidAgentId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = InvalidAgentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Presence state advertised in an [`AgentStatus`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Online,
    Offline,
    Busy,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Online => "online",
            AgentState::Offline => "offline",
            AgentState::Busy => "busy",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heartbeat/announcement record stored under `agent:<id>:status`.
///
/// Written only by the owning agent's coordinator; anyone may read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: AgentId,
    pub status: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskId>,
    /// Monotonic count of tasks this agent finished successfully.
    #[serde(default)]
    pub tasks_completed: u64,
    /// Seconds since the agent's coordinator was created.
    #[serde(default)]
    pub uptime: u64,
    pub last_seen: DateTime<Utc>,
}
