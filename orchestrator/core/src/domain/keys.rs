// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Broker channel and key naming.
//!
//! These names are shared with external tooling (dashboards, metrics
//! collectors) and must not change.
//!
//! | Name | Kind | Contents |
//! |------|------|----------|
//! | `agent:<id>:tasks` | channel | serialized `Task` messages |
//! | `agent:broadcast` | channel | control envelopes |
//! | `agent:<id>:activity` | hash | heartbeat metrics |
//! | `agent-activity` | channel | activity events |
//! | `task:<taskId>` | hash | `data`, `status`, `created_at`, `updated_at` |
//! | `agent:<id>:status` | hash | `data`, `last_updated` |
//! | `lock:<resource>` | string | holder agent id, with expiry |

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::agent::AgentId;
use crate::domain::task::TaskId;

pub const BROADCAST_CHANNEL: &str = "agent:broadcast";
pub const ACTIVITY_CHANNEL: &str = "agent-activity";
pub const AGENT_STATUS_PATTERN: &str = "agent:*:status";
pub const AGENT_ACTIVITY_PATTERN: &str = "agent:*:activity";

pub fn task_channel(agent: &AgentId) -> String {
    format!("agent:{}:tasks", agent)
}

pub fn task_key(task_id: &TaskId) -> String {
    format!("task:{}", task_id)
}

pub fn status_key(agent: &AgentId) -> String {
    format!("agent:{}:status", agent)
}

pub fn activity_key(agent: &AgentId) -> String {
    format!("agent:{}:activity", agent)
}

pub fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

/// Extract the agent id segment from `agent:<id>:<suffix>`.
pub fn agent_segment<'a>(key: &'a str, suffix: &str) -> Option<&'a str> {
    key.strip_prefix("agent:")?
        .strip_suffix(suffix)?
        .strip_suffix(':')
        .filter(|id| !id.is_empty())
}

/// Timestamp format used in hash fields: RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
