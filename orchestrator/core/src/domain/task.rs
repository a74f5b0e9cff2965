// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Domain Types
//!
//! A [`Task`] is a unit of work routed to exactly one agent. Its lifecycle is
//! tracked by [`TaskStatus`], which only ever moves forward:
//!
//! ```text
//! pending ──▶ in_progress ──┬──▶ completed
//!                           └──▶ failed
//! ```
//!
//! Payloads are free-form JSON objects. The `type` field is the dispatch tag
//! used to select a local handler; everything else is opaque to the
//! coordination layer.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// Priority assigned when the publisher does not pick one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Length of the random suffix appended to generated task ids.
const TASK_ID_SUFFIX_LEN: usize = 9;

/// Opaque task identifier of the form `task_<unix-millis>_<random>`.
///
/// The millisecond prefix keeps ids roughly ordered by creation time; the
/// random suffix keeps concurrent publishers from colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "task_{}_{}",
            Utc::now().timestamp_millis(),
            &suffix[..TASK_ID_SUFFIX_LEN]
        ))
    }

    /// Wrap an id received from the wire or typed by an operator.
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status '{0}'")]
pub struct UnknownTaskStatus(pub String);

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownTaskStatus(other.to_string())),
        }
    }
}

/// Structured task payload: a JSON object whose `type` field selects the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(Map<String, Value>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPayload {
    #[error("task payload must be a JSON object")]
    NotAnObject,

    #[error("task payload is missing a string 'type' field")]
    MissingType,

    #[error("task payload could not be encoded: {0}")]
    Encoding(String),
}

impl TaskPayload {
    pub const TYPE_FIELD: &'static str = "type";

    /// Build a payload from a dispatch tag and an object of extra fields.
    ///
    /// Non-object `fields` are rejected; a `type` key inside `fields` is
    /// overwritten by `task_type`.
    pub fn new(task_type: impl Into<String>, fields: Value) -> Result<Self, InvalidPayload> {
        let mut map = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(InvalidPayload::NotAnObject),
        };
        map.insert(Self::TYPE_FIELD.to_string(), Value::String(task_type.into()));
        Ok(Self(map))
    }

    /// Validate an arbitrary JSON value as a dispatchable payload.
    pub fn from_value(value: Value) -> Result<Self, InvalidPayload> {
        match value {
            Value::Object(map) => {
                let payload = Self(map);
                if payload.task_type().is_none() {
                    return Err(InvalidPayload::MissingType);
                }
                Ok(payload)
            }
            _ => Err(InvalidPayload::NotAnObject),
        }
    }

    /// Encode a typed task into its payload form.
    pub fn from_typed<T: TypedTask>(task: &T) -> Result<Self, InvalidPayload> {
        let value =
            serde_json::to_value(task).map_err(|e| InvalidPayload::Encoding(e.to_string()))?;
        Self::new(T::TYPE, value)
    }

    /// The dispatch tag, if the payload carries a string `type` field.
    pub fn task_type(&self) -> Option<&str> {
        self.0.get(Self::TYPE_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Decode the payload into a typed task struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }
}

/// A payload variant with a fixed dispatch tag.
///
/// Implementing this for a struct lets handlers be registered against the
/// struct type instead of a bare string tag.
pub trait TypedTask: Serialize + DeserializeOwned + Send + 'static {
    const TYPE: &'static str;
}

/// A routed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: TaskId,
    /// Target agent (not the creator).
    pub agent_id: AgentId,
    /// Advisory only; routing does not reorder by priority.
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub payload: TaskPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

impl Task {
    /// Create a fresh `pending` task with a generated id.
    pub fn new(agent_id: AgentId, payload: TaskPayload, priority: i32) -> Self {
        Self {
            task_id: TaskId::generate(),
            agent_id,
            priority,
            payload,
            timestamp: Utc::now(),
            status: TaskStatus::Pending,
        }
    }

    pub fn task_type(&self) -> Option<&str> {
        self.payload.task_type()
    }
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Build {
        target: String,
    }

    impl TypedTask for Build {
        const TYPE: &'static str = "build";
    }

    #[test]
    fn test_task_ids_are_unique_and_prefixed() {
        let ids: HashSet<TaskId> = (0..500).map(|_| TaskId::generate()).collect();
        assert_eq!(ids.len(), 500);
        for id in &ids {
            let parts: Vec<&str> = id.as_str().splitn(3, '_').collect();
            assert_eq!(parts[0], "task");
            assert!(parts[1].parse::<i64>().is_ok());
            assert_eq!(parts[2].len(), TASK_ID_SUFFIX_LEN);
        }
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, InProgress, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!("failed".parse::<TaskStatus>(), Ok(TaskStatus::Failed));
        assert!("done".parse::<TaskStatus>().is_err());
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            json!("in_progress")
        );
    }

    #[test]
    fn test_payload_requires_type() {
        assert_eq!(
            TaskPayload::from_value(json!({"target": "x"})),
            Err(InvalidPayload::MissingType)
        );
        assert_eq!(
            TaskPayload::from_value(json!([1, 2])),
            Err(InvalidPayload::NotAnObject)
        );

        let payload = TaskPayload::from_value(json!({"type": "build", "target": "x"})).unwrap();
        assert_eq!(payload.task_type(), Some("build"));
        assert_eq!(payload.get("target"), Some(&json!("x")));
    }

    #[test]
    fn test_typed_payload() {
        let payload = TaskPayload::from_typed(&Build { target: "x".into() }).unwrap();
        assert_eq!(payload.task_type(), Some("build"));

        let decoded: Build = payload.decode().unwrap();
        assert_eq!(decoded, Build { target: "x".into() });
    }

    #[test]
    fn test_task_wire_format_is_camel_case() {
        let task = Task::new(
            AgentId::new("A").unwrap(),
            TaskPayload::new("build", json!({"target": "x"})).unwrap(),
            DEFAULT_PRIORITY,
        );
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["agentId"], "A");
        assert_eq!(json["priority"], 5);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["payload"]["type"], "build");
        assert!(json["taskId"].as_str().unwrap().starts_with("task_"));
    }

    #[test]
    fn test_task_parse_without_type_still_succeeds() {
        let task: Task = serde_json::from_value(json!({
            "taskId": "task_1_abcdefghi",
            "agentId": "A",
            "payload": {"target": "x"},
            "timestamp": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.task_type(), None);
    }
}
