// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Registry
//!
//! Broker-resident task records, one hash per task at `task:<taskId>`:
//!
//! | Field | Contents |
//! |-------|----------|
//! | `data` | JSON-serialized [`Task`] as published |
//! | `status` | current [`TaskStatus`] |
//! | `created_at` | RFC 3339 creation time |
//! | `updated_at` | RFC 3339 time of the last status write |
//!
//! `status` and `updated_at` are always written together in one call so a
//! reader never sees one without the other.

use chrono::{DateTime, Utc};
use fleet_core::domain::keys::{format_timestamp, parse_timestamp, task_key};
use fleet_core::domain::task::{Task, TaskId, TaskStatus};
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use std::sync::Arc;
use tracing::debug;

use crate::domain::CoordinationError;

const FIELD_DATA: &str = "data";
const FIELD_STATUS: &str = "status";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_UPDATED_AT: &str = "updated_at";

/// Full registry view of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// The task as originally published (its embedded `status` is stale).
    pub task: Task,
    pub status: TaskStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct TaskRegistry {
    connection: Arc<BrokerConnection>,
}

impl TaskRegistry {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self { connection }
    }

    /// Persist a full task record.
    pub async fn put(&self, task: &Task) -> Result<(), CoordinationError> {
        let data = serde_json::to_string(task)?;
        let now = format_timestamp(Utc::now());
        let fields = vec![
            (FIELD_DATA.to_string(), data),
            (FIELD_STATUS.to_string(), task.status.as_str().to_string()),
            (FIELD_CREATED_AT.to_string(), format_timestamp(task.timestamp)),
            (FIELD_UPDATED_AT.to_string(), now),
        ];
        self.connection.hset(&task_key(&task.task_id), &fields).await?;
        debug!(task_id = %task.task_id, status = %task.status, "Task record stored");
        Ok(())
    }

    /// Write `status` and `updated_at`, leaving `data` untouched.
    pub async fn update_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<(), CoordinationError> {
        let fields = vec![
            (FIELD_STATUS.to_string(), status.as_str().to_string()),
            (FIELD_UPDATED_AT.to_string(), format_timestamp(Utc::now())),
        ];
        self.connection.hset(&task_key(task_id), &fields).await?;
        debug!(%task_id, %status, "Task status updated");
        Ok(())
    }

    /// Move a task forward, refusing transitions that would go backwards or
    /// leave a terminal state.
    pub async fn advance(
        &self,
        task_id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), CoordinationError> {
        if !from.can_transition_to(to) {
            return Err(CoordinationError::InvalidTransition {
                task_id: task_id.clone(),
                from,
                to,
            });
        }
        self.update_status(task_id, to).await
    }

    /// Current status, or `None` when the task is unknown.
    pub async fn get_status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, CoordinationError> {
        let raw = self.connection.hget(&task_key(task_id), FIELD_STATUS).await?;
        raw.map(|status| {
            status
                .parse::<TaskStatus>()
                .map_err(|_| CoordinationError::InvalidStatus {
                    task_id: task_id.clone(),
                    status,
                })
        })
        .transpose()
    }

    pub async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, CoordinationError> {
        let fields = self.connection.hgetall(&task_key(task_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let task: Task = match fields.get(FIELD_DATA) {
            Some(data) => serde_json::from_str(data)?,
            None => return Ok(None),
        };
        let status = match fields.get(FIELD_STATUS) {
            Some(raw) => raw
                .parse::<TaskStatus>()
                .map_err(|_| CoordinationError::InvalidStatus {
                    task_id: task_id.clone(),
                    status: raw.clone(),
                })?,
            None => task.status,
        };

        Ok(Some(TaskRecord {
            task,
            status,
            created_at: fields.get(FIELD_CREATED_AT).and_then(|raw| parse_timestamp(raw)),
            updated_at: fields.get(FIELD_UPDATED_AT).and_then(|raw| parse_timestamp(raw)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::domain::agent::AgentId;
    use fleet_core::domain::task::{TaskPayload, DEFAULT_PRIORITY};
    use fleet_core::infrastructure::memory_broker::MemoryBroker;
    use serde_json::json;

    async fn registry() -> (TaskRegistry, Arc<BrokerConnection>) {
        let connection = Arc::new(BrokerConnection::new(Arc::new(MemoryBroker::new())));
        connection.connect().await.unwrap();
        (TaskRegistry::new(connection.clone()), connection)
    }

    fn build_task() -> Task {
        Task::new(
            AgentId::new("A").unwrap(),
            TaskPayload::new("build", json!({"target": "x"})).unwrap(),
            DEFAULT_PRIORITY,
        )
    }

    #[tokio::test]
    async fn test_unknown_task_is_none() {
        let (registry, _) = registry().await;
        let id = TaskId::from_raw("task_0_missing");
        assert_eq!(registry.get_status(&id).await.unwrap(), None);
        assert!(registry.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_update_keeps_data() {
        let (registry, connection) = registry().await;
        let task = build_task();
        registry.put(&task).await.unwrap();
        assert_eq!(registry.get_status(&task.task_id).await.unwrap(), Some(TaskStatus::Pending));

        registry.update_status(&task.task_id, TaskStatus::InProgress).await.unwrap();

        let record = registry.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::InProgress);
        assert_eq!(record.task, task);
        assert!(record.created_at.is_some());
        assert!(record.updated_at >= record.created_at);

        let raw = connection.hgetall(&task_key(&task.task_id)).await.unwrap();
        let mut fields: Vec<&str> = raw.keys().map(String::as_str).collect();
        fields.sort();
        assert_eq!(fields, vec!["created_at", "data", "status", "updated_at"]);
    }

    #[tokio::test]
    async fn test_advance_rejects_backwards_moves() {
        let (registry, _) = registry().await;
        let task = build_task();
        registry.put(&task).await.unwrap();

        registry
            .advance(&task.task_id, TaskStatus::Pending, TaskStatus::InProgress)
            .await
            .unwrap();
        let err = registry
            .advance(&task.task_id, TaskStatus::Completed, TaskStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidTransition { .. }));
        assert_eq!(registry.get_status(&task.task_id).await.unwrap(), Some(TaskStatus::InProgress));
    }

    #[tokio::test]
    async fn test_garbled_status_is_an_error_not_none() {
        let (registry, connection) = registry().await;
        let id = TaskId::from_raw("task_1_garbled");
        connection
            .hset(&task_key(&id), &[("status".to_string(), "exploded".to_string())])
            .await
            .unwrap();

        assert!(matches!(
            registry.get_status(&id).await,
            Err(CoordinationError::InvalidStatus { .. })
        ));
    }
}
