// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use fleet_core::domain::broker::ConnectionError;
use fleet_core::domain::task::{InvalidPayload, TaskId, TaskStatus};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during fleet coordination.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid task payload: {0}")]
    InvalidPayload(#[from] InvalidPayload),

    #[error("Task {task_id} has unreadable status '{status}' in the registry")]
    InvalidStatus { task_id: TaskId, status: String },

    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Handler for task type '{task_type}' failed: {message}")]
    Handler { task_type: String, message: String },

    #[error("No handler registered for task type '{0}'")]
    UnknownTaskType(String),

    #[error("Lock TTL must be greater than zero (got {0:?})")]
    InvalidLockTtl(Duration),
}

impl CoordinationError {
    /// Whether the failure came from the broker rather than from the data.
    pub fn is_connection(&self) -> bool {
        matches!(self, CoordinationError::Connection(_))
    }
}
