// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Router
//!
//! Delivers tasks to `agent:<id>:tasks` and control envelopes to
//! `agent:broadcast`. Delivery is at-most-once and best-effort: a task sent
//! to an agent with no live subscriber simply stays `pending` in the registry.

use fleet_core::domain::events::BroadcastEnvelope;
use fleet_core::domain::keys::{task_channel, BROADCAST_CHANNEL};
use fleet_core::domain::task::Task;
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::task_registry::TaskRegistry;
use crate::domain::CoordinationError;

#[derive(Clone)]
pub struct TaskRouter {
    connection: Arc<BrokerConnection>,
    registry: TaskRegistry,
}

impl TaskRouter {
    pub fn new(connection: Arc<BrokerConnection>, registry: TaskRegistry) -> Self {
        Self {
            connection,
            registry,
        }
    }

    /// Persist `task`, then publish it on its target's channel.
    ///
    /// The registry write is awaited before the publish, so whoever receives
    /// the message will find at least a `pending` record. Returns the number
    /// of subscribers the message reached.
    pub async fn route(&self, task: &Task) -> Result<usize, CoordinationError> {
        self.registry.put(task).await?;

        let message = serde_json::to_string(task)?;
        let channel = task_channel(&task.agent_id);
        let receivers = self.connection.publish(&channel, &message).await?;

        if receivers == 0 {
            warn!(
                task_id = %task.task_id,
                agent_id = %task.agent_id,
                "No subscriber on task channel; task will stay pending"
            );
        } else {
            debug!(task_id = %task.task_id, channel = %channel, receivers, "Task routed");
        }
        Ok(receivers)
    }

    pub async fn broadcast(&self, envelope: &BroadcastEnvelope) -> Result<usize, CoordinationError> {
        let message = serde_json::to_string(envelope)?;
        let receivers = self.connection.publish(BROADCAST_CHANNEL, &message).await?;
        debug!(kind = %envelope.kind, receivers, "Broadcast published");
        Ok(receivers)
    }
}
