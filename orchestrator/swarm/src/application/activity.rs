// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Activity Reporting
//!
//! Heartbeat metrics written to `agent:<id>:activity` and free-form events
//! fanned out on `agent-activity`. The reader side is meant for dashboards,
//! so it tolerates partial or garbled records instead of failing.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** agent-side counters and heartbeat, observer-side scan and stream

use chrono::Utc;
use fleet_core::domain::agent::AgentId;
use fleet_core::domain::events::{ActivityEvent, AgentActivity};
use fleet_core::domain::keys::{activity_key, agent_segment, ACTIVITY_CHANNEL, AGENT_ACTIVITY_PATTERN};
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::CoordinationError;

struct ReporterState {
    agent_id: AgentId,
    connection: Arc<BrokerConnection>,
    status: RwLock<String>,
    messages_processed: AtomicU64,
    tasks_completed: AtomicU64,
    errors: AtomicU64,
    started_at: Instant,
}

/// Agent-side activity counters.
#[derive(Clone)]
pub struct ActivityReporter {
    state: Arc<ReporterState>,
}

impl ActivityReporter {
    pub fn new(agent_id: AgentId, connection: Arc<BrokerConnection>) -> Self {
        Self {
            state: Arc::new(ReporterState {
                agent_id,
                connection,
                status: RwLock::new("online".to_string()),
                messages_processed: AtomicU64::new(0),
                tasks_completed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn record_message(&self) {
        self.state.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completed(&self) {
        self.state.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.state.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: impl Into<String>) {
        *self.state.status.write() = status.into();
    }

    /// Point-in-time view of the counters, as the next heartbeat would write it.
    pub fn snapshot(&self) -> AgentActivity {
        AgentActivity {
            agent_id: self.state.agent_id.to_string(),
            status: self.state.status.read().clone(),
            messages_processed: self.state.messages_processed.load(Ordering::Relaxed),
            tasks_completed: self.state.tasks_completed.load(Ordering::Relaxed),
            errors: self.state.errors.load(Ordering::Relaxed),
            uptime_secs: self.state.started_at.elapsed().as_secs(),
            last_heartbeat: Some(Utc::now()),
        }
    }

    /// Write the activity hash in a single call.
    pub async fn heartbeat(&self) -> Result<AgentActivity, CoordinationError> {
        let activity = self.snapshot();
        self.state
            .connection
            .hset(&activity_key(&self.state.agent_id), &activity.to_fields())
            .await?;
        debug!(agent_id = %self.state.agent_id, "Activity heartbeat written");
        Ok(activity)
    }

    /// Publish an event on the shared activity channel.
    pub async fn emit(&self, kind: impl Into<String>, detail: Value) -> Result<usize, CoordinationError> {
        let event = ActivityEvent::new(self.state.agent_id.clone(), kind, detail);
        let message = serde_json::to_string(&event)?;
        Ok(self.state.connection.publish(ACTIVITY_CHANNEL, &message).await?)
    }

    /// Heartbeat every `interval` until `cancel` fires. Failed writes are
    /// logged and retried on the next tick.
    pub fn spawn_heartbeat_loop(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = reporter.heartbeat().await {
                            warn!(agent_id = %reporter.state.agent_id, error = %e, "Activity heartbeat failed");
                        }
                    }
                }
            }
        })
    }
}

/// Observer-side access to fleet activity.
#[derive(Clone)]
pub struct ActivityReader {
    connection: Arc<BrokerConnection>,
}

impl ActivityReader {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self { connection }
    }

    /// One record per `agent:*:activity` hash, sorted by agent id.
    pub async fn fleet_activity(&self) -> Result<Vec<AgentActivity>, CoordinationError> {
        let mut records = Vec::new();
        for key in self.connection.keys(AGENT_ACTIVITY_PATTERN).await? {
            let Some(agent_id) = agent_segment(&key, "activity") else {
                continue;
            };
            let fields = self.connection.hgetall(&key).await?;
            records.push(AgentActivity::from_fields(agent_id, &fields));
        }
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(records)
    }

    /// Live activity events. Malformed events are logged and skipped.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, ActivityEvent>, CoordinationError> {
        let subscription = self.connection.subscribe(ACTIVITY_CHANNEL).await?;
        Ok(subscription
            .filter_map(|message| async move {
                match serde_json::from_str::<ActivityEvent>(&message.payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed activity event");
                        metrics::counter!("fleet_messages_dropped_total").increment(1);
                        None
                    }
                }
            })
            .boxed())
    }
}
