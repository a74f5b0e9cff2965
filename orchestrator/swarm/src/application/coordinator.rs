// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator
//!
//! Per-agent façade over the broker: publishes tasks to other agents, runs
//! local handlers for tasks addressed to this agent, answers control
//! broadcasts and keeps the agent's status record fresh.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates [`TaskRouter`], [`TaskRegistry`], [`HandlerTable`]
//!   and [`LockManager`] for one agent id
//!
//! # Dispatch
//!
//! `connect` subscribes two channels and spawns one loop per channel:
//!
//! | Channel | Loop behaviour |
//! |---------|----------------|
//! | `agent:<id>:tasks` | `pending → in_progress → completed/failed`, one task at a time |
//! | `agent:broadcast` | `shutdown` trips [`Coordinator::shutdown_requested`], `status_check` republishes status |
//!
//! Each loop handles its messages strictly in receipt order. Nothing a
//! handler does (error or panic) escapes a loop; it only shows up as a
//! `failed` task.

use chrono::Utc;
use fleet_core::domain::agent::{AgentId, AgentState, AgentStatus};
use fleet_core::domain::broker::{ConnectionError, Subscription};
use fleet_core::domain::events::{BroadcastEnvelope, ControlCommand};
use fleet_core::domain::keys::{
    format_timestamp, status_key, task_channel, AGENT_STATUS_PATTERN, BROADCAST_CHANNEL,
};
use fleet_core::domain::task::{
    InvalidPayload, Task, TaskId, TaskPayload, TaskStatus, TypedTask, DEFAULT_PRIORITY,
};
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::activity::ActivityReporter;
use crate::application::handler::{handler_fn, typed_handler, HandlerTable, TaskHandler};
use crate::application::lock_manager::LockManager;
use crate::application::task_registry::TaskRegistry;
use crate::application::task_router::TaskRouter;
use crate::domain::CoordinationError;

const STATUS_FIELD_DATA: &str = "data";
const STATUS_FIELD_LAST_UPDATED: &str = "last_updated";

/// Result of [`Coordinator::wait_for_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task reached `completed` or `failed`.
    Finished(TaskStatus),
    /// The deadline passed; carries the last status seen, if any.
    TimedOut(Option<TaskStatus>),
}

#[derive(Debug, Clone)]
struct AgentSnapshot {
    state: AgentState,
    current_task: Option<TaskId>,
    tasks_completed: u64,
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    agent_id: AgentId,
    connection: Arc<BrokerConnection>,
    registry: TaskRegistry,
    router: TaskRouter,
    handlers: HandlerTable,
    activity: ActivityReporter,
    snapshot: RwLock<AgentSnapshot>,
    started_at: Instant,
    running: Mutex<Option<Running>>,
    /// Tripped by a `shutdown` broadcast, re-armed by the next `connect`.
    shutdown: RwLock<CancellationToken>,
}

/// Coordination handle for one agent. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(agent_id: AgentId, connection: Arc<BrokerConnection>) -> Self {
        let registry = TaskRegistry::new(connection.clone());
        let router = TaskRouter::new(connection.clone(), registry.clone());
        let activity = ActivityReporter::new(agent_id.clone(), connection.clone());
        Self {
            inner: Arc::new(Inner {
                agent_id,
                connection,
                registry,
                router,
                handlers: HandlerTable::new(),
                activity,
                snapshot: RwLock::new(AgentSnapshot {
                    state: AgentState::Offline,
                    current_task: None,
                    tasks_completed: 0,
                }),
                started_at: Instant::now(),
                running: Mutex::new(None),
                shutdown: RwLock::new(CancellationToken::new()),
            }),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.inner.agent_id
    }

    pub fn connection(&self) -> &Arc<BrokerConnection> {
        &self.inner.connection
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn activity(&self) -> &ActivityReporter {
        &self.inner.activity
    }

    /// Lock manager acting on behalf of this agent.
    pub fn locks(&self) -> LockManager {
        LockManager::new(self.inner.agent_id.clone(), self.inner.connection.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    /// Connect the broker, subscribe the task and broadcast channels and
    /// announce this agent as `online`. A second call while connected does
    /// nothing. A `shutdown` seen during an earlier connection is cleared.
    pub async fn connect(&self) -> Result<(), CoordinationError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            debug!(agent_id = %self.inner.agent_id, "Coordinator already connected");
            return Ok(());
        }

        self.inner.connection.connect().await?;
        let tasks = self
            .inner
            .connection
            .subscribe(&task_channel(&self.inner.agent_id))
            .await?;
        let broadcasts = self.inner.connection.subscribe(BROADCAST_CHANNEL).await?;
        self.inner.rearm_shutdown();

        let cancel = CancellationToken::new();
        let handles = vec![
            tokio::spawn(run_loop(self.inner.clone(), tasks, cancel.clone(), Inner::on_task_message)),
            tokio::spawn(run_loop(
                self.inner.clone(),
                broadcasts,
                cancel.clone(),
                Inner::on_broadcast_message,
            )),
        ];
        *running = Some(Running {
            cancel,
            tasks: handles,
        });
        drop(running);

        self.inner.set_state(AgentState::Online, None);
        self.inner.publish_status().await?;
        info!(
            agent_id = %self.inner.agent_id,
            broker = %self.inner.connection.describe(),
            "Coordinator connected"
        );
        Ok(())
    }

    /// Stop every loop, publish a final `offline` status (best effort) and
    /// close the broker connection. Safe to call repeatedly.
    ///
    /// Called from inside a task handler, the loop running that handler
    /// cannot be joined until the handler returns. The rest of the shutdown
    /// then finishes in the background once the current task has recorded
    /// its final status.
    pub async fn disconnect(&self) {
        let Some(running) = self.inner.running.lock().await.take() else {
            return;
        };

        // Loops stop between messages, so an in-flight handler runs to the end
        // before the offline status goes out.
        running.cancel.cancel();

        let current = tokio::task::try_id();
        let inside_loop = current.is_some() && running.tasks.iter().any(|handle| Some(handle.id()) == current);
        if inside_loop {
            debug!(agent_id = %self.inner.agent_id, "Disconnect requested from a coordinator loop");
            tokio::spawn(self.inner.clone().finish_disconnect(running.tasks));
            return;
        }
        self.inner.clone().finish_disconnect(running.tasks).await;
    }

    /// Register `handler` for `task_type`. A later registration for the same
    /// type replaces this one.
    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.inner.handlers.register(task_type, handler);
    }

    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(task_type, handler_fn(f));
    }

    pub fn register_typed<T, F, Fut>(&self, f: F)
    where
        T: TypedTask,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(T::TYPE, typed_handler(f));
    }

    pub fn task_types(&self) -> Vec<String> {
        self.inner.handlers.task_types()
    }

    /// Record and route a new `pending` task for `target`.
    ///
    /// `payload` must be a JSON object with a string `type`; anything else is
    /// rejected before the broker is touched. Returns once the task is stored
    /// and published, not when it is handled.
    pub async fn publish_task(
        &self,
        target: &AgentId,
        payload: Value,
        priority: i32,
    ) -> Result<TaskId, CoordinationError> {
        let payload = TaskPayload::from_value(payload)?;
        self.route(target, payload, priority).await
    }

    pub async fn publish_task_default(&self, target: &AgentId, payload: Value) -> Result<TaskId, CoordinationError> {
        self.publish_task(target, payload, DEFAULT_PRIORITY).await
    }

    pub async fn publish_typed<T: TypedTask>(
        &self,
        target: &AgentId,
        task: &T,
        priority: i32,
    ) -> Result<TaskId, CoordinationError> {
        let payload = TaskPayload::from_typed(task)?;
        self.route(target, payload, priority).await
    }

    async fn route(&self, target: &AgentId, payload: TaskPayload, priority: i32) -> Result<TaskId, CoordinationError> {
        let task = Task::new(target.clone(), payload, priority);
        self.inner.router.route(&task).await?;
        metrics::counter!("fleet_tasks_published_total").increment(1);
        info!(
            task_id = %task.task_id,
            from = %self.inner.agent_id,
            to = %target,
            task_type = task.task_type().unwrap_or_default(),
            priority,
            "Task published"
        );
        Ok(task.task_id)
    }

    pub async fn broadcast(&self, envelope: &BroadcastEnvelope) -> Result<usize, CoordinationError> {
        self.inner.router.broadcast(envelope).await
    }

    pub async fn publish_status(&self) -> Result<AgentStatus, CoordinationError> {
        self.inner.publish_status().await
    }

    /// Status this agent would publish right now.
    pub fn status_snapshot(&self) -> AgentStatus {
        self.inner.status_snapshot()
    }

    /// Every readable `agent:*:status` record, sorted by agent id. Records
    /// with a missing or malformed `data` field are skipped.
    pub async fn get_all_agent_statuses(&self) -> Result<Vec<AgentStatus>, CoordinationError> {
        let mut statuses = Vec::new();
        for key in self.inner.connection.keys(AGENT_STATUS_PATTERN).await? {
            let Some(data) = self.inner.connection.hget(&key, STATUS_FIELD_DATA).await? else {
                debug!(%key, "Skipping status record without data");
                continue;
            };
            match serde_json::from_str::<AgentStatus>(&data) {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(%key, error = %e, "Skipping malformed status record"),
            }
        }
        statuses.sort_by(|a, b| a.agent_id.as_str().cmp(b.agent_id.as_str()));
        Ok(statuses)
    }

    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>, CoordinationError> {
        self.inner.registry.get_status(task_id).await
    }

    /// Poll the registry every `poll` until `task_id` is terminal or `timeout`
    /// passes.
    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        timeout: Duration,
        poll: Duration,
    ) -> Result<TaskOutcome, CoordinationError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.inner.registry.get_status(task_id).await?;
            if let Some(status) = status.filter(TaskStatus::is_terminal) {
                return Ok(TaskOutcome::Finished(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(TaskOutcome::TimedOut(status));
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Republish this agent's status every `interval` until disconnect.
    pub async fn spawn_status_loop(&self, interval: Duration) -> Result<(), CoordinationError> {
        let mut running = self.inner.running.lock().await;
        let Some(running) = running.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };

        let inner = self.inner.clone();
        let cancel = running.cancel.clone();
        running.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.publish_status().await {
                            warn!(agent_id = %inner.agent_id, error = %e, "Periodic status publish failed");
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    /// Write the activity heartbeat every `interval` until disconnect.
    pub async fn spawn_heartbeat_loop(&self, interval: Duration) -> Result<(), CoordinationError> {
        let mut running = self.inner.running.lock().await;
        let Some(running) = running.as_mut() else {
            return Err(ConnectionError::NotConnected.into());
        };
        let handle = self
            .inner
            .activity
            .spawn_heartbeat_loop(interval, running.cancel.clone());
        running.tasks.push(handle);
        Ok(())
    }

    /// Completes once a `shutdown` broadcast has been received on the
    /// current connection.
    pub fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.shutdown.read().clone().cancelled_owned()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown.read().is_cancelled()
    }
}

async fn run_loop<F, Fut>(inner: Arc<Inner>, mut subscription: Subscription, cancel: CancellationToken, on_message: F)
where
    F: Fn(Arc<Inner>, String) -> Fut,
    Fut: Future<Output = ()>,
{
    let topic = subscription.topic().to_string();
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = subscription.next_message() => message,
        };
        let Some(message) = message else {
            debug!(agent_id = %inner.agent_id, %topic, "Subscription closed");
            break;
        };
        on_message(inner.clone(), message.payload).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

impl Inner {
    /// Update the status record and the activity heartbeat together.
    fn set_state(&self, state: AgentState, current_task: Option<TaskId>) {
        {
            let mut snapshot = self.snapshot.write();
            snapshot.state = state;
            snapshot.current_task = current_task;
        }
        self.activity.set_status(state.as_str());
    }

    fn rearm_shutdown(&self) {
        let mut shutdown = self.shutdown.write();
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
    }

    async fn finish_disconnect(self: Arc<Self>, tasks: Vec<JoinHandle<()>>) {
        for handle in tasks {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(agent_id = %self.agent_id, "Coordinator loop panicked");
                }
            }
        }

        self.set_state(AgentState::Offline, None);
        if let Err(e) = self.publish_status().await {
            debug!(agent_id = %self.agent_id, error = %e, "Could not publish offline status");
        }

        self.connection.disconnect().await;
        info!(agent_id = %self.agent_id, "Coordinator disconnected");
    }

    fn status_snapshot(&self) -> AgentStatus {
        let snapshot = self.snapshot.read().clone();
        AgentStatus {
            agent_id: self.agent_id.clone(),
            status: snapshot.state,
            current_task: snapshot.current_task,
            tasks_completed: snapshot.tasks_completed,
            uptime: self.started_at.elapsed().as_secs(),
            last_seen: Utc::now(),
        }
    }

    async fn publish_status(&self) -> Result<AgentStatus, CoordinationError> {
        let status = self.status_snapshot();
        let fields = vec![
            (STATUS_FIELD_DATA.to_string(), serde_json::to_string(&status)?),
            (STATUS_FIELD_LAST_UPDATED.to_string(), format_timestamp(status.last_seen)),
        ];
        self.connection.hset(&status_key(&self.agent_id), &fields).await?;
        debug!(agent_id = %self.agent_id, status = status.status.as_str(), "Status published");
        Ok(status)
    }

    async fn on_task_message(self: Arc<Self>, payload: String) {
        self.activity.record_message();

        let task: Task = match serde_json::from_str(&payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Dropping malformed task message");
                metrics::counter!("fleet_messages_dropped_total").increment(1);
                self.activity.record_error();
                return;
            }
        };

        match self.registry.get_status(&task.task_id).await {
            Ok(Some(status)) if status != TaskStatus::Pending => {
                warn!(task_id = %task.task_id, %status, "Ignoring redelivered task that already left pending");
                metrics::counter!("fleet_messages_dropped_total").increment(1);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Could not read task status before dispatch");
            }
        }

        if let Err(e) = self.registry.update_status(&task.task_id, TaskStatus::InProgress).await {
            error!(task_id = %task.task_id, error = %e, "Could not mark task in progress; dropping");
            self.activity.record_error();
            return;
        }

        let task_id = task.task_id.clone();
        self.set_state(AgentState::Busy, Some(task_id.clone()));
        if let Err(e) = self.publish_status().await {
            debug!(agent_id = %self.agent_id, error = %e, "Busy status not published");
        }

        let final_status = match self.dispatch(task).await {
            Ok(()) => {
                metrics::counter!("fleet_tasks_completed_total").increment(1);
                self.activity.record_task_completed();
                self.snapshot.write().tasks_completed += 1;
                info!(%task_id, "Task completed");
                TaskStatus::Completed
            }
            Err(e) => {
                metrics::counter!("fleet_tasks_failed_total").increment(1);
                self.activity.record_error();
                match &e {
                    CoordinationError::UnknownTaskType(_) | CoordinationError::InvalidPayload(_) => {
                        warn!(%task_id, error = %e, "Task cannot be dispatched")
                    }
                    _ => error!(%task_id, error = %e, "Task failed"),
                }
                TaskStatus::Failed
            }
        };

        // Agent status goes out before the terminal task status, so anyone who
        // observes the task finished also sees the updated counters.
        self.set_state(AgentState::Online, None);
        if let Err(e) = self.publish_status().await {
            debug!(agent_id = %self.agent_id, error = %e, "Idle status not published");
        }

        if let Err(e) = self
            .registry
            .advance(&task_id, TaskStatus::InProgress, final_status)
            .await
        {
            error!(%task_id, status = %final_status, error = %e, "Could not record final task status");
        }
    }

    async fn dispatch(&self, task: Task) -> Result<(), CoordinationError> {
        let task_type = task
            .task_type()
            .map(str::to_string)
            .ok_or(InvalidPayload::MissingType)?;
        let handler = self
            .handlers
            .get(&task_type)
            .ok_or_else(|| CoordinationError::UnknownTaskType(task_type.clone()))?;

        debug!(task_id = %task.task_id, %task_type, "Dispatching task");
        match AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CoordinationError::Handler {
                task_type,
                message: format!("{:#}", e),
            }),
            Err(panic) => Err(CoordinationError::Handler {
                task_type,
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn on_broadcast_message(self: Arc<Self>, payload: String) {
        self.activity.record_message();

        let envelope: BroadcastEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(agent_id = %self.agent_id, error = %e, "Dropping malformed broadcast");
                metrics::counter!("fleet_messages_dropped_total").increment(1);
                return;
            }
        };

        match envelope.command() {
            Some(ControlCommand::Shutdown { reason }) => {
                info!(
                    agent_id = %self.agent_id,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "Shutdown broadcast received"
                );
                self.shutdown.read().cancel();
            }
            Some(ControlCommand::StatusCheck) => {
                if let Err(e) = self.publish_status().await {
                    warn!(agent_id = %self.agent_id, error = %e, "Status check reply failed");
                }
            }
            None => debug!(agent_id = %self.agent_id, kind = %envelope.kind, "Ignoring unknown broadcast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::infrastructure::memory_broker::MemoryBroker;
    use serde_json::json;

    async fn coordinator(broker: &MemoryBroker, agent: &str) -> Coordinator {
        let connection = Arc::new(BrokerConnection::new(Arc::new(broker.clone())));
        let coordinator = Coordinator::new(AgentId::new(agent).unwrap(), connection);
        coordinator.connect().await.unwrap();
        coordinator
    }

    async fn wait(coordinator: &Coordinator, task_id: &TaskId) -> TaskOutcome {
        coordinator
            .wait_for_terminal(task_id, Duration::from_secs(5), Duration::from_millis(10))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_twice_is_noop_and_announces_online() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        a.connect().await.unwrap();

        let statuses = a.get_all_agent_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, AgentState::Online);

        // One task loop only: a single message is handled exactly once.
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        a.register_fn("ping", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });
        let id = a.publish_task_default(a.agent_id(), json!({"type": "ping"})).await.unwrap();
        assert_eq!(wait(&a, &id).await, TaskOutcome::Finished(TaskStatus::Completed));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_rejects_payload_without_type() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let err = a
            .publish_task_default(a.agent_id(), json!({"target": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidPayload(_)));
        let err = a.publish_task_default(a.agent_id(), json!("build")).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_handler_panic_marks_task_failed() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        a.register_fn("boom", |task| async move {
            if task.priority >= 0 {
                panic!("kaboom");
            }
            Ok(())
        });
        a.register_fn("ok", |_| async move { Ok(()) });

        let failed = a.publish_task_default(a.agent_id(), json!({"type": "boom"})).await.unwrap();
        assert_eq!(wait(&a, &failed).await, TaskOutcome::Finished(TaskStatus::Failed));

        // The loop survives the panic.
        let ok = a.publish_task_default(a.agent_id(), json!({"type": "ok"})).await.unwrap();
        assert_eq!(wait(&a, &ok).await, TaskOutcome::Finished(TaskStatus::Completed));
        assert_eq!(a.status_snapshot().tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_redelivered_terminal_task_is_not_rerun() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        a.register_fn("once", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });

        let id = a.publish_task_default(a.agent_id(), json!({"type": "once"})).await.unwrap();
        assert_eq!(wait(&a, &id).await, TaskOutcome::Finished(TaskStatus::Completed));

        let record = a.registry().get(&id).await.unwrap().unwrap();
        let raw = serde_json::to_string(&record.task).unwrap();
        a.connection().publish(&task_channel(a.agent_id()), &raw).await.unwrap();
        a.connection()
            .publish(&task_channel(a.agent_id()), "{\"garbage\":true}")
            .await
            .unwrap();

        // A follow-up task proves both messages above were consumed.
        let next = a.publish_task_default(a.agent_id(), json!({"type": "once"})).await.unwrap();
        assert_eq!(wait(&a, &next).await, TaskOutcome::Finished(TaskStatus::Completed));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(a.get_task_status(&id).await.unwrap(), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_shutdown_broadcast_trips_signal_without_disconnecting() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let b = coordinator(&broker, "B").await;
        assert!(!a.is_shutdown_requested());

        let receivers = b
            .broadcast(&BroadcastEnvelope::shutdown(Some("maintenance".into())))
            .await
            .unwrap();
        assert_eq!(receivers, 2);

        tokio::time::timeout(Duration::from_secs(5), a.shutdown_requested())
            .await
            .unwrap();
        assert!(a.is_running().await);
    }

    #[tokio::test]
    async fn test_shutdown_signal_is_rearmed_on_reconnect() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let b = coordinator(&broker, "B").await;

        b.broadcast(&BroadcastEnvelope::shutdown(None)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), a.shutdown_requested())
            .await
            .unwrap();

        a.disconnect().await;
        a.connect().await.unwrap();
        assert!(!a.is_shutdown_requested());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), a.shutdown_requested())
                .await
                .is_err()
        );

        b.broadcast(&BroadcastEnvelope::shutdown(None)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), a.shutdown_requested())
            .await
            .unwrap();
        assert!(a.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_disconnect_from_handler_finishes_task_and_closes() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let observer = coordinator(&broker, "observer").await;

        let me = a.clone();
        a.register_fn("leave", move |_| {
            let me = me.clone();
            async move {
                me.disconnect().await;
                Ok(())
            }
        });

        let id = observer
            .publish_task_default(a.agent_id(), json!({"type": "leave"}))
            .await
            .unwrap();
        assert_eq!(wait(&observer, &id).await, TaskOutcome::Finished(TaskStatus::Completed));

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while a.connection().is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(closed.is_ok(), "broker connection was never closed");
        assert!(!a.is_running().await);

        let statuses = observer.get_all_agent_statuses().await.unwrap();
        let a_status = statuses.iter().find(|s| s.agent_id.as_str() == "A").unwrap();
        assert_eq!(a_status.status, AgentState::Offline);
        assert_eq!(a_status.tasks_completed, 1);
        assert_eq!(a.activity().snapshot().status, "offline");
    }

    #[tokio::test]
    async fn test_disconnect_publishes_offline_and_is_idempotent() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let observer = coordinator(&broker, "observer").await;
        a.spawn_status_loop(Duration::from_secs(60)).await.unwrap();

        a.disconnect().await;
        a.disconnect().await;
        assert!(!a.is_running().await);
        assert!(!a.connection().is_connected());

        let statuses = observer.get_all_agent_statuses().await.unwrap();
        let a_status = statuses.iter().find(|s| s.agent_id.as_str() == "A").unwrap();
        assert_eq!(a_status.status, AgentState::Offline);

        let err = a.spawn_status_loop(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_wait_for_terminal_times_out_on_pending() {
        let broker = MemoryBroker::new();
        let a = coordinator(&broker, "A").await;
        let id = a
            .publish_task_default(&AgentId::new("ghost").unwrap(), json!({"type": "build"}))
            .await
            .unwrap();
        let outcome = a
            .wait_for_terminal(&id, Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::TimedOut(Some(TaskStatus::Pending)));
    }
}
