// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task handlers and the per-coordinator handler table.
//!
//! Handlers are keyed by the payload's `type` tag. Registering a second
//! handler for the same tag replaces the first without error.

use anyhow::Context;
use async_trait::async_trait;
use fleet_core::domain::task::{Task, TypedTask};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Local worker for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, task: Task) -> anyhow::Result<()> {
        (self.0)(task).await
    }
}

/// Wrap an async closure taking the raw [`Task`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct TypedHandler<T, F> {
    f: F,
    _task: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> TaskHandler for TypedHandler<T, F>
where
    T: TypedTask,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, task: Task) -> anyhow::Result<()> {
        let typed: T = task
            .payload
            .decode()
            .with_context(|| format!("payload of task {} is not a valid '{}'", task.task_id, T::TYPE))?;
        (self.f)(typed).await
    }
}

/// Wrap an async closure taking the decoded payload struct.
pub fn typed_handler<T, F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    T: TypedTask,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(TypedHandler {
        f,
        _task: PhantomData,
    })
}

#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`, returning the handler it replaced.
    pub fn register(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        let task_type = task_type.into();
        let previous = self.handlers.write().insert(task_type.clone(), handler);
        if previous.is_some() {
            debug!(%task_type, "Replaced existing task handler");
        } else {
            debug!(%task_type, "Registered task handler");
        }
        previous
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}
