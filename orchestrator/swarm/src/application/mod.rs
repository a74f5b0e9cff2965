// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application services for fleet coordination.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Use cases built on [`fleet_core::infrastructure::broker_connection::BrokerConnection`]

pub mod activity;
pub mod coordinator;
pub mod handler;
pub mod lock_manager;
pub mod task_registry;
pub mod task_router;

pub use activity::{ActivityReader, ActivityReporter};
pub use coordinator::{Coordinator, TaskOutcome};
pub use handler::{handler_fn, typed_handler, HandlerTable, TaskHandler};
pub use lock_manager::LockManager;
pub use task_registry::{TaskRecord, TaskRegistry};
pub use task_router::TaskRouter;
