// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure implementations of the broker contract.
//!
//! - **memory_broker** - Process-local store, the default backend
//! - **broker_connection** - Command/subscriber handle pair with lifecycle
//! - **pattern** - Glob matching for scans and pattern subscriptions

pub mod broker_connection;
pub mod memory_broker;
pub mod pattern;

use std::sync::Arc;

use crate::domain::broker::{BrokerBackend, ConnectionError};
use memory_broker::MemoryBroker;

/// Resolve a broker URL to a backend.
///
/// Only `memory://<name>` is served; each call creates an independent
/// store, so share the returned backend between connections that must see
/// each other.
pub fn backend_from_url(url: &str) -> Result<Arc<dyn BrokerBackend>, ConnectionError> {
    Ok(Arc::new(MemoryBroker::from_url(url)?))
}
