// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `fleet-core` - Domain Types and Broker Plumbing
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `AgentId`, `AgentStatus`, `Task`, `TaskStatus`, broker traits, `NodeConfigManifest` |
//! | [`infrastructure`] | Infrastructure | `MemoryBroker`, `BrokerConnection`, glob patterns |
//!
//! The coordination layer itself (locks, task registry, routing, the
//! coordinator façade) lives in `fleet-swarm`.

pub mod domain;
pub mod infrastructure;

pub use domain::*;
