// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Domain types shared by every fleet crate.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agents, tasks, control messages, broker contract, node config

pub mod agent;
pub mod broker;
pub mod events;
pub mod keys;
pub mod node_config;
pub mod task;
