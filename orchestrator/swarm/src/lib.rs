// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `fleet-swarm` - Multi-Agent Coordination Crate
//!
//! Task routing, task status tracking, distributed locks and agent presence
//! for a fleet of agents sharing one broker.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `CoordinationError`, `LockLease` |
//! | [`application`] | Application | `Coordinator`, `LockManager`, `TaskRegistry`, `TaskRouter`, activity reporting |
//!
//! ## Key Concepts
//!
//! - **Task**: a JSON payload with a `type` tag, routed to exactly one agent's
//!   channel and tracked in the registry as `pending → in_progress → completed | failed`.
//! - **Lock**: a lease on `lock:<resource>` held by one agent until release or TTL expiry.
//! - **Broadcast**: control envelopes (`shutdown`, `status_check`) seen by every
//!   connected coordinator.
//!
//! Delivery is best-effort pub/sub. A task sent while its target is not
//! subscribed stays `pending` forever; callers observe this by polling.

pub mod application;
pub mod domain;

pub use application::*;
pub use domain::*;
