// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lock Leases
//!
//! A lease is a TTL-bounded exclusive claim on a named resource, stored as
//! `lock:<resource>` holding the holder's agent id.
//!
//! # Invariants
//!
//! - At most one holder at any instant (acquisition is set-if-absent).
//! - Only the current holder can release; a former holder whose lease expired
//!   and was re-acquired by someone else cannot remove the new lease.
//! - Leases are never queued or renewed implicitly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TTL used when the caller does not pick one.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Snapshot of who currently holds a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockLease {
    /// Opaque identifier for the locked resource (e.g. a workspace path).
    pub resource: String,
    /// Agent id stored in the lease. Kept as a raw string because foreign
    /// tooling may write leases too.
    pub held_by: String,
}

impl LockLease {
    pub fn is_held_by(&self, agent_id: &str) -> bool {
        self.held_by == agent_id
    }
}
