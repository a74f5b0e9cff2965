// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lock Manager
//!
//! Distributed mutual-exclusion leases built on the broker's atomic
//! set-if-absent-with-expiry.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** `acquire`/`release` of `lock:<resource>` keys on behalf of one agent

use fleet_core::domain::agent::AgentId;
use fleet_core::domain::keys::lock_key;
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{CoordinationError, LockLease, DEFAULT_LOCK_TTL};

/// Acquires and releases leases in the name of a single agent.
///
/// `acquire` is a single non-blocking attempt; waiting is the caller's
/// business (or use [`LockManager::acquire_with_retry`]).
#[derive(Clone)]
pub struct LockManager {
    agent_id: AgentId,
    connection: Arc<BrokerConnection>,
}

impl LockManager {
    pub fn new(agent_id: AgentId, connection: Arc<BrokerConnection>) -> Self {
        Self {
            agent_id,
            connection,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Try once to take `resource` for `ttl`. Returns `true` iff this call
    /// created the lease.
    pub async fn acquire(&self, resource: &str, ttl: Duration) -> Result<bool, CoordinationError> {
        if ttl.is_zero() {
            return Err(CoordinationError::InvalidLockTtl(ttl));
        }

        let acquired = self
            .connection
            .set_nx_ex(&lock_key(resource), self.agent_id.as_str(), ttl)
            .await?;

        if acquired {
            metrics::counter!("fleet_locks_acquired_total").increment(1);
            info!(agent_id = %self.agent_id, resource, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
        } else {
            metrics::counter!("fleet_lock_contention_total").increment(1);
            debug!(agent_id = %self.agent_id, resource, "Lock already held");
        }
        Ok(acquired)
    }

    pub async fn acquire_default(&self, resource: &str) -> Result<bool, CoordinationError> {
        self.acquire(resource, DEFAULT_LOCK_TTL).await
    }

    /// Release `resource` if and only if this agent holds it.
    ///
    /// Releasing a lease held by someone else (or nobody) does nothing and
    /// returns `false`. The compare and the delete happen in one broker
    /// operation.
    pub async fn release(&self, resource: &str) -> Result<bool, CoordinationError> {
        let released = self
            .connection
            .del_if_eq(&lock_key(resource), self.agent_id.as_str())
            .await?;

        if released {
            info!(agent_id = %self.agent_id, resource, "Lock released");
        } else {
            debug!(agent_id = %self.agent_id, resource, "Release skipped: lock not held by this agent");
        }
        Ok(released)
    }

    /// Current lease on `resource`, if any.
    pub async fn holder(&self, resource: &str) -> Result<Option<LockLease>, CoordinationError> {
        let held_by = self.connection.get(&lock_key(resource)).await?;
        Ok(held_by.map(|held_by| LockLease {
            resource: resource.to_string(),
            held_by,
        }))
    }

    /// Repeat [`acquire`](Self::acquire) every `backoff` until it succeeds or
    /// `timeout` elapses. Lock waiters are not queued, so there is no
    /// fairness between competing retry loops.
    pub async fn acquire_with_retry(
        &self,
        resource: &str,
        ttl: Duration,
        timeout: Duration,
        backoff: Duration,
    ) -> Result<bool, CoordinationError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.acquire(resource, ttl).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(agent_id = %self.agent_id, resource, "Gave up waiting for lock");
                return Ok(false);
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::infrastructure::memory_broker::MemoryBroker;

    async fn manager(broker: &MemoryBroker, agent: &str) -> LockManager {
        let connection = Arc::new(BrokerConnection::new(Arc::new(broker.clone())));
        connection.connect().await.unwrap();
        LockManager::new(AgentId::new(agent).unwrap(), connection)
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let broker = MemoryBroker::new();
        let a = manager(&broker, "A").await;
        let b = manager(&broker, "B").await;

        assert!(a.acquire_default("workspace").await.unwrap());
        assert!(!b.acquire_default("workspace").await.unwrap());
        assert!(!a.acquire_default("workspace").await.unwrap());

        let lease = b.holder("workspace").await.unwrap().unwrap();
        assert!(lease.is_held_by("A"));
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_noop() {
        let broker = MemoryBroker::new();
        let a = manager(&broker, "A").await;
        let b = manager(&broker, "B").await;

        assert!(a.acquire_default("workspace").await.unwrap());
        assert!(!b.release("workspace").await.unwrap());
        assert!(a.holder("workspace").await.unwrap().unwrap().is_held_by("A"));

        assert!(a.release("workspace").await.unwrap());
        assert!(a.holder("workspace").await.unwrap().is_none());
        assert!(!a.release("workspace").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let broker = MemoryBroker::new();
        let a = manager(&broker, "A").await;
        assert!(matches!(
            a.acquire("r", Duration::ZERO).await,
            Err(CoordinationError::InvalidLockTtl(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnected_manager_surfaces_connection_error() {
        let connection = Arc::new(BrokerConnection::new(Arc::new(MemoryBroker::new())));
        let manager = LockManager::new(AgentId::new("A").unwrap(), connection);
        let err = manager.acquire_default("r").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_cannot_be_released_by_former_holder() {
        let broker = MemoryBroker::new();
        let a = manager(&broker, "A").await;
        let b = manager(&broker, "B").await;

        assert!(a.acquire("workspace", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(b.acquire("workspace", Duration::from_secs(5)).await.unwrap());
        assert!(!a.release("workspace").await.unwrap());
        assert!(b.holder("workspace").await.unwrap().unwrap().is_held_by("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_retry_waits_for_expiry() {
        let broker = MemoryBroker::new();
        let a = manager(&broker, "A").await;
        let b = manager(&broker, "B").await;

        assert!(a.acquire("db", Duration::from_secs(2)).await.unwrap());
        let acquired = b
            .acquire_with_retry(
                "db",
                Duration::from_secs(10),
                Duration::from_secs(5),
                Duration::from_millis(250),
            )
            .await
            .unwrap();
        assert!(acquired);
        assert!(b.holder("db").await.unwrap().unwrap().is_held_by("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_retry_times_out() {
        let broker = MemoryBroker::new();
        let a = manager(&broker, "A").await;
        let b = manager(&broker, "B").await;

        assert!(a.acquire("db", Duration::from_secs(60)).await.unwrap());
        let acquired = b
            .acquire_with_retry(
                "db",
                Duration::from_secs(10),
                Duration::from_secs(1),
                Duration::from_millis(100),
            )
            .await
            .unwrap();
        assert!(!acquired);
    }
}
