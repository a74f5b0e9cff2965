// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use fleet_core::domain::agent::AgentId;
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use fleet_core::infrastructure::memory_broker::MemoryBroker;
use fleet_swarm::application::{Coordinator, LockManager};
use std::sync::Arc;
use std::time::Duration;

async fn lock_manager(broker: &MemoryBroker, id: &str) -> LockManager {
    let connection = Arc::new(BrokerConnection::new(Arc::new(broker.clone())));
    connection.connect().await.unwrap();
    LockManager::new(AgentId::new(id).unwrap(), connection)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_concurrent_acquirer_wins() {
    let broker = MemoryBroker::new();
    let mut attempts = Vec::new();
    for n in 0..16 {
        let manager = lock_manager(&broker, &format!("agent-{n}")).await;
        attempts.push(tokio::spawn(async move {
            manager.acquire("shared-workspace", Duration::from_secs(30)).await.unwrap()
        }));
    }

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_non_holder_release_leaves_lock_for_holder() {
    let broker = MemoryBroker::new();
    let connection = Arc::new(BrokerConnection::new(Arc::new(broker.clone())));
    let a = Coordinator::new(AgentId::new("A").unwrap(), connection);
    a.connect().await.unwrap();
    let b = lock_manager(&broker, "B").await;

    let locks = a.locks();
    assert!(locks.acquire_default("db").await.unwrap());
    assert!(!b.release("db").await.unwrap());
    assert!(!b.acquire_default("db").await.unwrap());

    assert!(locks.release("db").await.unwrap());
    assert!(b.acquire_default("db").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_lock_expires_after_ttl() {
    let broker = MemoryBroker::new();
    let a = lock_manager(&broker, "A").await;
    let b = lock_manager(&broker, "B").await;

    assert!(a.acquire("deploy", Duration::from_secs(3)).await.unwrap());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!b.acquire("deploy", Duration::from_secs(3)).await.unwrap());

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert!(b.acquire("deploy", Duration::from_secs(3)).await.unwrap());
    assert!(b.holder("deploy").await.unwrap().unwrap().is_held_by("B"));
}
