// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker Connection
//!
//! Owns the pair of handles an agent uses to talk to the broker: a command
//! handle for key-value and publish operations, and a duplicated subscriber
//! handle for channel delivery.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Lifecycle (`connect`/`disconnect`) and operation gating
//! - **Pattern:** Adapter over a pluggable [`BrokerBackend`]
//!
//! Connections are constructed explicitly and passed to whoever needs them;
//! there is no process-wide connection.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::broker::{BrokerBackend, BrokerHandle, ConnectionError, Subscription};

#[derive(Clone)]
struct Handles {
    command: Arc<dyn BrokerHandle>,
    subscriber: Arc<dyn BrokerHandle>,
}

pub struct BrokerConnection {
    backend: Arc<dyn BrokerBackend>,
    handles: RwLock<Option<Handles>>,
    /// Serializes connect/disconnect.
    lifecycle: Mutex<()>,
}

impl BrokerConnection {
    pub fn new(backend: Arc<dyn BrokerBackend>) -> Self {
        Self {
            backend,
            handles: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Open both handles. A second call on a live connection is a no-op.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.lifecycle.lock().await;
        if self.handles.read().is_some() {
            return Ok(());
        }

        let command = self.backend.open().await?;
        let subscriber = match self.backend.open().await {
            Ok(handle) => handle,
            Err(e) => {
                command.close().await;
                return Err(e);
            }
        };

        *self.handles.write() = Some(Handles { command, subscriber });
        info!(broker = %self.backend.describe(), "Connected to broker");
        Ok(())
    }

    /// Close both handles, ending every subscription. Idempotent.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        let handles = self.handles.write().take();
        if let Some(handles) = handles {
            handles.subscriber.close().await;
            handles.command.close().await;
            info!(broker = %self.backend.describe(), "Disconnected from broker");
        } else {
            debug!("Disconnect requested on a connection that is not open");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handles.read().is_some()
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    fn command(&self) -> Result<Arc<dyn BrokerHandle>, ConnectionError> {
        self.handles
            .read()
            .as_ref()
            .map(|h| h.command.clone())
            .ok_or(ConnectionError::NotConnected)
    }

    fn subscriber(&self) -> Result<Arc<dyn BrokerHandle>, ConnectionError> {
        self.handles
            .read()
            .as_ref()
            .map(|h| h.subscriber.clone())
            .ok_or(ConnectionError::NotConnected)
    }

    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, ConnectionError> {
        self.command()?.set_nx_ex(key, value, ttl).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ConnectionError> {
        self.command()?.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), ConnectionError> {
        self.command()?.set(key, value).await
    }

    pub async fn del(&self, key: &str) -> Result<bool, ConnectionError> {
        self.command()?.del(key).await
    }

    pub async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, ConnectionError> {
        self.command()?.del_if_eq(key, expected).await
    }

    pub async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), ConnectionError> {
        self.command()?.hset(key, fields).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, ConnectionError> {
        self.command()?.hget(key, field).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, ConnectionError> {
        self.command()?.hgetall(key).await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, ConnectionError> {
        self.command()?.keys(pattern).await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize, ConnectionError> {
        self.command()?.publish(channel, payload).await
    }

    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, ConnectionError> {
        self.subscriber()?.subscribe(channel).await
    }

    pub async fn psubscribe(&self, pattern: &str) -> Result<Subscription, ConnectionError> {
        self.subscriber()?.psubscribe(pattern).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_broker::MemoryBroker;
    use async_trait::async_trait;

    fn connection(broker: &MemoryBroker) -> BrokerConnection {
        BrokerConnection::new(Arc::new(broker.clone()))
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let conn = connection(&MemoryBroker::new());

        assert_eq!(conn.get("k").await, Err(ConnectionError::NotConnected));
        assert!(matches!(
            conn.subscribe("agent:broadcast").await,
            Err(ConnectionError::NotConnected)
        ));

        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        conn.set("k", "v").await.unwrap();
        assert_eq!(conn.get("k").await.unwrap(), Some("v".to_string()));

        conn.disconnect().await;
        conn.disconnect().await;
        assert!(!conn.is_connected());
        assert_eq!(conn.publish("c", "m").await, Err(ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscriptions() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);
        conn.connect().await.unwrap();
        let mut sub = conn.subscribe("agent:A:tasks").await.unwrap();

        conn.disconnect().await;
        assert!(sub.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_connections_share_backend_state() {
        let broker = MemoryBroker::new();
        let a = connection(&broker);
        let b = connection(&broker);
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut sub = b.subscribe("agent:broadcast").await.unwrap();
        assert_eq!(a.publish("agent:broadcast", "ping").await.unwrap(), 1);
        assert_eq!(sub.next_message().await.unwrap().payload, "ping");

        a.set("shared", "1").await.unwrap();
        assert_eq!(b.get("shared").await.unwrap(), Some("1".to_string()));
    }

    struct Unreachable;

    #[async_trait]
    impl BrokerBackend for Unreachable {
        async fn open(&self) -> Result<Arc<dyn BrokerHandle>, ConnectionError> {
            Err(ConnectionError::Backend("connection refused".into()))
        }

        fn describe(&self) -> String {
            "unreachable://".into()
        }
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_connection_error() {
        let conn = BrokerConnection::new(Arc::new(Unreachable));
        assert!(matches!(conn.connect().await, Err(ConnectionError::Backend(_))));
        assert!(!conn.is_connected());
    }
}
