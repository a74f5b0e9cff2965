// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Broker Interfaces
//!
//! Contract for the shared key-value/pub-sub store that agents coordinate
//! through. The domain layer only defines the traits; implementations live in
//! `crate::infrastructure`.
//!
//! | Trait | Role | Implementations |
//! |-------|------|----------------|
//! | [`BrokerBackend`] | Opens handles to a store | `MemoryBroker` |
//! | [`BrokerHandle`] | One duplex connection | `MemoryHandle` |
//!
//! A handle that is actively delivering subscription messages is not used
//! for commands; `BrokerConnection` therefore opens two handles per backend.

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub payload: String,
}

/// Ordered stream of messages for one channel or pattern subscription.
///
/// Ends (yields `None`) once the owning handle is closed.
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::UnboundedReceiver<BrokerMessage>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    /// The channel name or pattern this subscription was registered for.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next_message(&mut self) -> Option<BrokerMessage> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = BrokerMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Broker connectivity failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("broker connection is not established")]
    NotConnected,

    #[error("broker handle is closed")]
    Closed,

    #[error("unsupported broker URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid broker URL '{0}'")]
    InvalidUrl(String),

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("broker error: {0}")]
    Backend(String),
}

/// One duplex connection to the store.
#[async_trait]
pub trait BrokerHandle: Send + Sync {
    /// Set `key` to `value` with expiry only if the key does not exist.
    /// Returns `true` iff this call created the key.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, ConnectionError>;

    async fn get(&self, key: &str) -> Result<Option<String>, ConnectionError>;

    /// Unconditional set; clears any expiry on the key.
    async fn set(&self, key: &str, value: &str) -> Result<(), ConnectionError>;

    /// Delete a key of any kind. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, ConnectionError>;

    /// Delete a string key only if it currently holds `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, ConnectionError>;

    /// Write several hash fields in one atomic step, keeping other fields.
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), ConnectionError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, ConnectionError>;

    /// All fields of a hash; empty if the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, ConnectionError>;

    /// Live keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, ConnectionError>;

    /// Publish to a channel. Returns the number of subscriptions reached.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, ConnectionError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, ConnectionError>;

    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, ConnectionError>;

    /// Drop all subscriptions and refuse further operations. Idempotent.
    async fn close(&self);
}

/// Factory for handles onto one shared store.
#[async_trait]
pub trait BrokerBackend: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn BrokerHandle>, ConnectionError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}
