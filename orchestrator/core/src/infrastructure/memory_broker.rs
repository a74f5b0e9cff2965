// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Broker - Shared Key-Value Store with Pub/Sub
//
// Every handle opened from one MemoryBroker shares the same store, so
// coordinators in the same process see each other's keys and messages.
//
// - Individual operations are serialized under one mutex
// - TTLs are measured on the tokio clock and expire lazily on access
// - Each subscription gets an unbounded FIFO queue (no drops, publish order kept)

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::broker::{
    BrokerBackend, BrokerHandle, BrokerMessage, ConnectionError, Subscription,
};
use crate::infrastructure::pattern::GlobPattern;

/// URL scheme served by [`MemoryBroker`].
pub const MEMORY_SCHEME: &str = "memory";

#[derive(Debug)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

enum Topic {
    Channel(String),
    Pattern(GlobPattern),
}

struct Subscriber {
    handle_id: u64,
    topic: Topic,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

#[derive(Default)]
struct Store {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
    subscribers: Vec<Subscriber>,
}

impl Store {
    /// Look up a string key, evicting it first if its TTL has passed.
    fn live_string(&mut self, key: &str, now: Instant) -> Option<&StringEntry> {
        let expired = self.strings.get(key).is_some_and(|entry| !entry.is_live(now));
        if expired {
            trace!(key, "Evicting expired key");
            self.strings.remove(key);
        }
        self.strings.get(key)
    }

    fn purge_expired(&mut self, now: Instant) {
        self.strings.retain(|_, entry| entry.is_live(now));
    }
}

/// Process-local broker backend.
#[derive(Clone)]
pub struct MemoryBroker {
    name: String,
    store: Arc<Mutex<Store>>,
    next_handle: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::named("default")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(Mutex::new(Store::default())),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Build a broker from a `memory://<name>` URL.
    pub fn from_url(url: &str) -> Result<Self, ConnectionError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConnectionError::InvalidUrl(url.to_string()))?;
        if scheme != MEMORY_SCHEME {
            return Err(ConnectionError::UnsupportedScheme(scheme.to_string()));
        }
        let name = rest.trim_end_matches('/');
        Ok(Self::named(if name.is_empty() { "default" } else { name }))
    }

    /// Open a concrete handle (the trait method returns it type-erased).
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            id: self.next_handle.fetch_add(1, Ordering::Relaxed),
            store: self.store.clone(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerBackend for MemoryBroker {
    async fn open(&self) -> Result<Arc<dyn BrokerHandle>, ConnectionError> {
        let handle = self.handle();
        debug!(broker = %self.name, handle = handle.id, "Opened memory broker handle");
        Ok(Arc::new(handle))
    }

    fn describe(&self) -> String {
        format!("{}://{}", MEMORY_SCHEME, self.name)
    }
}

/// One connection onto a [`MemoryBroker`] store.
pub struct MemoryHandle {
    id: u64,
    store: Arc<Mutex<Store>>,
    closed: AtomicBool,
}

impl MemoryHandle {
    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ConnectionError::Closed)
        } else {
            Ok(())
        }
    }

    fn register(&self, topic: Topic, label: &str) -> Result<Subscription, ConnectionError> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.store.lock().subscribers.push(Subscriber {
            handle_id: self.id,
            topic,
            sender,
        });
        debug!(handle = self.id, topic = label, "Subscribed");
        Ok(Subscription::new(label, receiver))
    }
}

#[async_trait]
impl BrokerHandle for MemoryHandle {
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, ConnectionError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.store.lock();
        if store.live_string(key, now).is_some() || store.hashes.contains_key(key) {
            return Ok(false);
        }
        store.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ConnectionError> {
        self.ensure_open()?;
        let mut store = self.store.lock();
        Ok(store
            .live_string(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let mut store = self.store.lock();
        store.hashes.remove(key);
        store.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, ConnectionError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut store = self.store.lock();
        let had_string = store.live_string(key, now).is_some();
        store.strings.remove(key);
        let had_hash = store.hashes.remove(key).is_some();
        Ok(had_string || had_hash)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, ConnectionError> {
        self.ensure_open()?;
        let mut store = self.store.lock();
        let matches = store
            .live_string(key, Instant::now())
            .is_some_and(|entry| entry.value == expected);
        if matches {
            store.strings.remove(key);
        }
        Ok(matches)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let mut store = self.store.lock();
        store.strings.remove(key);
        let hash = store.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, ConnectionError> {
        self.ensure_open()?;
        let store = self.store.lock();
        Ok(store.hashes.get(key).and_then(|hash| hash.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, ConnectionError> {
        self.ensure_open()?;
        let store = self.store.lock();
        Ok(store.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, ConnectionError> {
        self.ensure_open()?;
        let glob = GlobPattern::new(pattern)?;
        let mut store = self.store.lock();
        store.purge_expired(Instant::now());
        let mut keys: Vec<String> = store
            .strings
            .keys()
            .chain(store.hashes.keys())
            .filter(|key| glob.matches(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, ConnectionError> {
        self.ensure_open()?;
        let mut store = self.store.lock();
        let mut delivered = 0;
        store.subscribers.retain(|subscriber| {
            let pattern = match &subscriber.topic {
                Topic::Channel(name) if name == channel => None,
                Topic::Pattern(glob) if glob.matches(channel) => Some(glob.as_str().to_string()),
                _ => return true,
            };
            let message = BrokerMessage {
                channel: channel.to_string(),
                pattern,
                payload: payload.to_string(),
            };
            // A failed send means the Subscription was dropped; forget it.
            match subscriber.sender.send(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        drop(store);
        metrics::counter!("fleet_broker_messages_published_total").increment(1);
        trace!(channel, delivered, "Published message");
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, ConnectionError> {
        self.register(Topic::Channel(channel.to_string()), channel)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, ConnectionError> {
        self.register(Topic::Pattern(GlobPattern::new(pattern)?), pattern)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the senders ends every Subscription opened on this handle.
        self.store
            .lock()
            .subscribers
            .retain(|subscriber| subscriber.handle_id != self.id);
        debug!(handle = self.id, "Closed memory broker handle");
    }
}
