//! In-memory shared store (no persistence)
//!
//! This store keeps hashes, counters and channel subscribers in the
//! current process. It's useful for:
//! - Testing without a running Redis
//! - Running several instances inside one process
//! - Simulating store outages (`set_available(false)`)
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: Only instances sharing the same `MemoryStore` see each other

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace, warn};

use super::backend::{SUBSCRIPTION_BUFFER, SharedStore, Subscription};
use super::error::{StoreError, StoreResult};

#[derive(Default)]
struct MemoryState {
    hashes: HashMap<String, HashMap<String, String>>,
    counters: HashMap<String, i64>,
    subscribers: HashMap<String, Vec<mpsc::Sender<String>>>,
}

/// In-memory shared store
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create a new, empty in-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability
    ///
    /// While unavailable every operation fails with `StoreError::Unavailable`.
    /// Data and subscriptions survive the outage.
    pub fn set_available(&self, available: bool) {
        debug!("in-memory store availability set to {available}");
        self.available.store(available, Ordering::SeqCst);
    }

    /// Close every subscription on `channel`, as a dropped connection would
    pub async fn close_subscriptions(&self, channel: &str) -> usize {
        let mut state = self.state.write().await;
        let closed = state.subscribers.remove(channel).map_or(0, |senders| senders.len());
        debug!("in-memory store: closed {closed} subscriptions on {channel}");
        closed
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn set_fields(&self, key: &str, fields: &HashMap<String, String>) -> StoreResult<()> {
        self.ensure_available()?;
        trace!("in-memory store: set {} fields on {key}", fields.len());

        let mut state = self.state.write().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }

        Ok(())
    }

    async fn get_all_fields(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.ensure_available()?;

        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.ensure_available()?;

        let mut state = self.state.write().await;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;

        Ok(*counter)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
        self.ensure_available()?;

        let mut state = self.state.write().await;
        let Some(senders) = state.subscribers.get_mut(channel) else {
            trace!("in-memory store: no subscribers on {channel}");
            return Ok(0);
        };

        senders.retain(|sender| !sender.is_closed());

        let mut delivered = 0;
        for sender in senders.iter() {
            match sender.try_send(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("in-memory store: subscriber on {channel} is full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.ensure_available()?;
        debug!("in-memory store: subscribing to {channel}");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut state = self.state.write().await;
        state
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        Ok(Subscription::new(channel, rx))
    }
}
