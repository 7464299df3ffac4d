//! Shared store trait definition
//!
//! This module defines the `SharedStore` trait every store adapter
//! implements, plus the `Subscription` handed out by `subscribe`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::StoreResult;

/// Number of undelivered messages buffered per subscription
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// Receiving end of a channel subscription
///
/// Messages published to the channel after `subscribe` returned are
/// delivered in publish order. Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// Channel this subscription listens on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload
    ///
    /// Returns `None` once the store side of the subscription is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Key/value store shared by every instance of the fleet
///
/// The store offers hash-per-key semantics, an atomic counter and
/// publish/subscribe messaging. It is the only resource mutated across
/// instances; each instance only writes its own keys.
///
/// ## Guarantees
///
/// - Last write wins per hash field
/// - No transactional guarantees across keys
/// - Transport failures are returned as `StoreError::Unavailable`
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// reporter, the command bus and request handlers.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Set the given fields of the hash at `key`, leaving other fields intact
    async fn set_fields(&self, key: &str, fields: &HashMap<String, String>) -> StoreResult<()>;

    /// Read every field of the hash at `key`
    ///
    /// A missing key yields an empty map.
    async fn get_all_fields(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Atomically increment the counter at `key` and return the new value
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Publish `payload` on `channel`
    ///
    /// Returns the number of subscribers the message was handed to. Delivery
    /// is fire-and-forget: there is no acknowledgement from the receivers.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize>;

    /// Subscribe to `channel`
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}
