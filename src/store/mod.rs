//! Shared state store used to coordinate the fleet
//!
//! This module provides a trait-based abstraction over the key/value store
//! every instance reports into and reads from.
//!
//! ## Design
//!
//! - **Trait-based**: `SharedStore` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Own keys only**: each instance writes only the keys named after it
//!
//! ## Backends
//!
//! - **Redis** (default): networked store shared by all instances
//! - **In-Memory**: single-process store for tests and local runs
//!
//! ## Key Layout
//!
//! | Key                   | Type    | Content                          |
//! |-----------------------|---------|----------------------------------|
//! | `instance:{id}:info`  | hash    | `InstanceSnapshot` fields        |
//! | `server_heartbeats`   | hash    | instance id -> epoch ms          |
//! | `visitor_count`       | counter | aggregation request counter      |
//! | `instance:{id}`       | channel | `{"type": ...}` instructions     |

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use backend::{SharedStore, Subscription};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

/// Hash mapping instance id to its last heartbeat (epoch milliseconds)
pub const HEARTBEATS_KEY: &str = "server_heartbeats";

/// Global visitor counter
pub const VISITOR_COUNT_KEY: &str = "visitor_count";

/// Key of the snapshot hash of instance `id`
pub fn instance_info_key(id: &str) -> String {
    format!("instance:{id}:info")
}

/// Instruction channel of instance `id`
pub fn instance_channel(id: &str) -> String {
    format!("instance:{id}")
}
