//! Actor-based instance runtime
//!
//! Each instance runs two actors as independent async tasks, both sharing
//! the instance's `InstanceContext` and the shared store.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │  fleet-instance main │
//!                 └──────────┬───────────┘
//!                            │ spawns
//!              ┌─────────────┴─────────────┐
//!              │                           │
//!      ┌───────▼────────┐         ┌────────▼────────┐
//!      │ ReporterActor  │◀─notify─│ CommandBusActor │
//!      └───────┬────────┘         └────────▲────────┘
//!              │ HSET                      │ SUBSCRIBE instance:{id}
//!      ┌───────▼───────────────────────────┴────────┐
//!      │                Shared store                │
//!      └────────────────────────────────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **ReporterActor**: Writes heartbeat and resource snapshot every interval
//! - **CommandBusActor**: Executes instructions published to this instance
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Instructions**: Pub/sub messages through the shared store
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod command_bus;
pub mod messages;
pub mod reporter;
