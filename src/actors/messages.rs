//! Message types for actor communication
//!
//! This module defines the commands accepted by the instance actors and the
//! instruction format carried on the per-instance pub/sub channels.
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to a specific actor via mpsc
//! 2. **Instructions**: One-shot JSON payloads published through the shared store
//! 3. **Fire-and-forget**: Instructions carry no reply channel

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Kind of a command bus instruction
///
/// Unknown kinds survive parsing so they can be logged and dropped by the
/// receiver instead of being rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// Allocate part of the currently free memory
    Leak,
    /// Release all previously allocated memory
    Clear,
    /// Run the CPU-bound job in the background
    Compute,
    Unknown(String),
}

impl InstructionKind {
    pub fn as_str(&self) -> &str {
        match self {
            InstructionKind::Leak => "leak",
            InstructionKind::Clear => "clear",
            InstructionKind::Compute => "compute",
            InstructionKind::Unknown(kind) => kind,
        }
    }
}

impl From<&str> for InstructionKind {
    fn from(kind: &str) -> Self {
        match kind {
            "leak" => InstructionKind::Leak,
            "clear" => InstructionKind::Clear,
            "compute" => InstructionKind::Compute,
            other => InstructionKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of an instruction: `{"type": "<kind>"}`
#[derive(Debug, Serialize, Deserialize)]
struct InstructionPayload {
    #[serde(rename = "type")]
    kind: String,
}

/// Instruction addressed to one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub target_instance: String,
}

impl Instruction {
    /// Encode the payload published on the target's channel
    pub fn payload(kind: &InstructionKind) -> String {
        serde_json::json!({ "type": kind.as_str() }).to_string()
    }

    /// Decode a payload received on `target_instance`'s channel
    pub fn parse(target_instance: &str, payload: &str) -> Result<Self, InstructionError> {
        let InstructionPayload { kind } = serde_json::from_str(payload)
            .map_err(|e| InstructionError::Malformed(format!("{e} in {payload:?}")))?;

        Ok(Self {
            kind: InstructionKind::from(kind.as_str()),
            target_instance: target_instance.to_string(),
        })
    }
}

/// Errors while receiving an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionError {
    /// Payload is not a JSON object with a string `type` field
    Malformed(String),
}

impl fmt::Display for InstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionError::Malformed(msg) => write!(f, "malformed instruction: {}", msg),
        }
    }
}

impl std::error::Error for InstructionError {}

/// What the command bus did with one received payload
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The registered action ran successfully
    Executed(InstructionKind),
    /// The registered action returned an error
    Failed(InstructionKind),
    /// No action is registered for the kind; dropped
    Unhandled(InstructionKind),
    /// The payload could not be parsed; dropped
    Malformed(InstructionError),
}

/// Commands that can be sent to a ReporterActor
#[derive(Debug)]
pub enum ReporterCommand {
    /// Write heartbeat and snapshot immediately (bypassing the interval timer)
    ReportNow {
        /// Channel to send the result back
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Gracefully shut down the reporter
    Shutdown,
}

/// Commands that can be sent to a CommandBusActor
#[derive(Debug)]
pub enum BusCommand {
    /// Handle a payload as if it arrived on the channel
    ///
    /// Replies once the matching action has run (or the payload was dropped).
    Deliver {
        payload: String,
        respond_to: oneshot::Sender<Delivery>,
    },

    /// Gracefully shut down the command bus
    Shutdown,
}
