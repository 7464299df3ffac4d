//! Error types for shared store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the shared store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connection or transport failure; the store could not be reached
    Unavailable(String),

    /// The store was reached but rejected the command
    CommandFailed(String),

    /// A value could not be encoded or decoded
    Serialization(String),
}

impl StoreError {
    /// Whether this error means the store itself is unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "shared store unavailable: {}", msg),
            StoreError::CommandFailed(msg) => write!(f, "store command failed: {}", msg),
            StoreError::Serialization(msg) => write!(f, "store serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::CommandFailed(err.to_string())
        }
    }
}
