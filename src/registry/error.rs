//! Registry error types
//!
//! Error types for room operations.

use super::config::ConfigError;

/// Error type for room operations
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Room name does not match the configured pattern
    #[error("room name '{name}' has invalid characters (pattern: {pattern})")]
    InvalidRoomName { name: String, pattern: String },

    /// Admitting a brand-new room would exceed the total room limit
    #[error("room limit reached ({limit}), no new rooms can be created")]
    RoomLimit { limit: usize },

    /// Loading a room would exceed the active room limit
    #[error("active room limit reached ({limit}), must wait for another room to idle")]
    ActiveRoomLimit { limit: usize },

    /// Append would overflow the room's fixed capacity
    #[error("data overflows capacity: {length} + {requested} > {capacity}")]
    OverCapacity {
        capacity: usize,
        length: usize,
        requested: usize,
    },

    /// A single append is larger than the configured per-write limit
    #[error("single write of {size} bytes exceeds limit of {limit}")]
    DataTooLarge { size: usize, limit: usize },

    /// Blocking read was cancelled before new data arrived
    #[error("read cancelled before data arrived")]
    Cancelled,

    /// Configuration rejected at construction
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Room pattern failed to compile
    #[error("invalid room pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Backer I/O failure
    #[error("backing error: {0}")]
    Backing(#[from] std::io::Error),
}

impl StreamError {
    /// Whether retrying the same call later can succeed without outside changes
    ///
    /// Only the active room limit clears by itself, once a dump frees a slot.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::ActiveRoomLimit { .. })
    }
}
