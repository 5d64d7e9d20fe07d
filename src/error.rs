// Error types shared by discovery, binding and acquisition

use crate::catalog::StreamFilter;
use thiserror::Error;

/// Result type for acquisition operations
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Errors that can occur while discovering, binding or reading streams
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("No matching streams with {0}")]
    StreamNotFound(StreamFilter),

    #[error("The number of streams matching {0} is greater than 1")]
    AmbiguousStream(StreamFilter),

    #[error("Property '{0}' is not available for matching")]
    InvalidFilter(String),

    #[error("Binding id '{0}' is already in use")]
    DuplicateBindingId(String),

    #[error("Channel {channel} has no field '{field}'")]
    MissingField { field: String, channel: usize },

    #[error("Stream timeout after {elapsed:.3}s ({received} of {required} samples received)")]
    Timeout {
        elapsed: f64,
        received: usize,
        required: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Source disconnected after {0} consecutive timeouts")]
    SourceDisconnected(u32),

    #[error("Receiver is closed")]
    ReceiverClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AcquisitionError {
    /// Whether a caller may simply retry the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
