//! Event bus errors

use thiserror::Error;

/// Errors that can occur in the event bus
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("backend not available: {0}")]
    BackendUnavailable(String),

    #[error("No tokio runtime to run subscribers on")]
    NoRuntime,

    #[error("Relay connection lost")]
    ConnectionLost,

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subscriber '{name}' failed: {reason}")]
    SubscriberFailed { name: String, reason: String },
}

impl BusError {
    /// Create a subscriber failure
    pub fn subscriber(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscriberFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type BusResult<T> = Result<T, BusError>;
