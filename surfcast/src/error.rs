//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The messaging session is not established. Precondition failure,
    /// never retried.
    #[error("WhatsApp session not ready")]
    NotReady,

    /// The session is up but the target group was never resolved.
    /// Precondition failure, never retried.
    #[error("target group not resolved")]
    TargetNotResolved,

    /// The notification queue is at capacity. Precondition failure,
    /// never retried.
    #[error("notifier queue is full")]
    QueueFull,

    /// The network rejected a send. Carries the underlying message so the
    /// transient-signature classifier can inspect it.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Transport-level failure talking to the bridge.
    #[error("bridge transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("API server error: {0}")]
    Api(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
