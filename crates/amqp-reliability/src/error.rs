//! Error types for the reliability core.

use thiserror::Error;

/// Failure reported by the transport collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel was closed by the broker or the connection dropped.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Socket or framing failure below the channel.
    #[error("io error: {0}")]
    Io(String),

    /// The transport refused the operation outright.
    #[error("operation refused: {0}")]
    Refused(String),

    /// Cancel or ack referenced a consumer that is not subscribed.
    #[error("unknown consumer tag: {0}")]
    UnknownConsumer(String),
}

/// Failure resolved onto a publication's completion handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The send primitive failed synchronously; never retried.
    #[error("transport send failure: {0}")]
    Transport(#[from] TransportError),

    /// The broker returned a negative confirmation.
    #[error("broker rejected publication")]
    Rejected,

    /// The channel closed before the broker confirmed the publication.
    #[error("channel closed before confirmation: {0}")]
    ChannelClosed(String),

    /// The transport handed out a sequence number that is already pending.
    #[error("sequence number {0} is already pending")]
    DuplicateSequence(u64),

    /// The resolving side was dropped without completing.
    #[error("publication abandoned without a confirmation")]
    Abandoned,
}

/// Top-level error for subscription and configuration operations.
#[derive(Error, Debug)]
pub enum ReliabilityError {
    /// Transport operation failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for reliability core operations.
pub type ReliabilityResult<T> = Result<T, ReliabilityError>;
