//! Error types for journald2aws-core

use thiserror::Error;

/// Main error type for the journald2aws-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed journald record
    #[error("parse error: {0}")]
    Parse(String),

    /// Request could not be signed
    #[error("signing error: {0}")]
    Signing(String),

    /// Subprocess or HTTP failure; never retried
    #[error("transport error: {0}")]
    Transport(String),

    /// Pidfile is held by another process
    #[error("lock contention: {0}")]
    LockContention(String),

    /// This process no longer holds the pidfile lock
    #[error("lock lost: {0}")]
    LockLost(String),

    /// Feed on a closed `DelimitingBuffer`
    #[error("buffer is closed")]
    BufferClosed,

    /// Worker lifecycle misuse
    #[error("worker error: {0}")]
    Worker(String),

    /// Cooperative cancellation, raised by a worker heartbeat once stop is requested
    #[error("stopping")]
    Stopping,
}

impl Error {
    /// True for the cancellation signal, which is not a failure.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Error::Stopping)
    }
}

/// Result type alias for journald2aws-core
pub type Result<T> = std::result::Result<T, Error>;
