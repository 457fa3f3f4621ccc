//! Error types for the playback engine

use thiserror::Error;

/// Playback engine error
///
/// Every variant is recoverable: the engine logs it and leaves no partial
/// state behind. Stopping an already stopped instance is not an error.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Instance limit of {limit} reached for event '{name}'")]
    LimitExceeded { name: String, limit: u32 },

    #[error("Channel pool exhausted while starting '{0}'")]
    PoolExhausted(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Duplicate event name '{name}' in bank '{bank}'")]
    DuplicateName { name: String, bank: String },

    #[error("Bank already loaded: {0}")]
    BankAlreadyLoaded(String),

    #[error("Bank not loaded: {0}")]
    BankNotLoaded(u32),

    #[error("Stale or invalid handle")]
    InvalidHandle,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type PlaybackResult<T> = Result<T, PlaybackError>;
