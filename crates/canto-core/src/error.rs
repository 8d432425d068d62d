//! Error types for Canto.

use crate::address::Address;
use crate::entry::EntryState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Event errors
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Fetch errors
    #[error("Fetch failed for {address}: {message}")]
    Fetch { address: Address, message: String },

    #[error("Fetch timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("Network error: {0}")]
    Network(String),

    // Cache errors
    #[error("Entry {address} is not ready: {state:?}")]
    NotReady { address: Address, state: EntryState },

    #[error("Artifact build failed for {address}: {message}")]
    Build { address: Address, message: String },

    // Infrastructure errors
    #[error("Fetch queue closed")]
    QueueClosed,

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Affinity thread unavailable")]
    AffinityUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a fetch failing with this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Fetch { .. } | Error::Timeout { .. } | Error::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}
