//! Error types for the sync core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Neither the shared container nor the process-local fallback is usable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Failed to decode {collection}: {message}")]
    DecodeFailure { collection: String, message: String },

    #[error("Connectivity session is not activated")]
    NotActivated,

    #[error("Peer is not reachable")]
    NotReachable,

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Incoming copy lost the last-writer-wins comparison
    #[error("Stale write for record {id}")]
    StaleWrite { id: String },

    #[error("Unsupported payload schema version {found} (supported up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Errors that mean "the peer cannot take a live message right now".
    ///
    /// These skip the retry loop and go straight to the durable channel.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SyncError::NotActivated | SyncError::NotReachable)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
