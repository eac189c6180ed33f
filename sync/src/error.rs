//! Unified error handling for the sync runtime.

use shelf_engine::{ErrorDescriptor, ErrorKind, MutationId, Timestamp};

/// Failure reported by a [`RemoteStore`](crate::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The service could not be reached at all; retry on connectivity change.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The service answered but refused the call.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The service answered with a body that does not match the entity model.
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl NetworkError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, NetworkError::NotConnected(_))
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            NetworkError::NotConnected(e.to_string())
        } else if e.is_decode() {
            NetworkError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            NetworkError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            NetworkError::NotConnected(e.to_string())
        }
    }
}

/// Failure reported by a [`LocalStore`](crate::LocalStore) or a
/// [`StateStore`](crate::StateStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("engine error: {0}")]
    Engine(#[from] shelf_engine::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort a sync cycle or reject an entry-point call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync cycle is already in progress")]
    AlreadySyncing,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(#[from] StoreError),

    #[error("invalid data: {0}")]
    InvalidData(shelf_engine::Error),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Reserved for field-level merges; last-writer-wins never raises it.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// The classification recorded in `recent_errors`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AlreadySyncing => ErrorKind::AlreadySyncing,
            SyncError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            SyncError::InvalidData(_) => ErrorKind::InvalidData,
            SyncError::Network(_) => ErrorKind::NetworkError,
            SyncError::Conflict(_) => ErrorKind::ConflictError,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Build the persisted descriptor for this error.
    pub fn describe(&self, mutation_id: Option<&MutationId>, at: Timestamp) -> ErrorDescriptor {
        let descriptor = ErrorDescriptor::new(self.kind(), self.to_string(), at);
        match mutation_id {
            Some(id) => descriptor.with_mutation(id.clone()),
            None => descriptor,
        }
    }
}

impl From<shelf_engine::Error> for SyncError {
    fn from(e: shelf_engine::Error) -> Self {
        if e.is_invalid_data() {
            SyncError::InvalidData(e)
        } else {
            SyncError::ServiceUnavailable(StoreError::Engine(e))
        }
    }
}

/// Result type alias for the sync runtime.
pub type Result<T> = std::result::Result<T, SyncError>;
