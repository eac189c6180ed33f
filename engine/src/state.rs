//! Sync state and the result of a sync cycle.

use crate::{MutationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of errors kept in [`SyncState::recent_errors`].
pub const DEFAULT_MAX_RECENT_ERRORS: usize = 20;

/// Classification of sync failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// A cycle is already running
    AlreadySyncing,
    /// The local store or the engine's own persistence failed
    ServiceUnavailable,
    /// A queued mutation cannot be decoded into its entity type
    InvalidData,
    /// The remote store was unreachable or rejected a call
    NetworkError,
    /// Reserved for field-level merge failures
    ConflictError,
    /// The cycle was cancelled by the caller
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::AlreadySyncing => "already syncing",
            ErrorKind::ServiceUnavailable => "service unavailable",
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::NetworkError => "network error",
            ErrorKind::ConflictError => "conflict",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A recorded sync failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    /// The mutation being applied when the failure happened, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<MutationId>,
    pub occurred_at: Timestamp,
}

impl ErrorDescriptor {
    pub fn new(kind: ErrorKind, message: impl Into<String>, occurred_at: Timestamp) -> Self {
        Self {
            kind,
            message: message.into(),
            mutation_id: None,
            occurred_at,
        }
    }

    pub fn with_mutation(mut self, mutation_id: impl Into<MutationId>) -> Self {
        self.mutation_id = Some(mutation_id.into());
        self
    }
}

/// Process-wide sync metadata.
///
/// `is_syncing` is never persisted: a value left over from a crashed process
/// cannot be trusted, so it always loads as `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(default)]
    pub last_sync_at: Option<Timestamp>,
    #[serde(skip)]
    pub is_syncing: bool,
    #[serde(default)]
    pub recent_errors: VecDeque<ErrorDescriptor>,
    #[serde(skip, default = "default_max_recent_errors")]
    max_recent_errors: usize,
}

fn default_max_recent_errors() -> usize {
    DEFAULT_MAX_RECENT_ERRORS
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECENT_ERRORS)
    }
}

impl SyncState {
    pub fn new(max_recent_errors: usize) -> Self {
        Self {
            last_sync_at: None,
            is_syncing: false,
            recent_errors: VecDeque::new(),
            max_recent_errors,
        }
    }

    pub fn set_max_recent_errors(&mut self, max: usize) {
        self.max_recent_errors = max;
        self.trim_errors();
    }

    /// Record a failure, dropping the oldest ones beyond the bound.
    pub fn record_error(&mut self, error: ErrorDescriptor) {
        self.recent_errors.push_back(error);
        self.trim_errors();
    }

    /// Mark a fully successful cycle.
    pub fn record_success(&mut self, at: Timestamp) {
        self.last_sync_at = Some(at);
    }

    /// The most recent error, if any.
    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.recent_errors.back()
    }

    fn trim_errors(&mut self) {
        while self.recent_errors.len() > self.max_recent_errors {
            self.recent_errors.pop_front();
        }
    }
}

/// Outcome of one sync cycle, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    /// Last successful sync, which is this cycle when `success` is true
    pub last_sync_at: Option<Timestamp>,
    /// Mutations confirmed by the remote plus local writes made by
    /// reconciliation
    pub synced_count: usize,
    /// Mutations still queued after the cycle
    pub pending_count: usize,
    pub errors: Vec<ErrorDescriptor>,
}

impl SyncResult {
    pub fn succeeded(last_sync_at: Timestamp, synced_count: usize, pending_count: usize) -> Self {
        Self {
            success: true,
            last_sync_at: Some(last_sync_at),
            synced_count,
            pending_count,
            errors: Vec::new(),
        }
    }

    pub fn failed(
        error: ErrorDescriptor,
        last_sync_at: Option<Timestamp>,
        synced_count: usize,
        pending_count: usize,
    ) -> Self {
        Self {
            success: false,
            last_sync_at,
            synced_count,
            pending_count,
            errors: vec![error],
        }
    }

    /// Kind of the first error, if the cycle failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.errors.first().map(|e| e.kind)
    }
}
