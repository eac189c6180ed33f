//! Snapshot types for persisting and restoring sync state.
//!
//! A snapshot holds everything the engine must keep across restarts: the
//! pending queue, the applied history, the last successful sync time and the
//! recent errors. It never holds the single-flight flag.

use crate::{
    error::Result, AppliedHistory, Error, ErrorDescriptor, MutationRecord, OwnerId, PendingQueue,
    SyncState, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the persisted sync state.
///
/// The history uses a BTreeMap, so serialization order is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// User the state belongs to
    pub owner_id: OwnerId,
    /// Last fully successful sync
    #[serde(default)]
    pub last_sync_at: Option<Timestamp>,
    /// Most recent failures, oldest first
    #[serde(default)]
    pub recent_errors: Vec<ErrorDescriptor>,
    /// Pending mutations in queue order
    #[serde(default)]
    pub pending: Vec<MutationRecord>,
    /// Last confirmed remote operation per entity
    #[serde(default)]
    pub history: AppliedHistory,
}

/// Summary of a snapshot without the records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub owner_id: OwnerId,
    pub last_sync_at: Option<Timestamp>,
    pub pending_count: usize,
    pub history_count: usize,
    pub error_count: usize,
}

impl SyncSnapshot {
    /// Create a new empty snapshot.
    pub fn new(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            owner_id: owner_id.into(),
            last_sync_at: None,
            recent_errors: Vec::new(),
            pending: Vec::new(),
            history: AppliedHistory::new(),
        }
    }

    /// Capture the current in-memory state.
    pub fn capture(
        owner_id: impl Into<OwnerId>,
        state: &SyncState,
        queue: &PendingQueue,
        history: &AppliedHistory,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            owner_id: owner_id.into(),
            last_sync_at: state.last_sync_at,
            recent_errors: state.recent_errors.iter().cloned().collect(),
            pending: queue.to_vec(),
            history: history.clone(),
        }
    }

    /// Rebuild in-memory state. `is_syncing` always comes back `false`.
    pub fn restore(
        self,
        max_recent_errors: usize,
        queue_soft_limit: usize,
    ) -> (SyncState, PendingQueue, AppliedHistory) {
        let mut state = SyncState::new(max_recent_errors);
        state.last_sync_at = self.last_sync_at;
        for error in self.recent_errors {
            state.record_error(error);
        }
        let queue = PendingQueue::from_records(self.pending, queue_soft_limit);
        (state, queue, self.history)
    }

    /// Check the snapshot belongs to `owner_id` and has unique record IDs.
    pub fn validate(&self, owner_id: &str) -> Result<()> {
        if self.owner_id != owner_id {
            return Err(Error::InvalidSnapshot(format!(
                "owner mismatch: expected '{}', got '{}'",
                owner_id, self.owner_id
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for record in &self.pending {
            if !seen.insert(record.id.as_str()) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate pending mutation id: {}",
                    record.id
                )));
            }
        }

        Ok(())
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            format_version: self.format_version,
            owner_id: self.owner_id.clone(),
            last_sync_at: self.last_sync_at,
            pending_count: self.pending.len(),
            history_count: self.history.len(),
            error_count: self.recent_errors.len(),
        }
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Book, Entity, EntityType, ErrorKind};

    fn populated() -> SyncSnapshot {
        let book = Entity::from(Book::new("b-1", "u-1", "Emma", "Austen", 1));
        let mut queue = PendingQueue::new();
        queue.append(MutationRecord::create("m-1", &book, 1));
        queue.append(MutationRecord::delete("m-2", EntityType::Book, "b-1", "u-1", 2));

        let mut history = AppliedHistory::new();
        history.record(&MutationRecord::create("m-0", &book, 0), 1);

        let mut state = SyncState::default();
        state.record_success(100);
        state.is_syncing = true;
        state.record_error(ErrorDescriptor::new(ErrorKind::NetworkError, "offline", 99));

        SyncSnapshot::capture("u-1", &state, &queue, &history)
    }

    #[test]
    fn capture_and_restore() {
        let (state, queue, history) = populated().restore(20, 100);

        assert!(!state.is_syncing);
        assert_eq!(state.last_sync_at, Some(100));
        assert_eq!(state.recent_errors.len(), 1);
        assert_eq!(queue.pending_ids(), vec!["m-1", "m-2"]);
        assert_eq!(queue.soft_limit(), 100);
        assert!(history.confirmed_written(EntityType::Book, "b-1"));
    }

    #[test]
    fn json_roundtrip_keeps_queue_order() {
        let snapshot = populated();
        let json = snapshot.to_json().unwrap();
        let parsed = SyncSnapshot::from_json(&json).unwrap();

        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.pending[0].id, "m-1");
    }

    #[test]
    fn rejects_future_format() {
        let mut snapshot = SyncSnapshot::new("u-1");
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let json = serde_json::to_string(&snapshot).unwrap();

        let err = SyncSnapshot::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot format version"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            SyncSnapshot::from_json("{not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn validate_owner_and_duplicates() {
        let snapshot = populated();
        assert!(snapshot.validate("u-1").is_ok());
        assert!(snapshot.validate("someone-else").is_err());

        let mut duplicated = snapshot.clone();
        duplicated.pending.push(duplicated.pending[0].clone());
        let err = duplicated.validate("u-1").unwrap_err();
        assert!(err.to_string().contains("duplicate pending mutation id"));
    }

    #[test]
    fn metadata_counts() {
        let meta = populated().metadata();
        assert_eq!(meta.pending_count, 2);
        assert_eq!(meta.history_count, 1);
        assert_eq!(meta.error_count, 1);
        assert_eq!(meta.last_sync_at, Some(100));
    }
}
