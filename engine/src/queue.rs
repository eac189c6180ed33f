//! Pending operation queue - the ordered log of unsynced mutations.
//!
//! Records are kept strictly in append order. The queue never evicts: a
//! record only leaves after the remote store confirmed it, or when the whole
//! queue is explicitly cleared. A soft limit flags pathological growth so the
//! caller can alert on it.

use crate::{EntityType, MutationId, MutationRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default soft limit on queued records.
pub const DEFAULT_SOFT_LIMIT: usize = 10_000;

/// Result of appending a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Queue length after the append
    pub len: usize,
    /// Whether the queue is now above its soft limit
    pub over_soft_limit: bool,
}

/// Progress of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    /// Records the drain started with
    pub attempted: usize,
    /// Records confirmed by the remote, in order
    pub applied_ids: Vec<MutationId>,
    /// Records still queued when the drain stopped
    pub remaining: usize,
}

impl DrainSummary {
    /// Start a summary for a drain over `attempted` records.
    pub fn new(attempted: usize) -> Self {
        Self {
            attempted,
            applied_ids: Vec::new(),
            remaining: attempted,
        }
    }

    /// Note that `id` was confirmed.
    pub fn record_applied(&mut self, id: MutationId) {
        self.applied_ids.push(id);
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn applied(&self) -> usize {
        self.applied_ids.len()
    }

    /// Whether every attempted record was confirmed.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Ordered FIFO of mutation records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQueue {
    records: VecDeque<MutationRecord>,
    #[serde(skip, default = "default_soft_limit")]
    soft_limit: usize,
}

fn default_soft_limit() -> usize {
    DEFAULT_SOFT_LIMIT
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    /// Create an empty queue with the default soft limit.
    pub fn new() -> Self {
        Self::with_soft_limit(DEFAULT_SOFT_LIMIT)
    }

    pub fn with_soft_limit(soft_limit: usize) -> Self {
        Self {
            records: VecDeque::new(),
            soft_limit,
        }
    }

    /// Rebuild a queue from persisted records, keeping their order.
    pub fn from_records(records: Vec<MutationRecord>, soft_limit: usize) -> Self {
        Self {
            records: records.into(),
            soft_limit,
        }
    }

    pub fn soft_limit(&self) -> usize {
        self.soft_limit
    }

    pub fn set_soft_limit(&mut self, soft_limit: usize) {
        self.soft_limit = soft_limit;
    }

    /// Append a record at the tail.
    pub fn append(&mut self, record: MutationRecord) -> AppendOutcome {
        self.records.push_back(record);
        AppendOutcome {
            len: self.records.len(),
            over_soft_limit: self.records.len() > self.soft_limit,
        }
    }

    /// Remove the most recently appended record if it has the given ID.
    ///
    /// Used to undo an append whose persistence failed.
    pub fn pop_if_last(&mut self, id: &str) -> Option<MutationRecord> {
        if self.records.back().map(|r| r.id.as_str()) == Some(id) {
            self.records.pop_back()
        } else {
            None
        }
    }

    /// Records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &MutationRecord> {
        self.records.iter()
    }

    /// Copy of the records in insertion order.
    pub fn to_vec(&self) -> Vec<MutationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// IDs of all queued records, in order.
    pub fn pending_ids(&self) -> Vec<MutationId> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    /// Remove a confirmed record. Returns it if it was queued.
    pub fn remove(&mut self, id: &str) -> Option<MutationRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        self.records.remove(index)
    }

    /// Whether any record targets the entity.
    pub fn has_pending(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.entity_type == entity_type && r.entity_id == entity_id)
    }

    /// Whether a create or update for the entity is still queued.
    pub fn has_pending_write(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.entity_type == entity_type && r.entity_id == entity_id && r.is_write())
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
