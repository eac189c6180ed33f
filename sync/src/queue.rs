//! Durable pending queue.
//!
//! [`DurableQueue`] owns the process-wide [`PendingQueue`], [`SyncState`] and
//! [`AppliedHistory`] behind one lock and writes a [`SyncSnapshot`] through
//! the [`StateStore`] after every change. The lock is never held across a
//! remote call, so user mutations can be appended while a drain runs.
//!
//! Saves run on the blocking pool while the lock is held, so snapshots reach
//! the store in the order the changes were made.

use crate::error::{StoreError, SyncError};
use crate::store::StateStore;
use crate::now_millis;
use shelf_engine::{
    AppendOutcome, AppliedHistory, DrainSummary, EntityKey, ErrorDescriptor, MutationRecord,
    OwnerId, PendingQueue, SyncSnapshot, SyncState, Timestamp,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A drain that stopped on its first failing record.
#[derive(Debug, thiserror::Error)]
#[error("drain stopped at mutation {}: {error}", .record.id)]
pub struct DrainFailure {
    /// Progress made before the failure
    pub summary: DrainSummary,
    /// The record the drain stopped at. A record the remote rejected is
    /// still queued. A record the remote confirmed but whose removal could
    /// not be saved is counted in `summary` and left the queue in memory;
    /// after a restart it is replayed from the older snapshot.
    pub record: MutationRecord,
    pub error: SyncError,
}

#[derive(Debug)]
struct Inner {
    queue: PendingQueue,
    state: SyncState,
    history: AppliedHistory,
}

/// Pending queue, sync state and applied history, persisted together.
pub struct DurableQueue {
    owner_id: OwnerId,
    store: Arc<dyn StateStore>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

impl DurableQueue {
    /// Restore from the state store, or start empty on first run.
    ///
    /// A snapshot written for another owner is refused.
    pub fn open(
        owner_id: impl Into<OwnerId>,
        store: Arc<dyn StateStore>,
        max_recent_errors: usize,
        soft_limit: usize,
    ) -> Result<Self, StoreError> {
        let owner_id = owner_id.into();
        let (state, queue, history) = match store.load()? {
            Some(snapshot) => {
                snapshot.validate(&owner_id)?;
                tracing::info!(
                    owner_id = %owner_id,
                    pending = snapshot.pending.len(),
                    "Restored sync snapshot"
                );
                snapshot.restore(max_recent_errors, soft_limit)
            }
            None => (
                SyncState::new(max_recent_errors),
                PendingQueue::with_soft_limit(soft_limit),
                AppliedHistory::new(),
            ),
        };

        Ok(Self {
            owner_id,
            store,
            inner: Mutex::new(Inner {
                queue,
                state,
                history,
            }),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    async fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let snapshot =
            SyncSnapshot::capture(&self.owner_id, &inner.state, &inner.queue, &inner.history);
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| StoreError::Unavailable(format!("snapshot task failed: {e}")))?
    }

    /// Append a record at the tail and persist it.
    ///
    /// If the snapshot cannot be written the record is taken back out, so
    /// memory never runs ahead of durable storage.
    pub async fn append(&self, record: MutationRecord) -> Result<AppendOutcome, SyncError> {
        let mut inner = self.inner.lock().await;
        let id = record.id.clone();
        let outcome = inner.queue.append(record);

        if let Err(e) = self.persist(&inner).await {
            inner.queue.pop_if_last(&id);
            tracing::warn!(mutation_id = %id, error = %e, "Failed to persist queued mutation");
            return Err(SyncError::ServiceUnavailable(e));
        }

        if outcome.over_soft_limit {
            tracing::warn!(
                owner_id = %self.owner_id,
                len = outcome.len,
                soft_limit = inner.queue.soft_limit(),
                "Pending queue is above its soft limit"
            );
        }
        Ok(outcome)
    }

    /// Apply queued records in insertion order, one at a time.
    ///
    /// Only the records queued when the drain starts are attempted. Each one
    /// is removed and remembered in the applied history as soon as `apply`
    /// confirms it. The first failure stops the drain and leaves that record
    /// and everything after it queued.
    pub async fn drain<F, Fut>(&self, mut apply: F) -> Result<DrainSummary, DrainFailure>
    where
        F: FnMut(MutationRecord) -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let batch = self.inner.lock().await.queue.to_vec();
        let mut summary = DrainSummary::new(batch.len());

        for record in batch {
            tracing::debug!(
                mutation_id = %record.id,
                entity_id = %record.entity_id,
                operation = %record.operation_type,
                "Applying queued mutation"
            );

            if let Err(error) = apply(record.clone()).await {
                return Err(DrainFailure {
                    summary,
                    record,
                    error,
                });
            }

            let mut inner = self.inner.lock().await;
            inner.queue.remove(&record.id);
            inner.history.record(&record, now_millis());
            let saved = self.persist(&inner).await;
            drop(inner);

            summary.record_applied(record.id.clone());
            if let Err(e) = saved {
                return Err(DrainFailure {
                    summary,
                    record,
                    error: SyncError::ServiceUnavailable(e),
                });
            }
        }

        Ok(summary)
    }

    /// Copies of the queue and history for planning a reconciliation.
    pub async fn planning_view(&self) -> (PendingQueue, AppliedHistory) {
        let inner = self.inner.lock().await;
        (inner.queue.clone(), inner.history.clone())
    }

    /// Drop history entries the reconciler no longer needs.
    pub async fn forget(&self, keys: &[EntityKey]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        for key in keys {
            inner.history.forget(key.entity_type, &key.entity_id);
        }
        self.persist(&inner).await
    }

    /// Mark a fully successful cycle.
    pub async fn record_success(&self, at: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.state.record_success(at);
        self.persist(&inner).await
    }

    /// Remember a failure. Persisting it is best effort.
    pub async fn record_error(&self, error: ErrorDescriptor) {
        let mut inner = self.inner.lock().await;
        inner.state.record_error(error);
        if let Err(e) = self.persist(&inner).await {
            tracing::warn!(owner_id = %self.owner_id, error = %e, "Failed to persist sync error");
        }
    }

    pub async fn state(&self) -> SyncState {
        self.inner.lock().await.state.clone()
    }

    /// Queued records in order.
    pub async fn pending(&self) -> Vec<MutationRecord> {
        self.inner.lock().await.queue.to_vec()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    pub async fn history(&self) -> AppliedHistory {
        self.inner.lock().await.history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::memory::MemoryStateStore;
    use shelf_engine::{Book, Entity, EntityType, ErrorKind};

    fn record(id: &str, book_id: &str) -> MutationRecord {
        let entity = Entity::from(Book::new(book_id, "u-1", "Title", "Author", 1));
        MutationRecord::update(id, &entity, 1)
    }

    fn open(store: Arc<MemoryStateStore>) -> DurableQueue {
        DurableQueue::open("u-1", store, 20, 10_000).unwrap()
    }

    #[tokio::test]
    async fn append_persists_every_record() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = open(store.clone());

        queue.append(record("m-1", "b-1")).await.unwrap();
        queue.append(record("m-2", "b-1")).await.unwrap();

        let reopened = open(store);
        let ids: Vec<_> = reopened.pending().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_append() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = open(store.clone());
        queue.append(record("m-1", "b-1")).await.unwrap();

        store.set_fail_saves(true);
        let err = queue.append(record("m-2", "b-1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn soft_limit_flags_but_keeps_records() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = DurableQueue::open("u-1", store, 20, 2).unwrap();

        for i in 0..3 {
            let outcome = queue.append(record(&format!("m-{i}"), "b-1")).await.unwrap();
            assert_eq!(outcome.over_soft_limit, i >= 2);
        }
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn drain_applies_in_order_and_removes_confirmed() {
        let queue = open(Arc::new(MemoryStateStore::new()));
        for (id, book) in [("m-1", "b-1"), ("m-2", "b-2"), ("m-3", "b-1")] {
            queue.append(record(id, book)).await.unwrap();
        }

        let mut seen = Vec::new();
        let summary = queue
            .drain(|r| {
                seen.push(r.id.clone());
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["m-1", "m-2", "m-3"]);
        assert_eq!(summary.applied_ids, seen);
        assert!(summary.is_complete());
        assert!(queue.is_empty().await);
        assert!(queue
            .history()
            .await
            .confirmed_written(EntityType::Book, "b-1"));
    }

    #[tokio::test]
    async fn drain_stops_at_first_failure() {
        let queue = open(Arc::new(MemoryStateStore::new()));
        for i in 1..=4 {
            queue.append(record(&format!("m-{i}"), "b-1")).await.unwrap();
        }

        let failure = queue
            .drain(|r| async move {
                if r.id == "m-3" {
                    Err(SyncError::Network(NetworkError::NotConnected("down".into())))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(failure.record.id, "m-3");
        assert_eq!(failure.summary.applied_ids, vec!["m-1", "m-2"]);
        assert_eq!(failure.summary.remaining, 2);
        assert_eq!(failure.error.kind(), ErrorKind::NetworkError);

        let left: Vec<_> = queue.pending().await.into_iter().map(|r| r.id).collect();
        assert_eq!(left, vec!["m-3", "m-4"]);
    }

    #[tokio::test]
    async fn drain_counts_confirmed_record_when_save_fails() {
        let store = Arc::new(MemoryStateStore::new());
        let queue = open(store.clone());
        queue.append(record("m-1", "b-1")).await.unwrap();
        queue.append(record("m-2", "b-2")).await.unwrap();

        let failure = queue
            .drain(|_| {
                store.set_fail_saves(true);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(failure.record.id, "m-1");
        assert_eq!(failure.summary.applied_ids, vec!["m-1"]);
        assert_eq!(failure.error.kind(), ErrorKind::ServiceUnavailable);
        let left: Vec<_> = queue.pending().await.into_iter().map(|r| r.id).collect();
        assert_eq!(left, vec!["m-2"]);

        // The store still holds the snapshot from before the confirmation.
        store.set_fail_saves(false);
        let reopened = open(store);
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn snapshot_for_other_owner_is_refused() {
        let store = Arc::new(MemoryStateStore::new());
        store.save(&SyncSnapshot::new("someone-else")).unwrap();

        let err = DurableQueue::open("u-1", store, 20, 10).unwrap_err();
        assert!(matches!(err, StoreError::Engine(_)));
    }
}
