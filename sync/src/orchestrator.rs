//! Synchronization orchestrator.
//!
//! One cycle drains the pending queue to the remote store, pulls the remote
//! entity sets, reconciles them against the local replica and writes the
//! result back locally. At most one cycle runs at a time; a second trigger
//! fails fast with [`SyncError::AlreadySyncing`].
//!
//! A failed or cancelled cycle keeps everything it confirmed with the remote
//! (those records leave the queue one by one) and leaves local entity data
//! exactly as it was before the cycle.
//!
//! Offline writes may land while a cycle pulls. The cycle does not touch an
//! entity that gained a queued mutation after it was planned, and offline
//! writes wait while the plan is written locally.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::queue::DurableQueue;
use crate::store::{LocalStore, RemoteStore, StateStore};
use crate::{new_mutation_id, now_millis};
use shelf_engine::{
    Entity, EntityKey, EntityType, MutationId, MutationRecord, OperationType,
    ReconcilePlan, Reconciler, SyncResult, SyncState, Timestamp,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Holds the single-flight flag for the lifetime of a cycle.
///
/// Dropping the guard releases the flag, so a cancelled future or a panic
/// inside a cycle cannot leave it set.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Why a cycle stopped, and how far it got.
struct CycleFailure {
    error: SyncError,
    mutation_id: Option<MutationId>,
    synced: usize,
}

impl CycleFailure {
    fn at(synced: usize) -> impl FnOnce(SyncError) -> Self {
        move |error| Self {
            error,
            mutation_id: None,
            synced,
        }
    }
}

/// Local entity versions seen during the pull, keyed for rollback.
type PreImages = HashMap<EntityKey, Entity>;

/// Outcome of the pull phase.
struct PulledPlan {
    plan: ReconcilePlan,
    pre_images: PreImages,
    /// Pending mutations each entity type was planned against
    seen: HashSet<MutationId>,
}

/// Coordinates queue drain, pull, reconciliation and local persistence.
///
/// Construct one per process and share it as `Arc<Orchestrator>`.
pub struct Orchestrator {
    config: SyncConfig,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    queue: DurableQueue,
    syncing: AtomicBool,
    /// Serializes offline writes with the cycle's local persist step.
    write_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("syncing", &self.syncing)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Restore queue, history and sync state from `state_store`.
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        state_store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let queue = DurableQueue::open(
            config.owner_id.clone(),
            state_store,
            config.max_recent_errors,
            config.queue_soft_limit,
        )?;

        Ok(Self {
            config,
            local,
            remote,
            queue,
            syncing: AtomicBool::new(false),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn new_shared(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        state_store: Arc<dyn StateStore>,
    ) -> Result<Arc<Self>> {
        Self::new(config, local, remote, state_store).map(Arc::new)
    }

    pub fn owner_id(&self) -> &str {
        &self.config.owner_id
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Current sync state, with the live single-flight flag.
    pub async fn state(&self) -> SyncState {
        let mut state = self.queue.state().await;
        state.is_syncing = self.is_syncing();
        state
    }

    /// Queued mutations in replay order.
    pub async fn pending(&self) -> Vec<MutationRecord> {
        self.queue.pending().await
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.len().await
    }

    // =========================================================================
    // Sync entry points
    // =========================================================================

    /// Run one sync cycle.
    ///
    /// Returns `Err(AlreadySyncing)` when a cycle is already in flight. Every
    /// other failure is reported inside the returned [`SyncResult`].
    pub async fn sync_all(&self) -> Result<SyncResult> {
        self.sync_all_with_cancel(CancellationToken::new()).await
    }

    /// Run one sync cycle that stops at the next checkpoint once `cancel`
    /// fires. Checkpoints sit before every remote call and before the local
    /// writes.
    pub async fn sync_all_with_cancel(&self, cancel: CancellationToken) -> Result<SyncResult> {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            tracing::debug!(owner_id = %self.config.owner_id, "Sync already in progress");
            return Err(SyncError::AlreadySyncing);
        };

        let pending = self.queue.len().await;
        tracing::info!(owner_id = %self.config.owner_id, pending, "Sync cycle started");

        match self.run_cycle(&cancel).await {
            Ok((synced, finished_at)) => {
                let pending = self.queue.len().await;
                tracing::info!(
                    owner_id = %self.config.owner_id,
                    synced,
                    pending,
                    "Sync cycle succeeded"
                );
                Ok(SyncResult::succeeded(finished_at, synced, pending))
            }
            Err(failure) => Ok(self.fail_cycle(failure).await),
        }
    }

    /// Caller-facing trigger: like [`Orchestrator::sync_all`], with the
    /// in-flight rejection folded into a failed [`SyncResult`].
    pub async fn trigger_sync(&self) -> SyncResult {
        match self.sync_all().await {
            Ok(result) => result,
            Err(error) => {
                let state = self.queue.state().await;
                SyncResult::failed(
                    error.describe(None, now_millis()),
                    state.last_sync_at,
                    0,
                    self.queue.len().await,
                )
            }
        }
    }

    async fn fail_cycle(&self, failure: CycleFailure) -> SyncResult {
        let descriptor = failure
            .error
            .describe(failure.mutation_id.as_ref(), now_millis());

        tracing::warn!(
            owner_id = %self.config.owner_id,
            mutation_id = ?failure.mutation_id,
            kind = %descriptor.kind,
            error = %failure.error,
            "Sync cycle failed"
        );

        self.queue.record_error(descriptor.clone()).await;
        let state = self.queue.state().await;
        SyncResult::failed(
            descriptor,
            state.last_sync_at,
            failure.synced,
            self.queue.len().await,
        )
    }

    // =========================================================================
    // Cycle phases
    // =========================================================================

    /// Returns the number of synced changes and the completion time.
    async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<(usize, Timestamp), CycleFailure> {
        let drained = match self.queue.drain(move |record| self.push(record, cancel)).await {
            Ok(summary) => summary.applied(),
            Err(failure) => {
                return Err(CycleFailure {
                    mutation_id: Some(failure.record.id.clone()),
                    synced: failure.summary.applied(),
                    error: failure.error,
                })
            }
        };

        let pulled = self
            .pull_and_plan(cancel)
            .await
            .map_err(CycleFailure::at(drained))?;

        ensure_not_cancelled(cancel).map_err(CycleFailure::at(drained))?;

        let local_writes = self
            .persist(pulled)
            .await
            .map_err(CycleFailure::at(drained))?;

        let finished_at = now_millis();
        self.queue
            .record_success(finished_at)
            .await
            .map_err(|e| CycleFailure::at(drained)(SyncError::from(e)))?;

        Ok((drained + local_writes, finished_at))
    }

    /// Replay one queued mutation against the remote store.
    async fn push(&self, record: MutationRecord, cancel: &CancellationToken) -> Result<()> {
        ensure_not_cancelled(cancel)?;

        match record.operation_type {
            OperationType::Create | OperationType::Update => {
                let entity = record.entity()?.ok_or_else(|| {
                    SyncError::InvalidData(shelf_engine::Error::MissingPayload(record.id.clone()))
                })?;
                if record.operation_type == OperationType::Create {
                    self.remote.create(&entity).await?;
                } else {
                    self.remote.update(&entity).await?;
                }
            }
            OperationType::Delete => {
                self.remote
                    .delete(record.entity_type, &record.owner_id, &record.entity_id)
                    .await?;
            }
        }

        tracing::debug!(
            mutation_id = %record.id,
            entity_id = %record.entity_id,
            "Remote confirmed mutation"
        );
        Ok(())
    }

    /// Pull every entity type and plan the reconciliation, without writing.
    async fn pull_and_plan(&self, cancel: &CancellationToken) -> Result<PulledPlan> {
        let owner_id = self.config.owner_id.as_str();
        let mut plan = ReconcilePlan::new();
        let mut pre_images = PreImages::new();
        let mut seen = HashSet::new();

        for entity_type in EntityType::SYNC_ORDER {
            ensure_not_cancelled(cancel)?;
            let remote = self.remote.fetch_all(entity_type, owner_id).await?;

            // Taken before the local read: every record in the view has its
            // local write in place, and anything queued later is skipped at
            // persist time.
            let (queue, history) = self.queue.planning_view().await;
            seen.extend(
                queue
                    .records()
                    .filter(|r| r.entity_type == entity_type)
                    .map(|r| r.id.clone()),
            );
            let local = self.local.fetch_all(entity_type, owner_id).await?;
            let type_plan = Reconciler::new(&queue, &history).plan(
                entity_type,
                local.clone(),
                remote,
            );

            for conflict in &type_plan.conflicts {
                tracing::debug!(
                    entity_id = %conflict.key.entity_id,
                    entity_type = %conflict.key.entity_type,
                    resolution = ?conflict.resolution,
                    reason = ?conflict.reason,
                    "Resolved conflict"
                );
            }

            pre_images.extend(local.into_iter().map(|e| (e.key(), e)));
            plan.extend(type_plan);
        }

        Ok(PulledPlan {
            plan,
            pre_images,
            seen,
        })
    }

    /// Apply a plan to the local store and the queue, returning the number
    /// of local writes.
    ///
    /// Entities with a mutation queued after they were planned are left to
    /// the next cycle. On failure every local write made so far is undone
    /// from the pre-images before the error is returned.
    async fn persist(&self, pulled: PulledPlan) -> Result<usize> {
        let PulledPlan {
            mut plan,
            pre_images,
            seen,
        } = pulled;
        let _gate = self.write_gate.lock().await;

        let touched: HashSet<EntityKey> = self
            .queue
            .pending()
            .await
            .into_iter()
            .filter(|r| !seen.contains(&r.id))
            .map(|r| r.key())
            .collect();
        if !touched.is_empty() {
            tracing::debug!(
                owner_id = %self.config.owner_id,
                skipped = touched.len(),
                "Entities changed during pull, leaving them to the next cycle"
            );
            plan.retain_keys(|key| !touched.contains(key));
        }

        let mut written: Vec<EntityKey> = Vec::new();
        let outcome = self.apply_plan(&plan, &mut written).await;
        if let Err(error) = outcome {
            self.rollback(&written, &pre_images).await;
            return Err(error);
        }
        Ok(plan.local_writes())
    }

    async fn apply_plan(&self, plan: &ReconcilePlan, written: &mut Vec<EntityKey>) -> Result<()> {
        for entity in &plan.upserts {
            let key = entity.key();
            self.local.upsert(entity.clone()).await?;
            written.push(key);
        }

        for key in &plan.deletes {
            self.local.delete(key.entity_type, &key.entity_id).await?;
            written.push(key.clone());
        }

        for entity in &plan.enqueue_creates {
            let record = MutationRecord::create(new_mutation_id(), entity, now_millis());
            tracing::debug!(
                mutation_id = %record.id,
                entity_id = %record.entity_id,
                "Re-queued unpushed entity"
            );
            self.queue.append(record).await?;
        }

        for entity in &plan.enqueue_updates {
            let record = MutationRecord::update(new_mutation_id(), entity, now_millis());
            tracing::debug!(
                mutation_id = %record.id,
                entity_id = %record.entity_id,
                "Queued merged entity"
            );
            self.queue.append(record).await?;
        }

        self.queue.forget(&plan.forget).await?;
        Ok(())
    }

    async fn rollback(&self, written: &[EntityKey], pre_images: &PreImages) {
        for key in written.iter().rev() {
            let restored = match pre_images.get(key) {
                Some(entity) => self.local.upsert(entity.clone()).await,
                None => self.local.delete(key.entity_type, &key.entity_id).await,
            };
            if let Err(e) = restored {
                tracing::warn!(
                    entity_id = %key.entity_id,
                    entity_type = %key.entity_type,
                    error = %e,
                    "Failed to restore local entity"
                );
            }
        }
    }

    // =========================================================================
    // Offline mutations
    // =========================================================================

    /// Write a new entity locally, then queue its creation.
    pub async fn enqueue_offline_create(&self, entity: Entity) -> Result<MutationRecord> {
        self.enqueue_write(OperationType::Create, entity).await
    }

    /// Write a changed entity locally, then queue the update.
    pub async fn enqueue_offline_update(&self, entity: Entity) -> Result<MutationRecord> {
        self.enqueue_write(OperationType::Update, entity).await
    }

    /// Delete an entity locally, then queue the deletion.
    ///
    /// If the deletion cannot be queued the entity is written back.
    pub async fn enqueue_offline_delete(&self, entity: Entity) -> Result<MutationRecord> {
        let id = new_mutation_id();
        self.check_owner(&id, &entity)?;

        let _gate = self.write_gate.lock().await;
        self.local.delete(entity.entity_type(), entity.id()).await?;

        let record = MutationRecord::delete(
            id,
            entity.entity_type(),
            entity.id().clone(),
            entity.owner_id().clone(),
            now_millis(),
        );
        if let Err(e) = self.queue.append(record.clone()).await {
            if let Err(restore) = self.local.upsert(entity).await {
                tracing::warn!(mutation_id = %record.id, error = %restore, "Failed to restore deleted entity");
            }
            return Err(e);
        }

        tracing::debug!(mutation_id = %record.id, entity_id = %record.entity_id, "Queued offline delete");
        Ok(record)
    }

    /// Phase one writes the local store, phase two queues the record.
    ///
    /// A create that cannot be queued is removed again. An update stays: it
    /// is newer than the remote copy, so the next reconciliation pushes it.
    async fn enqueue_write(
        &self,
        operation: OperationType,
        mut entity: Entity,
    ) -> Result<MutationRecord> {
        let id = new_mutation_id();
        self.check_owner(&id, &entity)?;

        let _gate = self.write_gate.lock().await;
        let at = now_millis();
        entity.touch(at);
        self.local.upsert(entity.clone()).await?;

        let record = match operation {
            OperationType::Create => MutationRecord::create(id, &entity, at),
            _ => MutationRecord::update(id, &entity, at),
        };

        if let Err(e) = self.queue.append(record.clone()).await {
            if operation == OperationType::Create {
                if let Err(undo) = self.local.delete(entity.entity_type(), entity.id()).await {
                    tracing::warn!(mutation_id = %record.id, error = %undo, "Failed to undo local create");
                }
            }
            return Err(e);
        }

        tracing::debug!(
            mutation_id = %record.id,
            entity_id = %record.entity_id,
            operation = %record.operation_type,
            "Queued offline mutation"
        );
        Ok(record)
    }

    fn check_owner(&self, mutation_id: &str, entity: &Entity) -> Result<()> {
        if entity.owner_id() != &self.config.owner_id {
            return Err(SyncError::InvalidData(shelf_engine::Error::InvalidData {
                mutation_id: mutation_id.to_string(),
                reason: format!(
                    "entity '{}' belongs to '{}', not '{}'",
                    entity.id(),
                    entity.owner_id(),
                    self.config.owner_id
                ),
            }));
        }
        Ok(())
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryLocalStore, MemoryRemoteStore, MemoryStateStore};
    use shelf_engine::{Book, ErrorKind};

    fn setup() -> (
        Orchestrator,
        Arc<MemoryLocalStore>,
        Arc<MemoryRemoteStore>,
    ) {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let orchestrator = Orchestrator::new(
            SyncConfig::new("u-1"),
            local.clone(),
            remote.clone(),
            Arc::new(MemoryStateStore::new()),
        )
        .unwrap();
        (orchestrator, local, remote)
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = SyncGuard::acquire(&flag).unwrap();
        assert!(SyncGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(SyncGuard::acquire(&flag).is_some());
        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn foreign_owner_is_rejected() {
        let (orchestrator, local, _) = setup();
        let entity = Entity::from(Book::new("b-1", "someone-else", "T", "A", 1));

        let err = orchestrator.enqueue_offline_create(entity).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(local.is_empty());
        assert_eq!(orchestrator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn offline_create_stamps_and_queues() {
        let (orchestrator, local, _) = setup();
        let mut book = Book::new("b-1", "u-1", "1984", "George Orwell", 1);
        book.last_modified_at = None;

        let record = orchestrator
            .enqueue_offline_create(Entity::from(book))
            .await
            .unwrap();

        assert_eq!(record.operation_type, OperationType::Create);
        let stored = local.get(EntityType::Book, "b-1").unwrap();
        assert!(stored.last_modified_at().is_some());
        assert_eq!(record.entity().unwrap(), Some(stored));
        assert_eq!(orchestrator.pending().await, vec![record]);
    }

    #[tokio::test]
    async fn cancelled_before_start_changes_nothing() {
        let (orchestrator, local, remote) = setup();
        orchestrator
            .enqueue_offline_create(Entity::from(Book::new("b-1", "u-1", "T", "A", 1)))
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = orchestrator.sync_all_with_cancel(token).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(result.pending_count, 1);
        assert!(remote.calls().is_empty());
        assert_eq!(local.len(), 1);
        assert!(!orchestrator.is_syncing());
    }
}
