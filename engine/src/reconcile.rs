//! Reconciliation of local and remote entity versions.
//!
//! Policy is last-writer-wins on `last_modified_at`:
//!
//! 1. Remote-only entities are adopted.
//! 2. Local-only entities are kept, unless the remote store confirmed a
//!    delete for them. Local-only entities that were never pushed get a
//!    create re-enqueued.
//! 3. When both exist, the later timestamp wins wholesale. Equal timestamps
//!    go to the remote version. A missing timestamp on either side keeps the
//!    local version.
//! 4. OR-only fields (sharing flags) are absorbed from the losing version.
//!
//! [`resolve`] and [`reconcile`] are pure and total. [`Reconciler`] applies
//! them over whole entity sets and produces a [`ReconcilePlan`] for the
//! caller to persist.

use crate::{AppliedHistory, Entity, EntityId, EntityKey, EntityType, PendingQueue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which side a resolution picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// Local version won
    LocalWins,
    /// Remote version won
    RemoteWins,
}

/// Why a resolution picked its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionReason {
    /// One side was modified later
    NewerTimestamp,
    /// Timestamps were equal; remote wins ties
    TieBreak,
    /// At least one side has no reliable timestamp; local wins
    MissingTimestamp,
    /// The versions disagree on entity type; local wins
    TypeMismatch,
}

/// The outcome of resolving two versions of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The version to persist
    pub entity: Entity,
    pub resolution: ConflictResolution,
    pub reason: ResolutionReason,
}

/// Resolve a local and a remote version of the same entity.
pub fn resolve(local: &Entity, remote: &Entity) -> Resolution {
    if local.entity_type() != remote.entity_type() {
        return Resolution {
            entity: local.clone(),
            resolution: ConflictResolution::LocalWins,
            reason: ResolutionReason::TypeMismatch,
        };
    }

    let (winner, loser, resolution, reason) =
        match (local.last_modified_at(), remote.last_modified_at()) {
            (Some(l), Some(r)) if l > r => (
                local,
                remote,
                ConflictResolution::LocalWins,
                ResolutionReason::NewerTimestamp,
            ),
            (Some(l), Some(r)) if l < r => (
                remote,
                local,
                ConflictResolution::RemoteWins,
                ResolutionReason::NewerTimestamp,
            ),
            (Some(_), Some(_)) => (
                remote,
                local,
                ConflictResolution::RemoteWins,
                ResolutionReason::TieBreak,
            ),
            _ => (
                local,
                remote,
                ConflictResolution::LocalWins,
                ResolutionReason::MissingTimestamp,
            ),
        };

    let mut entity = winner.clone();
    entity.absorb_monotonic(loser);

    Resolution {
        entity,
        resolution,
        reason,
    }
}

/// Choose the version of an entity to keep.
///
/// A local-only entity is kept: without history this function cannot tell a
/// remote delete from a create that was never pushed. Use [`Reconciler`] when
/// that history is available.
pub fn reconcile(local: Option<&Entity>, remote: Option<&Entity>) -> Option<Entity> {
    match (local, remote) {
        (None, None) => None,
        (None, Some(remote)) => Some(remote.clone()),
        (Some(local), None) => Some(local.clone()),
        (Some(local), Some(remote)) => Some(resolve(local, remote).entity),
    }
}

/// A divergence between local and remote versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub key: EntityKey,
    pub resolution: ConflictResolution,
    pub reason: ResolutionReason,
    pub local_modified_at: Option<Timestamp>,
    pub remote_modified_at: Option<Timestamp>,
}

/// Writes that bring the local replica in line with reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Entities to upsert into the local store
    pub upserts: Vec<Entity>,
    /// Entities to delete from the local store
    pub deletes: Vec<EntityKey>,
    /// Local-only entities that must be pushed as creates
    pub enqueue_creates: Vec<Entity>,
    /// Merged entities the remote has not seen yet
    pub enqueue_updates: Vec<Entity>,
    /// History entries that are no longer needed
    pub forget: Vec<EntityKey>,
    /// Divergences that were resolved
    pub conflicts: Vec<Conflict>,
    /// Entities that needed no change
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append another plan, keeping order.
    pub fn extend(&mut self, other: ReconcilePlan) {
        self.upserts.extend(other.upserts);
        self.deletes.extend(other.deletes);
        self.enqueue_creates.extend(other.enqueue_creates);
        self.enqueue_updates.extend(other.enqueue_updates);
        self.forget.extend(other.forget);
        self.conflicts.extend(other.conflicts);
        self.unchanged += other.unchanged;
    }

    /// Number of local store writes the plan requires.
    pub fn local_writes(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    /// Keep only the writes whose key passes `keep`. Conflicts stay as
    /// reported.
    pub fn retain_keys<F>(&mut self, mut keep: F)
    where
        F: FnMut(&EntityKey) -> bool,
    {
        self.upserts.retain(|e| keep(&e.key()));
        self.deletes.retain(|k| keep(k));
        self.enqueue_creates.retain(|e| keep(&e.key()));
        self.enqueue_updates.retain(|e| keep(&e.key()));
        self.forget.retain(|k| keep(k));
    }

    /// Whether the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.local_writes() == 0
            && self.enqueue_creates.is_empty()
            && self.enqueue_updates.is_empty()
            && self.forget.is_empty()
    }
}

/// Plans reconciliation of whole entity sets.
///
/// Holds the pending queue and applied history so local-only entities can be
/// told apart from remote deletes.
pub struct Reconciler<'a> {
    queue: &'a PendingQueue,
    history: &'a AppliedHistory,
}

impl<'a> Reconciler<'a> {
    /// Create a new reconciler.
    pub fn new(queue: &'a PendingQueue, history: &'a AppliedHistory) -> Self {
        Self { queue, history }
    }

    /// Plan reconciliation for one entity type.
    ///
    /// Entities are visited in ID order so plans are deterministic.
    pub fn plan(
        &self,
        entity_type: EntityType,
        local: Vec<Entity>,
        remote: Vec<Entity>,
    ) -> ReconcilePlan {
        let local: BTreeMap<EntityId, Entity> =
            local.into_iter().map(|e| (e.id().clone(), e)).collect();
        let remote: BTreeMap<EntityId, Entity> =
            remote.into_iter().map(|e| (e.id().clone(), e)).collect();
        let ids: BTreeSet<&EntityId> = local.keys().chain(remote.keys()).collect();

        let mut plan = ReconcilePlan::new();
        for id in ids {
            self.plan_entity(
                &mut plan,
                EntityKey::new(entity_type, id.clone()),
                local.get(id),
                remote.get(id),
            );
        }

        // A confirmed delete is settled once neither side has the entity.
        for id in self.history.confirmed_deletes(entity_type) {
            if !local.contains_key(id) && !remote.contains_key(id) {
                plan.forget.push(EntityKey::new(entity_type, id));
            }
        }
        plan
    }

    fn plan_entity(
        &self,
        plan: &mut ReconcilePlan,
        key: EntityKey,
        local: Option<&Entity>,
        remote: Option<&Entity>,
    ) {
        let entity_type = key.entity_type;
        let id = key.entity_id.as_str();
        let pending = self.queue.has_pending(entity_type, id);

        match (local, remote) {
            (None, None) => {}
            (None, Some(remote)) => {
                // A queued or confirmed delete must not be undone by a
                // remote snapshot that has not caught up yet.
                if pending || self.history.confirmed_deleted(entity_type, id) {
                    plan.unchanged += 1;
                } else {
                    plan.upserts.push(remote.clone());
                }
            }
            (Some(local), None) => {
                if self.history.confirmed_deleted(entity_type, id) {
                    plan.deletes.push(key.clone());
                    plan.forget.push(key);
                } else if pending || self.history.confirmed_written(entity_type, id) {
                    plan.unchanged += 1;
                } else {
                    plan.enqueue_creates.push(local.clone());
                }
            }
            (Some(local), Some(remote)) => {
                let resolution = resolve(local, remote);

                if local != remote {
                    plan.conflicts.push(Conflict {
                        key: key.clone(),
                        resolution: resolution.resolution,
                        reason: resolution.reason,
                        local_modified_at: local.last_modified_at(),
                        remote_modified_at: remote.last_modified_at(),
                    });
                }

                let converged = &resolution.entity == remote;
                if converged && self.history.get(entity_type, id).is_some() {
                    plan.forget.push(key.clone());
                }
                if !converged && !pending && !self.history.confirmed_written(entity_type, id) {
                    plan.enqueue_updates.push(resolution.entity.clone());
                }

                if &resolution.entity != local {
                    plan.upserts.push(resolution.entity);
                } else {
                    plan.unchanged += 1;
                }
            }
        }
    }
}
