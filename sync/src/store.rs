//! Capabilities the orchestrator consumes.
//!
//! The local replica, the canonical service and the durable side channel for
//! sync metadata are all reached through these traits, so the orchestrator
//! can be driven against in-memory doubles in tests and against files and
//! HTTP in the binary.

use crate::error::{NetworkError, StoreError};
use async_trait::async_trait;
use shelf_engine::{Entity, EntityType, SyncSnapshot};

/// Durable local CRUD for entities.
///
/// Implementations only ever see whole-entity writes.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or replace the entity with the same type and id.
    async fn upsert(&self, entity: Entity) -> Result<(), StoreError>;

    /// Every entity of `entity_type` owned by `owner_id`.
    async fn fetch_all(
        &self,
        entity_type: EntityType,
        owner_id: &str,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Remove an entity. Removing an absent entity is not an error.
    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<(), StoreError>;
}

/// Network CRUD against the canonical service.
///
/// Every call must be idempotent: create and update behave as upserts and
/// deleting an absent entity succeeds.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, entity: &Entity) -> Result<(), NetworkError>;

    async fn update(&self, entity: &Entity) -> Result<(), NetworkError>;

    async fn delete(
        &self,
        entity_type: EntityType,
        owner_id: &str,
        entity_id: &str,
    ) -> Result<(), NetworkError>;

    async fn fetch_all(
        &self,
        entity_type: EntityType,
        owner_id: &str,
    ) -> Result<Vec<Entity>, NetworkError>;
}

/// Durable storage for the sync snapshot.
///
/// Kept apart from [`LocalStore`] so the pending queue stays valid whatever
/// happens to live entity state.
pub trait StateStore: Send + Sync {
    /// The last saved snapshot, or `None` on first start.
    fn load(&self) -> Result<Option<SyncSnapshot>, StoreError>;

    fn save(&self, snapshot: &SyncSnapshot) -> Result<(), StoreError>;
}
