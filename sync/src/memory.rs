//! In-memory implementations of the store capabilities.
//!
//! These back the test suite and local experimentation. The remote double
//! can be switched offline, told to reject specific entities, made to lag
//! behind its own writes and asked for the calls it received.

use crate::error::{NetworkError, StoreError};
use crate::store::{LocalStore, RemoteStore, StateStore};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use shelf_engine::{Entity, EntityKey, EntityType, SyncSnapshot};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn owned_by(map: &DashMap<EntityKey, Entity>, entity_type: EntityType, owner_id: &str) -> Vec<Entity> {
    let mut entities: Vec<Entity> = map
        .iter()
        .filter(|entry| entry.key().entity_type == entity_type && entry.value().owner_id() == owner_id)
        .map(|entry| entry.value().clone())
        .collect();
    entities.sort_by(|a, b| a.id().cmp(b.id()));
    entities
}

/// Local replica held in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entities: DashMap<EntityKey, Entity>,
    /// Keys whose upserts fail, for exercising rollback.
    failing: DashSet<EntityKey>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without going through the async API.
    pub fn insert(&self, entity: Entity) {
        self.entities.insert(entity.key(), entity);
    }

    pub fn get(&self, entity_type: EntityType, entity_id: &str) -> Option<Entity> {
        self.entities
            .get(&EntityKey::new(entity_type, entity_id))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Make every upsert of `key` fail until [`MemoryLocalStore::heal`] is called.
    pub fn fail_upserts_for(&self, key: EntityKey) {
        self.failing.insert(key);
    }

    pub fn heal(&self) {
        self.failing.clear();
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        let key = entity.key();
        if self.failing.contains(&key) {
            return Err(StoreError::Unavailable(format!("write refused for {key}")));
        }
        self.entities.insert(key, entity);
        Ok(())
    }

    async fn fetch_all(
        &self,
        entity_type: EntityType,
        owner_id: &str,
    ) -> Result<Vec<Entity>, StoreError> {
        Ok(owned_by(&self.entities, entity_type, owner_id))
    }

    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<(), StoreError> {
        self.entities.remove(&EntityKey::new(entity_type, entity_id));
        Ok(())
    }
}

/// One call received by [`MemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create(EntityKey),
    Update(EntityKey),
    Delete(EntityKey),
    FetchAll(EntityType),
}

/// Canonical service double.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    entities: DashMap<EntityKey, Entity>,
    offline: AtomicBool,
    /// When set, writes are acknowledged but not visible to `fetch_all`.
    read_lag: AtomicBool,
    rejected: DashSet<EntityKey>,
    fetch_delay_ms: AtomicU64,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the canonical copy without logging a call.
    pub fn insert(&self, entity: Entity) {
        self.entities.insert(entity.key(), entity);
    }

    pub fn get(&self, entity_type: EntityType, entity_id: &str) -> Option<Entity> {
        self.entities
            .get(&EntityKey::new(entity_type, entity_id))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_read_lag(&self, lag: bool) {
        self.read_lag.store(lag, Ordering::SeqCst);
    }

    /// Answer every write to `key` with a rejection.
    pub fn reject(&self, key: EntityKey) {
        self.rejected.insert(key);
    }

    pub fn accept_all(&self) {
        self.rejected.clear();
    }

    /// Sleep this long inside every `fetch_all`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Only the write calls, in order.
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, RemoteCall::FetchAll(_)))
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn check_online(&self) -> Result<(), NetworkError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::NotConnected("remote store is offline".into()));
        }
        Ok(())
    }

    fn write(&self, call: RemoteCall, key: &EntityKey) -> Result<(), NetworkError> {
        self.check_online()?;
        if self.rejected.contains(key) {
            return Err(NetworkError::Rejected {
                status: 422,
                message: format!("{key} rejected"),
            });
        }
        lock(&self.calls).push(call);
        Ok(())
    }

    fn put(&self, call: RemoteCall, entity: &Entity) -> Result<(), NetworkError> {
        let key = entity.key();
        self.write(call, &key)?;
        if !self.read_lag.load(Ordering::SeqCst) {
            self.entities.insert(key, entity.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, entity: &Entity) -> Result<(), NetworkError> {
        self.put(RemoteCall::Create(entity.key()), entity)
    }

    async fn update(&self, entity: &Entity) -> Result<(), NetworkError> {
        self.put(RemoteCall::Update(entity.key()), entity)
    }

    async fn delete(
        &self,
        entity_type: EntityType,
        _owner_id: &str,
        entity_id: &str,
    ) -> Result<(), NetworkError> {
        let key = EntityKey::new(entity_type, entity_id);
        self.write(RemoteCall::Delete(key.clone()), &key)?;
        if !self.read_lag.load(Ordering::SeqCst) {
            self.entities.remove(&key);
        }
        Ok(())
    }

    async fn fetch_all(
        &self,
        entity_type: EntityType,
        owner_id: &str,
    ) -> Result<Vec<Entity>, NetworkError> {
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_online()?;
        lock(&self.calls).push(RemoteCall::FetchAll(entity_type));
        Ok(owned_by(&self.entities, entity_type, owner_id))
    }
}

/// Snapshot kept as serialized JSON, so every save goes through the codec.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    saved: Mutex<Option<String>>,
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<SyncSnapshot>, StoreError> {
        match lock(&self.saved).as_deref() {
            Some(json) => Ok(Some(SyncSnapshot::from_json(json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &SyncSnapshot) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("state store is read-only".into()));
        }
        let json = snapshot.to_json()?;
        *lock(&self.saved) = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_engine::Book;

    fn book(id: &str, owner: &str) -> Entity {
        Entity::from(Book::new(id, owner, "Title", "Author", 1))
    }

    #[tokio::test]
    async fn local_fetch_filters_owner_and_type() {
        let store = MemoryLocalStore::new();
        store.upsert(book("b-2", "u-1")).await.unwrap();
        store.upsert(book("b-1", "u-1")).await.unwrap();
        store.upsert(book("b-3", "u-2")).await.unwrap();

        let books = store.fetch_all(EntityType::Book, "u-1").await.unwrap();
        let ids: Vec<_> = books.iter().map(|e| e.id().as_str()).collect();
        assert_eq!(ids, vec!["b-1", "b-2"]);
        assert!(store
            .fetch_all(EntityType::Partnership, "u-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn local_failing_key_refuses_upserts() {
        let store = MemoryLocalStore::new();
        store.fail_upserts_for(EntityKey::new(EntityType::Book, "b-1"));
        assert!(store.upsert(book("b-1", "u-1")).await.is_err());
        assert!(store.upsert(book("b-2", "u-1")).await.is_ok());

        store.heal();
        assert!(store.upsert(book("b-1", "u-1")).await.is_ok());
    }

    #[tokio::test]
    async fn remote_offline_reports_not_connected() {
        let remote = MemoryRemoteStore::new();
        remote.set_offline(true);

        let err = remote.create(&book("b-1", "u-1")).await.unwrap_err();
        assert!(err.is_not_connected());
        assert!(remote.calls().is_empty());
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn remote_delete_of_absent_entity_succeeds() {
        let remote = MemoryRemoteStore::new();
        remote.delete(EntityType::Book, "u-1", "missing").await.unwrap();
        assert_eq!(
            remote.writes(),
            vec![RemoteCall::Delete(EntityKey::new(EntityType::Book, "missing"))]
        );
    }

    #[tokio::test]
    async fn remote_read_lag_hides_writes() {
        let remote = MemoryRemoteStore::new();
        remote.set_read_lag(true);
        remote.create(&book("b-1", "u-1")).await.unwrap();

        assert!(remote.fetch_all(EntityType::Book, "u-1").await.unwrap().is_empty());
        assert_eq!(remote.writes().len(), 1);
    }

    #[test]
    fn state_store_roundtrips_and_can_fail() {
        let store = MemoryStateStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&SyncSnapshot::new("u-1")).unwrap();
        assert_eq!(store.load().unwrap().unwrap().owner_id, "u-1");
        assert_eq!(store.save_count(), 1);

        store.set_fail_saves(true);
        assert!(store.save(&SyncSnapshot::new("u-1")).is_err());
        assert_eq!(store.save_count(), 1);
    }
}
