//! File-backed stores used by the binary.
//!
//! Both stores replace whole files: the new content is written to a sibling
//! `.tmp` file, flushed, then renamed over the old one, so a crash leaves
//! either the previous or the new version on disk.

use crate::error::StoreError;
use crate::store::{LocalStore, StateStore};
use async_trait::async_trait;
use shelf_engine::{Entity, EntityType, SyncSnapshot};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)
}

/// Sync snapshot stored as one JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<SyncSnapshot>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => Ok(Some(SyncSnapshot::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &SyncSnapshot) -> Result<(), StoreError> {
        let json = snapshot.to_json_pretty()?;
        write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }
}

/// Local replica stored as one JSON document per entity type.
///
/// Each document maps entity id to entity. Writes are serialized through a
/// single lock and rewrite the whole document.
#[derive(Debug)]
pub struct FileLocalStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn document_path(&self, entity_type: EntityType) -> PathBuf {
        self.dir
            .join(format!("{}.json", entity_type.collection_name()))
    }

    async fn read_document(
        &self,
        entity_type: EntityType,
    ) -> Result<BTreeMap<String, Entity>, StoreError> {
        match tokio::fs::read_to_string(self.document_path(entity_type)).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(
        &self,
        entity_type: EntityType,
        document: &BTreeMap<String, Entity>,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let path = self.document_path(entity_type);
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Unavailable(format!("write task failed: {e}")))??;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn upsert(&self, entity: Entity) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let entity_type = entity.entity_type();
        let mut document = self.read_document(entity_type).await?;
        document.insert(entity.id().clone(), entity);
        self.write_document(entity_type, &document).await
    }

    async fn fetch_all(
        &self,
        entity_type: EntityType,
        owner_id: &str,
    ) -> Result<Vec<Entity>, StoreError> {
        let document = self.read_document(entity_type).await?;
        Ok(document
            .into_values()
            .filter(|entity| entity.owner_id() == owner_id)
            .collect())
    }

    async fn delete(&self, entity_type: EntityType, entity_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document(entity_type).await?;
        if document.remove(entity_id).is_some() {
            self.write_document(entity_type, &document).await?;
        }
        Ok(())
    }
}
