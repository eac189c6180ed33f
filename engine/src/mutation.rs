//! Mutation records for expressing queued changes.
//!
//! A user-facing change is written to the local store immediately and also
//! captured as a [`MutationRecord`], which is replayed against the remote
//! store once connectivity returns. Records are immutable once created.

use crate::{
    error::{Error, Result},
    Entity, EntityId, EntityKey, EntityType, MutationId, OwnerId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Kind of change a mutation record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Delete => write!(f, "delete"),
        }
    }
}

/// One queued intent to change an entity on the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    /// Mutation ID
    pub id: MutationId,
    /// Create, update or delete
    pub operation_type: OperationType,
    /// Declared type of the target entity
    pub entity_type: EntityType,
    /// Target entity ID
    pub entity_id: EntityId,
    /// Owner of the target entity
    pub owner_id: OwnerId,
    /// Serialized entity snapshot; absent for deletes
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// When the mutation was recorded (milliseconds since epoch)
    pub created_at: Timestamp,
}

impl MutationRecord {
    /// Record the creation of `entity`.
    pub fn create(id: impl Into<MutationId>, entity: &Entity, created_at: Timestamp) -> Self {
        Self::with_snapshot(id.into(), OperationType::Create, entity, created_at)
    }

    /// Record a full-replacement update of `entity`.
    pub fn update(id: impl Into<MutationId>, entity: &Entity, created_at: Timestamp) -> Self {
        Self::with_snapshot(id.into(), OperationType::Update, entity, created_at)
    }

    /// Record the deletion of an entity.
    pub fn delete(
        id: impl Into<MutationId>,
        entity_type: EntityType,
        entity_id: impl Into<EntityId>,
        owner_id: impl Into<OwnerId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            operation_type: OperationType::Delete,
            entity_type,
            entity_id: entity_id.into(),
            owner_id: owner_id.into(),
            payload: None,
            created_at,
        }
    }

    fn with_snapshot(
        id: MutationId,
        operation_type: OperationType,
        entity: &Entity,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            operation_type,
            entity_type: entity.entity_type(),
            entity_id: entity.id().clone(),
            owner_id: entity.owner_id().clone(),
            payload: Some(entity.to_payload()),
            created_at,
        }
    }

    /// Key of the target entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }

    /// Whether this record writes (creates or updates) the entity.
    pub fn is_write(&self) -> bool {
        matches!(
            self.operation_type,
            OperationType::Create | OperationType::Update
        )
    }

    /// Decode the payload into its declared entity type.
    ///
    /// Creates and updates must carry a payload that decodes into
    /// `entity_type` and names `entity_id`; deletes yield `None`. Every
    /// failure is reported as [`Error::InvalidData`] naming this record.
    pub fn entity(&self) -> Result<Option<Entity>> {
        if self.operation_type == OperationType::Delete {
            return Ok(None);
        }

        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| self.invalid(Error::MissingPayload(self.id.clone())))?;

        let entity =
            Entity::from_payload(self.entity_type, payload).map_err(|e| self.invalid(e))?;

        if entity.id() != &self.entity_id {
            return Err(Error::InvalidData {
                mutation_id: self.id.clone(),
                reason: format!(
                    "payload id '{}' does not match entity id '{}'",
                    entity.id(),
                    self.entity_id
                ),
            });
        }

        Ok(Some(entity))
    }

    fn invalid(&self, cause: Error) -> Error {
        Error::InvalidData {
            mutation_id: self.id.clone(),
            reason: cause.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Book;
    use serde_json::json;

    fn book() -> Entity {
        Entity::from(Book::new("b-1", "u-1", "1984", "Orwell", 1000))
    }

    #[test]
    fn create_record() {
        let record = MutationRecord::create("m-1", &book(), 1500);

        assert_eq!(record.id, "m-1");
        assert_eq!(record.operation_type, OperationType::Create);
        assert_eq!(record.entity_type, EntityType::Book);
        assert_eq!(record.entity_id, "b-1");
        assert_eq!(record.owner_id, "u-1");
        assert_eq!(record.created_at, 1500);
        assert!(record.is_write());
    }

    #[test]
    fn delete_record_has_no_payload() {
        let record = MutationRecord::delete("m-2", EntityType::Book, "b-1", "u-1", 2000);

        assert!(record.payload.is_none());
        assert!(!record.is_write());
        assert_eq!(record.entity().unwrap(), None);
    }

    #[test]
    fn entity_decodes_payload() {
        let record = MutationRecord::update("m-3", &book(), 3000);
        assert_eq!(record.entity().unwrap(), Some(book()));
    }

    #[test]
    fn missing_payload_is_invalid_data() {
        let mut record = MutationRecord::create("m-4", &book(), 1000);
        record.payload = None;

        let err = record.entity().unwrap_err();
        assert!(matches!(err, Error::InvalidData { ref mutation_id, .. } if mutation_id == "m-4"));
    }

    #[test]
    fn undecodable_payload_is_invalid_data() {
        let mut record = MutationRecord::create("m-5", &book(), 1000);
        record.payload = Some(json!({"id": "b-1", "title": 42}));

        let err = record.entity().unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn mismatched_payload_id_is_invalid_data() {
        let mut record = MutationRecord::create("m-6", &book(), 1000);
        record.entity_id = "b-other".into();

        let err = record.entity().unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn serialization_format() {
        let record = MutationRecord::create("m-7", &book(), 1000);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"operationType\":\"create\""));
        assert!(json.contains("\"entityType\":\"book\""));

        let parsed: MutationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
