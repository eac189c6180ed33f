//! History of mutations the remote store has confirmed.
//!
//! The reconciler consults this when an entity exists locally but is absent
//! from the remote snapshot: a confirmed delete means the entity is gone, a
//! confirmed create or update means the write has not become visible yet.

use crate::{EntityKey, EntityType, MutationRecord, OperationType, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The last confirmed operation for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedEntry {
    pub operation_type: OperationType,
    pub confirmed_at: Timestamp,
}

/// Last confirmed remote operation per entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppliedHistory {
    entries: BTreeMap<String, AppliedEntry>,
}

// JSON object keys must be strings, so entries are keyed by `type/id`.
fn history_key(entity_type: EntityType, entity_id: &str) -> String {
    EntityKey::new(entity_type, entity_id).to_string()
}

impl AppliedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `record` was confirmed by the remote store.
    pub fn record(&mut self, record: &MutationRecord, confirmed_at: Timestamp) {
        self.entries.insert(
            history_key(record.entity_type, &record.entity_id),
            AppliedEntry {
                operation_type: record.operation_type,
                confirmed_at,
            },
        );
    }

    pub fn get(&self, entity_type: EntityType, entity_id: &str) -> Option<&AppliedEntry> {
        self.entries.get(&history_key(entity_type, entity_id))
    }

    /// Whether the last confirmed operation for the entity was a delete.
    pub fn confirmed_deleted(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.get(entity_type, entity_id)
            .is_some_and(|e| e.operation_type == OperationType::Delete)
    }

    /// Whether the last confirmed operation for the entity was a create or update.
    pub fn confirmed_written(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.get(entity_type, entity_id)
            .is_some_and(|e| e.operation_type != OperationType::Delete)
    }

    /// Ids of entities of `entity_type` whose last confirmed operation was a delete.
    pub fn confirmed_deletes(&self, entity_type: EntityType) -> impl Iterator<Item = &str> {
        let prefix = format!("{entity_type}/");
        self.entries.iter().filter_map(move |(key, entry)| {
            if entry.operation_type != OperationType::Delete {
                return None;
            }
            key.strip_prefix(prefix.as_str())
        })
    }

    /// Drop the entry for an entity.
    pub fn forget(&mut self, entity_type: EntityType, entity_id: &str) {
        self.entries.remove(&history_key(entity_type, entity_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Book, Entity};

    #[test]
    fn latest_confirmation_wins() {
        let book = Entity::from(Book::new("b-1", "u-1", "Emma", "Austen", 1));
        let mut history = AppliedHistory::new();

        history.record(&MutationRecord::create("m-1", &book, 1), 10);
        assert!(history.confirmed_written(EntityType::Book, "b-1"));
        assert!(!history.confirmed_deleted(EntityType::Book, "b-1"));

        history.record(
            &MutationRecord::delete("m-2", EntityType::Book, "b-1", "u-1", 2),
            20,
        );
        assert!(history.confirmed_deleted(EntityType::Book, "b-1"));
        assert_eq!(history.get(EntityType::Book, "b-1").unwrap().confirmed_at, 20);
    }

    #[test]
    fn keyed_by_type_and_id() {
        let mut history = AppliedHistory::new();
        history.record(
            &MutationRecord::delete("m-1", EntityType::Partnership, "x", "u-1", 1),
            1,
        );

        assert!(history.confirmed_deleted(EntityType::Partnership, "x"));
        assert!(!history.confirmed_deleted(EntityType::Book, "x"));

        history.forget(EntityType::Partnership, "x");
        assert!(history.is_empty());
    }

    #[test]
    fn confirmed_deletes_are_listed_per_type() {
        let book = Entity::from(Book::new("b-1", "u-1", "Emma", "Austen", 1));
        let mut history = AppliedHistory::new();
        history.record(&MutationRecord::create("m-1", &book, 1), 1);
        history.record(
            &MutationRecord::delete("m-2", EntityType::Book, "b-2", "u-1", 2),
            2,
        );
        history.record(
            &MutationRecord::delete("m-3", EntityType::Partnership, "p-1", "u-1", 3),
            3,
        );

        let books: Vec<_> = history.confirmed_deletes(EntityType::Book).collect();
        assert_eq!(books, vec!["b-2"]);
        let partnerships: Vec<_> = history.confirmed_deletes(EntityType::Partnership).collect();
        assert_eq!(partnerships, vec!["p-1"]);
    }

    #[test]
    fn serializes_as_object() {
        let mut history = AppliedHistory::new();
        history.record(
            &MutationRecord::delete("m-1", EntityType::Book, "b-9", "u-1", 1),
            5,
        );

        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json["book/b-9"]["operationType"], "delete");

        let parsed: AppliedHistory = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, history);
    }
}
