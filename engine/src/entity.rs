//! Entity model for the synchronized library.
//!
//! Every entity carries a globally unique id, the id of the owning user and an
//! optional `last_modified_at` timestamp. Entities without a timestamp cannot
//! be ordered against a remote version; the reconciler keeps the local copy
//! for them.

use crate::{
    error::{Error, Result},
    EntityId, OwnerId, Timestamp,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Kind of synchronized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Book,
    BookCollection,
    ReadingActivity,
    Partnership,
}

impl EntityType {
    /// Pull order for a sync cycle: books first, then the aggregates that
    /// reference them.
    pub const SYNC_ORDER: [EntityType; 4] = [
        EntityType::Book,
        EntityType::BookCollection,
        EntityType::ReadingActivity,
        EntityType::Partnership,
    ];

    /// Stable collection name used by stores.
    pub fn collection_name(&self) -> &'static str {
        match self {
            EntityType::Book => "books",
            EntityType::BookCollection => "collections",
            EntityType::ReadingActivity => "activities",
            EntityType::Partnership => "partnerships",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Book => write!(f, "book"),
            EntityType::BookCollection => write!(f, "bookCollection"),
            EntityType::ReadingActivity => write!(f, "readingActivity"),
            EntityType::Partnership => write!(f, "partnership"),
        }
    }
}

/// Reading progress of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadingStatus {
    #[default]
    WantToRead,
    Reading,
    Finished,
    Abandoned,
}

/// A book in the user's library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: EntityId,
    pub owner_id: OwnerId,
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub status: ReadingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// OR-only: un-sharing is an explicit operation, never a merge outcome.
    #[serde(default)]
    pub shared_with_partner: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_modified_at: Option<Timestamp>,
}

impl Book {
    /// Create a new book with reading status `WantToRead`.
    pub fn new(
        id: impl Into<EntityId>,
        owner_id: impl Into<OwnerId>,
        title: impl Into<String>,
        author: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            author: author.into(),
            isbn: None,
            total_pages: None,
            current_page: 0,
            status: ReadingStatus::WantToRead,
            rating: None,
            notes: None,
            shared_with_partner: false,
            created_at,
            last_modified_at: Some(created_at),
        }
    }
}

/// A named, user-curated group of books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookCollection {
    pub id: EntityId,
    pub owner_id: OwnerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub book_ids: Vec<EntityId>,
    #[serde(default)]
    pub shared_with_partner: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_modified_at: Option<Timestamp>,
}

impl BookCollection {
    pub fn new(
        id: impl Into<EntityId>,
        owner_id: impl Into<OwnerId>,
        name: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            description: None,
            book_ids: Vec::new(),
            shared_with_partner: false,
            created_at,
            last_modified_at: Some(created_at),
        }
    }
}

/// What a reading activity entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    Started,
    Progress,
    Finished,
    Note,
}

/// One entry in the reading log of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingActivity {
    pub id: EntityId,
    pub owner_id: OwnerId,
    pub book_id: EntityId,
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub occurred_at: Timestamp,
    #[serde(default)]
    pub last_modified_at: Option<Timestamp>,
}

impl ReadingActivity {
    pub fn new(
        id: impl Into<EntityId>,
        owner_id: impl Into<OwnerId>,
        book_id: impl Into<EntityId>,
        kind: ActivityKind,
        occurred_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            book_id: book_id.into(),
            kind,
            from_page: None,
            to_page: None,
            note: None,
            occurred_at,
            last_modified_at: Some(occurred_at),
        }
    }

    /// Pages covered by this entry, if both bounds are known.
    pub fn pages_read(&self) -> Option<u32> {
        match (self.from_page, self.to_page) {
            (Some(from), Some(to)) => Some(to.saturating_sub(from)),
            _ => None,
        }
    }
}

/// State of a partner link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartnershipStatus {
    #[default]
    Pending,
    Active,
    Ended,
}

/// A link between the owner and one reading partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partnership {
    pub id: EntityId,
    pub owner_id: OwnerId,
    pub partner_id: String,
    #[serde(default)]
    pub status: PartnershipStatus,
    /// OR-only, like `Book::shared_with_partner`.
    #[serde(default)]
    pub shared: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_modified_at: Option<Timestamp>,
}

impl Partnership {
    pub fn new(
        id: impl Into<EntityId>,
        owner_id: impl Into<OwnerId>,
        partner_id: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            partner_id: partner_id.into(),
            status: PartnershipStatus::Pending,
            shared: false,
            created_at,
            last_modified_at: Some(created_at),
        }
    }
}

/// Any synchronized record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entityType", rename_all = "camelCase")]
pub enum Entity {
    Book(Book),
    BookCollection(BookCollection),
    ReadingActivity(ReadingActivity),
    Partnership(Partnership),
}

impl Entity {
    /// Get the entity ID.
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Book(e) => &e.id,
            Entity::BookCollection(e) => &e.id,
            Entity::ReadingActivity(e) => &e.id,
            Entity::Partnership(e) => &e.id,
        }
    }

    /// Get the owning user ID.
    pub fn owner_id(&self) -> &OwnerId {
        match self {
            Entity::Book(e) => &e.owner_id,
            Entity::BookCollection(e) => &e.owner_id,
            Entity::ReadingActivity(e) => &e.owner_id,
            Entity::Partnership(e) => &e.owner_id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Book(_) => EntityType::Book,
            Entity::BookCollection(_) => EntityType::BookCollection,
            Entity::ReadingActivity(_) => EntityType::ReadingActivity,
            Entity::Partnership(_) => EntityType::Partnership,
        }
    }

    /// Last modification time, if the entity carries a reliable one.
    pub fn last_modified_at(&self) -> Option<Timestamp> {
        match self {
            Entity::Book(e) => e.last_modified_at,
            Entity::BookCollection(e) => e.last_modified_at,
            Entity::ReadingActivity(e) => e.last_modified_at,
            Entity::Partnership(e) => e.last_modified_at,
        }
    }

    /// Stamp a new modification time.
    pub fn touch(&mut self, timestamp: Timestamp) {
        let slot = match self {
            Entity::Book(e) => &mut e.last_modified_at,
            Entity::BookCollection(e) => &mut e.last_modified_at,
            Entity::ReadingActivity(e) => &mut e.last_modified_at,
            Entity::Partnership(e) => &mut e.last_modified_at,
        };
        *slot = Some(timestamp);
    }

    /// OR the monotonic fields of `other` into `self`.
    ///
    /// Only the sharing flags are monotonic. Entities of different types are
    /// left untouched.
    pub fn absorb_monotonic(&mut self, other: &Entity) {
        match (self, other) {
            (Entity::Book(a), Entity::Book(b)) => {
                a.shared_with_partner |= b.shared_with_partner;
            }
            (Entity::BookCollection(a), Entity::BookCollection(b)) => {
                a.shared_with_partner |= b.shared_with_partner;
            }
            (Entity::Partnership(a), Entity::Partnership(b)) => {
                a.shared |= b.shared;
            }
            _ => {}
        }
    }

    /// Serialize the variant's fields, without the type tag.
    pub fn to_payload(&self) -> serde_json::Value {
        let encoded = match self {
            Entity::Book(e) => serde_json::to_value(e),
            Entity::BookCollection(e) => serde_json::to_value(e),
            Entity::ReadingActivity(e) => serde_json::to_value(e),
            Entity::Partnership(e) => serde_json::to_value(e),
        };
        // Plain structs with string keys always encode.
        encoded.unwrap_or(serde_json::Value::Null)
    }

    /// Decode a payload as the declared entity type.
    pub fn from_payload(entity_type: EntityType, payload: &serde_json::Value) -> Result<Self> {
        fn decode<T: DeserializeOwned>(
            entity_type: EntityType,
            payload: &serde_json::Value,
        ) -> Result<T> {
            T::deserialize(payload).map_err(|e| Error::InvalidPayload {
                entity_type,
                reason: e.to_string(),
            })
        }

        Ok(match entity_type {
            EntityType::Book => Entity::Book(decode(entity_type, payload)?),
            EntityType::BookCollection => Entity::BookCollection(decode(entity_type, payload)?),
            EntityType::ReadingActivity => Entity::ReadingActivity(decode(entity_type, payload)?),
            EntityType::Partnership => Entity::Partnership(decode(entity_type, payload)?),
        })
    }

    /// Key identifying this entity across stores.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type(), self.id().clone())
    }
}

impl From<Book> for Entity {
    fn from(value: Book) -> Self {
        Entity::Book(value)
    }
}

impl From<BookCollection> for Entity {
    fn from(value: BookCollection) -> Self {
        Entity::BookCollection(value)
    }
}

impl From<ReadingActivity> for Entity {
    fn from(value: ReadingActivity) -> Self {
        Entity::ReadingActivity(value)
    }
}

impl From<Partnership> for Entity {
    fn from(value: Partnership) -> Self {
        Entity::Partnership(value)
    }
}

/// `(type, id)` pair used to key entities in maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors() {
        let entity = Entity::from(Book::new("b-1", "u-1", "1984", "Orwell", 1000));
        assert_eq!(entity.id(), "b-1");
        assert_eq!(entity.owner_id(), "u-1");
        assert_eq!(entity.entity_type(), EntityType::Book);
        assert_eq!(entity.last_modified_at(), Some(1000));
        assert_eq!(entity.key().to_string(), "book/b-1");
    }

    #[test]
    fn touch_updates_timestamp() {
        let mut entity = Entity::from(Partnership::new("p-1", "u-1", "u-2", 1000));
        entity.touch(5000);
        assert_eq!(entity.last_modified_at(), Some(5000));
    }

    #[test]
    fn absorb_monotonic_ors_share_flags() {
        let mut stale = Book::new("b-1", "u-1", "Dune", "Herbert", 1000);
        stale.shared_with_partner = true;
        let mut fresh = Entity::from(Book::new("b-1", "u-1", "Dune", "Herbert", 2000));

        fresh.absorb_monotonic(&Entity::from(stale));
        match fresh {
            Entity::Book(book) => assert!(book.shared_with_partner),
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn absorb_monotonic_never_downgrades() {
        let mut shared = Partnership::new("p-1", "u-1", "u-2", 1000);
        shared.shared = true;
        let mut entity = Entity::from(shared);
        entity.absorb_monotonic(&Entity::from(Partnership::new("p-1", "u-1", "u-2", 9000)));
        match entity {
            Entity::Partnership(p) => assert!(p.shared),
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn payload_has_no_type_tag() {
        let entity = Entity::from(Book::new("b-1", "u-1", "1984", "Orwell", 1000));
        let payload = entity.to_payload();
        assert!(payload.get("entityType").is_none());
        assert_eq!(payload["title"], "1984");
        assert_eq!(payload["lastModifiedAt"], 1000);

        let decoded = Entity::from_payload(EntityType::Book, &payload).unwrap();
        assert_eq!(decoded, entity);
    }

    #[test]
    fn payload_of_wrong_type_is_rejected() {
        let payload = Entity::from(Book::new("b-1", "u-1", "1984", "Orwell", 1000)).to_payload();
        let err = Entity::from_payload(EntityType::Partnership, &payload).unwrap_err();
        assert!(err.is_invalid_data());
    }

    #[test]
    fn payload_without_timestamp_decodes() {
        let payload = json!({
            "id": "c-1",
            "ownerId": "u-1",
            "name": "Favourites",
            "createdAt": 10
        });
        let entity = Entity::from_payload(EntityType::BookCollection, &payload).unwrap();
        assert_eq!(entity.last_modified_at(), None);
    }

    #[test]
    fn tagged_serialization() {
        let entity = Entity::from(ReadingActivity::new(
            "a-1",
            "u-1",
            "b-1",
            ActivityKind::Progress,
            1000,
        ));
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains("\"entityType\":\"readingActivity\""));
        let parsed: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entity);
    }

    #[test]
    fn pages_read() {
        let mut activity = ReadingActivity::new("a-1", "u-1", "b-1", ActivityKind::Progress, 1);
        assert_eq!(activity.pages_read(), None);
        activity.from_page = Some(40);
        activity.to_page = Some(100);
        assert_eq!(activity.pages_read(), Some(60));
    }

    #[test]
    fn sync_order_starts_with_books() {
        assert_eq!(EntityType::SYNC_ORDER[0], EntityType::Book);
        assert_eq!(EntityType::Book.collection_name(), "books");
    }
}
