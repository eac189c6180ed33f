//! # Shelf Engine
//!
//! The deterministic core of offline-first synchronization for a personal
//! library of books, collections, reading activity and partner links.
//!
//! This crate holds the data model and the decisions: which mutations are
//! queued, in what order they are replayed, and which version of an entity
//! survives when the local and remote replicas diverge. It performs no I/O;
//! the `shelf-sync` crate drives it against real stores.
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! [`Book`], [`BookCollection`], [`ReadingActivity`] and [`Partnership`],
//! unified as [`Entity`]. Each has a unique id, an owner and an optional
//! `last_modified_at` timestamp.
//!
//! ### Mutation records
//!
//! A [`MutationRecord`] captures one create, update or delete made while the
//! remote store was unreachable. Records live in the [`PendingQueue`] in
//! append order until the remote store confirms them.
//!
//! ### Reconciliation
//!
//! [`reconcile`] is the pure last-writer-wins merge with OR-only sharing
//! flags. The [`Reconciler`] applies it to whole entity sets, using the
//! [`AppliedHistory`] of confirmed remote writes to tell remote deletes apart
//! from creates that were never pushed.
//!
//! ## Quick Start
//!
//! ```rust
//! use shelf_engine::{reconcile, Book, Entity};
//!
//! let mut local = Book::new("b-2", "user-1", "Dune", "Frank Herbert", 5);
//! local.current_page = 40;
//!
//! let mut remote = local.clone();
//! remote.current_page = 100;
//! remote.last_modified_at = Some(10);
//!
//! let merged = reconcile(Some(&Entity::from(local)), Some(&Entity::from(remote.clone())));
//! assert_eq!(merged, Some(Entity::from(remote)));
//! ```
//!
//! ## Persistence
//!
//! Use [`SyncSnapshot::capture`] and [`SyncSnapshot::restore`] to move the
//! queue, history and [`SyncState`] through durable storage.

pub mod entity;
pub mod error;
pub mod history;
pub mod mutation;
pub mod queue;
pub mod reconcile;
pub mod snapshot;
pub mod state;

// Re-export main types at crate root
pub use entity::{
    ActivityKind, Book, BookCollection, Entity, EntityKey, EntityType, Partnership,
    PartnershipStatus, ReadingActivity, ReadingStatus,
};
pub use error::Error;
pub use history::{AppliedEntry, AppliedHistory};
pub use mutation::{MutationRecord, OperationType};
pub use queue::{AppendOutcome, DrainSummary, PendingQueue, DEFAULT_SOFT_LIMIT};
pub use reconcile::{
    reconcile, resolve, Conflict, ConflictResolution, ReconcilePlan, Reconciler, Resolution,
    ResolutionReason,
};
pub use snapshot::{SnapshotMetadata, SyncSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use state::{ErrorDescriptor, ErrorKind, SyncResult, SyncState, DEFAULT_MAX_RECENT_ERRORS};

/// Type aliases for clarity
pub type EntityId = String;
pub type OwnerId = String;
pub type MutationId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
