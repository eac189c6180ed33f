//! # Shelf Sync
//!
//! Runtime half of offline-first synchronization: it drives the decisions
//! made by [`shelf_engine`] against real stores.
//!
//! - [`Orchestrator`] runs single-flight sync cycles and accepts offline
//!   mutations through its two-phase `enqueue_offline_*` entry points.
//! - [`DurableQueue`] keeps the pending queue, applied history and sync state
//!   in a [`StateStore`] across restarts.
//! - [`LocalStore`] and [`RemoteStore`] are the consumed capabilities, with
//!   in-memory, file and HTTP implementations.
//!
//! ```rust,no_run
//! use shelf_sync::{MemoryLocalStore, MemoryRemoteStore, MemoryStateStore, Orchestrator, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> shelf_sync::Result<()> {
//! let orchestrator = Orchestrator::new_shared(
//!     SyncConfig::new("user-1"),
//!     Arc::new(MemoryLocalStore::new()),
//!     Arc::new(MemoryRemoteStore::new()),
//!     Arc::new(MemoryStateStore::new()),
//! )?;
//!
//! let result = orchestrator.trigger_sync().await;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod file;
pub mod http;
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod store;

pub use config::{Config, ConfigError, SyncConfig};
pub use error::{NetworkError, Result, StoreError, SyncError};
pub use file::{FileLocalStore, FileStateStore};
pub use http::HttpRemoteStore;
pub use memory::{MemoryLocalStore, MemoryRemoteStore, MemoryStateStore, RemoteCall};
pub use orchestrator::Orchestrator;
pub use queue::{DrainFailure, DurableQueue};
pub use store::{LocalStore, RemoteStore, StateStore};

use shelf_engine::{MutationId, Timestamp};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Fresh identifier for a mutation record.
pub fn new_mutation_id() -> MutationId {
    uuid::Uuid::new_v4().to_string()
}
