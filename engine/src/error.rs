//! Error types for the shelf engine.

use crate::{EntityId, EntityType, MutationId};
use thiserror::Error;

/// All possible errors from the shelf engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload errors
    #[error("invalid data in mutation {mutation_id}: {reason}")]
    InvalidData {
        mutation_id: MutationId,
        reason: String,
    },

    #[error("invalid {entity_type} payload: {reason}")]
    InvalidPayload {
        entity_type: EntityType,
        reason: String,
    },

    #[error("entity type mismatch for '{entity_id}': expected {expected}, got {actual}")]
    EntityTypeMismatch {
        entity_id: EntityId,
        expected: EntityType,
        actual: EntityType,
    },

    #[error("mutation {0} has no payload")]
    MissingPayload(MutationId),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Whether this error describes a payload that cannot be decoded.
    pub fn is_invalid_data(&self) -> bool {
        matches!(
            self,
            Error::InvalidData { .. }
                | Error::InvalidPayload { .. }
                | Error::EntityTypeMismatch { .. }
                | Error::MissingPayload(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
