use thiserror::Error;

use crate::{ETag, EntityId, SagaId};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrency conflict occurred when saving a snapshot.
    /// The expected ETag did not match the persisted one.
    #[error(
        "Concurrency conflict for saga {saga_id}: expected etag {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: ETag,
        actual: ETag,
    },

    /// No snapshot exists for the saga.
    #[error("Snapshot not found for saga {0}")]
    SnapshotNotFound(SagaId),

    /// The entity is locked by another saga.
    #[error("Entity {entity_id} is locked by saga {holder}")]
    LockHeld { entity_id: EntityId, holder: SagaId },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
