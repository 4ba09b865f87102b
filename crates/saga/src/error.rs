//! Saga error types.

use common::{EntityId, SagaConfigId, SagaId};
use domain::{CommandName, DomainError, ResultType};
use saga_store::{ETag, StoreError};
use thiserror::Error;

/// Errors returned to callers of `start` and `resume`.
///
/// Handler failures, rejected results, failed compensations and lost locks
/// are not errors: they become step statuses and a halt reason on the
/// returned outcome.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga configuration could not be resolved.
    #[error("Saga configuration not found: {0}")]
    ConfigNotFound(SagaConfigId),

    /// The entity already has an active saga, or its lock could not be
    /// acquired in time.
    #[error("A saga is already running for entity {entity_id}")]
    SagaAlreadyRunning { entity_id: EntityId },

    /// No handler is registered for a command.
    #[error("No handler registered for command '{command}' (compensating: {compensating})")]
    NoHandlerRegistered {
        command: CommandName,
        compensating: bool,
    },

    /// No evaluator is registered for a result type.
    #[error("No evaluator registered for result type '{result_type}'")]
    EvaluatorNotFound { result_type: ResultType },

    /// Two handlers claim the same command name.
    #[error("A handler is already registered for command '{0}'")]
    DuplicateHandler(CommandName),

    /// Two evaluators claim the same result type.
    #[error("An evaluator is already registered for result type '{0}'")]
    DuplicateEvaluator(ResultType),

    /// Another orchestrator wrote the saga snapshot first; it is authoritative.
    #[error(
        "Concurrent modification of saga {saga_id}: expected etag {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: ETag,
        actual: ETag,
    },

    /// No snapshot exists for the saga.
    #[error("Saga not found: {0}")]
    SnapshotNotFound(SagaId),

    /// A snapshot could not be confirmed; the saga did not advance.
    #[error("Snapshot write for saga {saga_id} failed after {attempts} attempts: {reason}")]
    SnapshotWrite {
        saga_id: SagaId,
        attempts: u32,
        reason: String,
    },

    /// Domain error (invalid configuration or transition).
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
