//! Domain error types.

use common::SagaConfigId;
use thiserror::Error;

use crate::state::SagaState;
use crate::step::StepStatus;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The saga configuration is malformed.
    #[error("Invalid saga configuration {config_id}: {reason}")]
    InvalidConfig {
        config_id: SagaConfigId,
        reason: String,
    },

    /// The saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SagaState,
    },

    /// A step cannot move between the given statuses.
    #[error("Invalid transition for step {sequence}: {from} -> {to}")]
    InvalidStepTransition {
        sequence: u32,
        from: StepStatus,
        to: StepStatus,
    },

    /// A step index does not exist in the saga.
    #[error("Step index {index} out of range ({len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    /// The configuration source could not be read.
    #[error("Configuration source error: {0}")]
    ConfigSource(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
