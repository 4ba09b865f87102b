//! Inspectable result of a saga run.

use common::{EntityId, SagaConfigId, SagaId};
use serde::{Deserialize, Serialize};

use crate::command::CommandName;
use crate::instance::HaltReason;
use crate::state::SagaState;
use crate::step::StepStatus;

/// Final status of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub sequence: u32,
    pub action: CommandName,
    pub status: StepStatus,
    pub error: Option<String>,
}

/// What a caller of `start`/`resume` gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaOutcome {
    pub saga_id: SagaId,
    pub entity_id: EntityId,
    pub config_id: SagaConfigId,
    pub state: SagaState,
    pub halt_reason: Option<HaltReason>,
    pub steps: Vec<StepOutcome>,
}

impl SagaOutcome {
    /// Returns true if every step succeeded.
    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }

    /// Returns the outcome of the step with the given sequence number.
    pub fn step(&self, sequence: u32) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.sequence == sequence)
    }

    /// Returns the statuses of all steps, in execution order.
    pub fn statuses(&self) -> Vec<StepStatus> {
        self.steps.iter().map(|s| s.status).collect()
    }
}
