//! Saga-level state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a saga instance is in its lifecycle.
///
/// ```text
/// NotStarted ──► Executing ──┬──► Succeeded ──► Completed
///                            └──► Compensating ──► Failed
/// ```
/// A lost entity lock moves any active state straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    NotStarted,
    /// Forward steps are being dispatched.
    Executing,
    /// Every step succeeded; completion not yet recorded.
    Succeeded,
    /// Walking back over earlier steps.
    Compensating,
    /// Compensation finished or halted.
    Failed,
    Completed,
}

impl SagaState {
    /// `Completed` and `Failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Started and not yet terminal, so the saga owns its entity lock.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Executing | Self::Succeeded | Self::Compensating)
    }

    /// True while the saga moves forward through its steps.
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Executing | Self::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Executing => "Executing",
            Self::Succeeded => "Succeeded",
            Self::Compensating => "Compensating",
            Self::Failed => "Failed",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
