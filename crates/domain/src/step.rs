//! Saga steps and their per-step status machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::error::DomainError;

/// Status of a single step.
///
/// ```text
/// NotStarted ──► Dispatched ──┬──► Succeeded ──► Compensating ──┬──► Compensated
///                             └──► Failed                       └──► CompensationFailed
/// ```
/// A `Failed` step whose outcome is unconfirmed may also enter
/// `Compensating`, since its side effect may have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    #[default]
    NotStarted,
    Dispatched,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "NotStarted",
            StepStatus::Dispatched => "Dispatched",
            StepStatus::Succeeded => "Succeeded",
            StepStatus::Failed => "Failed",
            StepStatus::Compensating => "Compensating",
            StepStatus::Compensated => "Compensated",
            StepStatus::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of saga work: an action and an optional compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    sequence: u32,
    action: Command,
    compensation: Option<Command>,
    status: StepStatus,
    /// The action may have taken effect but its result was never confirmed
    /// (dispatch timed out, or the orchestrator stopped mid-dispatch).
    outcome_unconfirmed: bool,
    last_error: Option<String>,
}

impl Step {
    /// Creates a step that has not been dispatched yet.
    pub fn new(sequence: u32, action: Command, compensation: Option<Command>) -> Self {
        Self {
            sequence,
            action,
            compensation,
            status: StepStatus::NotStarted,
            outcome_unconfirmed: false,
            last_error: None,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn action(&self) -> &Command {
        &self.action
    }

    pub fn compensation(&self) -> Option<&Command> {
        self.compensation.as_ref()
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn outcome_unconfirmed(&self) -> bool {
        self.outcome_unconfirmed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns true if the step has a compensating command.
    pub fn is_compensable(&self) -> bool {
        self.compensation.is_some()
    }

    /// Returns true if the backward walk still has to undo this step.
    ///
    /// Steps without a compensating command are irreversible and never
    /// need compensation.
    pub fn needs_compensation(&self) -> bool {
        self.is_compensable()
            && match self.status {
                StepStatus::Succeeded | StepStatus::Compensating => true,
                StepStatus::Failed => self.outcome_unconfirmed,
                _ => false,
            }
    }

    pub(crate) fn mark_dispatched(&mut self) -> Result<(), DomainError> {
        self.transition(&[StepStatus::NotStarted], StepStatus::Dispatched)
    }

    pub(crate) fn mark_succeeded(&mut self, actual: Option<Value>) -> Result<(), DomainError> {
        self.transition(&[StepStatus::Dispatched], StepStatus::Succeeded)?;
        self.action.record_result(actual);
        self.outcome_unconfirmed = false;
        self.last_error = None;
        Ok(())
    }

    pub(crate) fn mark_failed(
        &mut self,
        actual: Option<Value>,
        reason: String,
        unconfirmed: bool,
    ) -> Result<(), DomainError> {
        self.transition(&[StepStatus::Dispatched], StepStatus::Failed)?;
        self.action.record_result(actual);
        self.outcome_unconfirmed = unconfirmed;
        self.last_error = Some(reason);
        Ok(())
    }

    pub(crate) fn mark_compensating(&mut self) -> Result<(), DomainError> {
        if !self.needs_compensation() || self.status == StepStatus::Compensating {
            return Err(self.invalid(StepStatus::Compensating));
        }
        self.status = StepStatus::Compensating;
        Ok(())
    }

    pub(crate) fn mark_compensated(&mut self, actual: Option<Value>) -> Result<(), DomainError> {
        self.transition(&[StepStatus::Compensating], StepStatus::Compensated)?;
        if let Some(compensation) = self.compensation.as_mut() {
            compensation.record_result(actual);
        }
        Ok(())
    }

    pub(crate) fn mark_compensation_failed(
        &mut self,
        actual: Option<Value>,
        reason: String,
    ) -> Result<(), DomainError> {
        self.transition(&[StepStatus::Compensating], StepStatus::CompensationFailed)?;
        if let Some(compensation) = self.compensation.as_mut() {
            compensation.record_result(actual);
        }
        self.last_error = Some(reason);
        Ok(())
    }

    fn transition(&mut self, from: &[StepStatus], to: StepStatus) -> Result<(), DomainError> {
        if !from.contains(&self.status) {
            return Err(self.invalid(to));
        }
        self.status = to;
        Ok(())
    }

    fn invalid(&self, to: StepStatus) -> DomainError {
        DomainError::InvalidStepTransition {
            sequence: self.sequence,
            from: self.status,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandTemplate, ExpectedResult};
    use common::EntityId;
    use serde_json::json;

    fn step(compensable: bool) -> Step {
        let entity = EntityId::new();
        let action = CommandTemplate::new("ReserveCredit", "status", ExpectedResult::value(200))
            .bind(entity);
        let compensation = compensable.then(|| {
            CommandTemplate::new("ReleaseCredit", "status", ExpectedResult::value(200))
                .bind(entity)
        });
        Step::new(1, action, compensation)
    }

    #[test]
    fn forward_success_path() {
        let mut step = step(true);
        step.mark_dispatched().unwrap();
        step.mark_succeeded(Some(json!(200))).unwrap();

        assert_eq!(step.status(), StepStatus::Succeeded);
        assert_eq!(step.action().actual, Some(json!(200)));
        assert!(step.needs_compensation());
    }

    #[test]
    fn cannot_succeed_without_dispatch() {
        let mut step = step(true);
        let err = step.mark_succeeded(None).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidStepTransition {
                from: StepStatus::NotStarted,
                to: StepStatus::Succeeded,
                ..
            }
        ));
    }

    #[test]
    fn compensation_only_after_success() {
        let mut step = step(true);
        step.mark_dispatched().unwrap();
        step.mark_failed(Some(json!(500)), "rejected".into(), false)
            .unwrap();

        assert!(!step.needs_compensation());
        assert!(step.mark_compensating().is_err());
        assert_eq!(step.last_error(), Some("rejected"));
    }

    #[test]
    fn unconfirmed_failure_is_compensable() {
        let mut step = step(true);
        step.mark_dispatched().unwrap();
        step.mark_failed(None, "timed out".into(), true).unwrap();

        assert!(step.needs_compensation());
        step.mark_compensating().unwrap();
        step.mark_compensated(Some(json!(200))).unwrap();
        assert_eq!(step.status(), StepStatus::Compensated);
        assert!(!step.needs_compensation());
    }

    #[test]
    fn irreversible_step_never_needs_compensation() {
        let mut step = step(false);
        step.mark_dispatched().unwrap();
        step.mark_succeeded(None).unwrap();

        assert!(!step.needs_compensation());
        assert!(step.mark_compensating().is_err());
    }

    #[test]
    fn compensation_failure_records_reason() {
        let mut step = step(true);
        step.mark_dispatched().unwrap();
        step.mark_succeeded(None).unwrap();
        step.mark_compensating().unwrap();
        step.mark_compensation_failed(None, "service down".into())
            .unwrap();

        assert_eq!(step.status(), StepStatus::CompensationFailed);
        assert_eq!(step.last_error(), Some("service down"));
        assert!(!step.needs_compensation());
    }
}
