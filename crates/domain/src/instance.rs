//! Saga instance: the orchestrated run for one entity.

use chrono::{DateTime, Utc};
use common::{EntityId, SagaConfigId, SagaId};
use saga_store::{ETag, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SagaConfig;
use crate::error::DomainError;
use crate::outcome::{SagaOutcome, StepOutcome};
use crate::state::SagaState;
use crate::step::Step;

/// Why a saga left the forward path, or stopped compensating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    /// The step's action failed or its result was rejected.
    StepFailed { sequence: u32 },
    /// Cancellation was requested before this step was dispatched.
    Cancelled { sequence: u32 },
    /// The entity lock was lost; no further commands were dispatched.
    LockLost,
    /// The step's compensation failed; earlier steps were left untouched.
    CompensationFailed { sequence: u32 },
}

/// A saga instance.
///
/// The instance is a plain value: every transition method validates the
/// current state, mutates in place and bumps `updated_at`. The orchestrator
/// persists a snapshot after each call. Steps are copied from the
/// configuration at creation and never change shape afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    id: SagaId,
    config_id: SagaConfigId,
    entity_id: EntityId,
    steps: Vec<Step>,
    current_step_index: usize,
    state: SagaState,
    halt_reason: Option<HaltReason>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    etag: ETag,
}

impl SagaInstance {
    /// Instantiates a saga from a configuration for one entity.
    pub fn from_config(
        id: SagaId,
        config: &SagaConfig,
        entity_id: EntityId,
    ) -> Result<Self, DomainError> {
        config.validate()?;

        let steps = config
            .steps
            .iter()
            .map(|def| {
                Step::new(
                    def.sequence,
                    def.action.bind(entity_id),
                    def.compensation.as_ref().map(|c| c.bind(entity_id)),
                )
            })
            .collect();

        let now = Utc::now();
        Ok(Self {
            id,
            config_id: config.id.clone(),
            entity_id,
            steps,
            current_step_index: 0,
            state: SagaState::NotStarted,
            halt_reason: None,
            started_at: now,
            updated_at: now,
            etag: ETag::initial(),
        })
    }

    /// Restores an instance from its persisted snapshot.
    ///
    /// The returned instance carries the snapshot's persisted ETag, so the
    /// next save is checked against it.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, DomainError> {
        let etag = snapshot.etag;
        let mut instance: SagaInstance = snapshot.into_state()?;
        instance.etag = etag;
        Ok(instance)
    }

    /// Builds the snapshot to persist; its ETag is the one last observed.
    pub fn to_snapshot(&self) -> Result<Snapshot, DomainError> {
        Ok(Snapshot::from_state(
            self.id,
            self.entity_id,
            self.config_id.clone(),
            self.etag,
            self.state.is_terminal(),
            self,
        )?)
    }

    /// Records the ETag returned by an accepted snapshot write.
    pub fn record_etag(&mut self, etag: ETag) {
        self.etag = etag;
    }

    /// `NotStarted → Executing`.
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.expect_state(SagaState::NotStarted, "NotStarted")?;
        self.state = SagaState::Executing;
        self.touch();
        Ok(())
    }

    /// Marks the current step as dispatched and returns its index.
    pub fn dispatch_current(&mut self) -> Result<usize, DomainError> {
        self.expect_state(SagaState::Executing, "Executing")?;
        let index = self.current_step_index;
        self.step_mut(index)?.mark_dispatched()?;
        self.touch();
        Ok(index)
    }

    /// The current step's action was accepted: advance, and move to
    /// `Succeeded` once no steps remain.
    pub fn complete_current(&mut self, actual: Option<Value>) -> Result<(), DomainError> {
        self.expect_state(SagaState::Executing, "Executing")?;
        let index = self.current_step_index;
        self.step_mut(index)?.mark_succeeded(actual)?;
        self.current_step_index += 1;
        if self.current_step_index == self.steps.len() {
            self.state = SagaState::Succeeded;
        }
        self.touch();
        Ok(())
    }

    /// The current step's action failed or was rejected: the step becomes
    /// `Failed` and the saga turns around to `Compensating`.
    pub fn fail_current(
        &mut self,
        actual: Option<Value>,
        reason: impl Into<String>,
        unconfirmed: bool,
    ) -> Result<(), DomainError> {
        self.expect_state(SagaState::Executing, "Executing")?;
        let index = self.current_step_index;
        let step = self.step_mut(index)?;
        step.mark_failed(actual, reason.into(), unconfirmed)?;
        let sequence = step.sequence();
        self.state = SagaState::Compensating;
        self.halt_reason = Some(HaltReason::StepFailed { sequence });
        self.touch();
        Ok(())
    }

    /// Cancellation between steps: compensate as if the current step had
    /// failed. The current step was never dispatched and stays `NotStarted`.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.expect_state(SagaState::Executing, "Executing")?;
        let sequence = self.step(self.current_step_index)?.sequence();
        self.state = SagaState::Compensating;
        self.halt_reason = Some(HaltReason::Cancelled { sequence });
        self.touch();
        Ok(())
    }

    /// `Succeeded → Completed`.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.expect_state(SagaState::Succeeded, "Succeeded")?;
        self.state = SagaState::Completed;
        self.touch();
        Ok(())
    }

    /// Returns the index of the next step to compensate, walking backward
    /// from the current step index. Irreversible steps are skipped.
    pub fn next_compensation(&self) -> Option<usize> {
        if self.state != SagaState::Compensating || self.steps.is_empty() {
            return None;
        }
        let start = self.current_step_index.min(self.steps.len() - 1);
        (0..=start)
            .rev()
            .find(|&i| self.steps[i].needs_compensation())
    }

    /// Marks step `index` as compensating and moves the cursor onto it.
    pub fn begin_compensation(&mut self, index: usize) -> Result<(), DomainError> {
        self.expect_state(SagaState::Compensating, "Compensating")?;
        self.step_mut(index)?.mark_compensating()?;
        self.current_step_index = index;
        self.touch();
        Ok(())
    }

    /// The compensation of step `index` was accepted.
    pub fn compensation_succeeded(
        &mut self,
        index: usize,
        actual: Option<Value>,
    ) -> Result<(), DomainError> {
        self.expect_state(SagaState::Compensating, "Compensating")?;
        self.step_mut(index)?.mark_compensated(actual)?;
        self.touch();
        Ok(())
    }

    /// The compensation of step `index` failed: halt in `Failed` without
    /// touching earlier steps.
    pub fn compensation_failed(
        &mut self,
        index: usize,
        actual: Option<Value>,
        reason: impl Into<String>,
    ) -> Result<(), DomainError> {
        self.expect_state(SagaState::Compensating, "Compensating")?;
        let step = self.step_mut(index)?;
        step.mark_compensation_failed(actual, reason.into())?;
        let sequence = step.sequence();
        self.state = SagaState::Failed;
        self.halt_reason = Some(HaltReason::CompensationFailed { sequence });
        self.touch();
        Ok(())
    }

    /// Every reachable step is compensated: `Compensating → Failed`.
    pub fn finish_compensation(&mut self) -> Result<(), DomainError> {
        self.expect_state(SagaState::Compensating, "Compensating")?;
        self.state = SagaState::Failed;
        self.touch();
        Ok(())
    }

    /// The entity lock was lost: stop immediately in `Failed`.
    pub fn halt_lock_lost(&mut self) -> Result<(), DomainError> {
        if !self.state.is_active() {
            return Err(DomainError::InvalidState {
                expected: "Executing, Succeeded or Compensating",
                actual: self.state,
            });
        }
        self.state = SagaState::Failed;
        self.halt_reason = Some(HaltReason::LockLost);
        self.touch();
        Ok(())
    }

    /// Summarizes the instance for callers.
    pub fn outcome(&self) -> SagaOutcome {
        SagaOutcome {
            saga_id: self.id,
            entity_id: self.entity_id,
            config_id: self.config_id.clone(),
            state: self.state,
            halt_reason: self.halt_reason,
            steps: self
                .steps
                .iter()
                .map(|s| StepOutcome {
                    sequence: s.sequence(),
                    action: s.action().name.clone(),
                    status: s.status(),
                    error: s.last_error().map(str::to_string),
                })
                .collect(),
        }
    }

    fn expect_state(&self, state: SagaState, expected: &'static str) -> Result<(), DomainError> {
        if self.state != state {
            return Err(DomainError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn step_mut(&mut self, index: usize) -> Result<&mut Step, DomainError> {
        let len = self.steps.len();
        self.steps
            .get_mut(index)
            .ok_or(DomainError::StepOutOfRange { index, len })
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// Query methods
impl SagaInstance {
    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn config_id(&self) -> &SagaConfigId {
        &self.config_id
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the step at `index`.
    pub fn step(&self, index: usize) -> Result<&Step, DomainError> {
        self.steps.get(index).ok_or(DomainError::StepOutOfRange {
            index,
            len: self.steps.len(),
        })
    }

    /// Returns the step the forward path is positioned on, if any remain.
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halt_reason
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn etag(&self) -> ETag {
        self.etag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandTemplate, ExpectedResult};
    use crate::config::StepDefinition;
    use crate::step::StepStatus;
    use serde_json::json;

    fn template(name: &str) -> CommandTemplate {
        CommandTemplate::new(name, "status", ExpectedResult::value(200))
    }

    fn config() -> SagaConfig {
        SagaConfig::new("order-placement", "Order placement")
            .with_step(
                StepDefinition::new(1, template("ReserveCredit"))
                    .with_compensation(template("ReleaseCredit")),
            )
            .with_step(StepDefinition::new(2, template("NotifyCustomer")))
            .with_step(
                StepDefinition::new(3, template("CreateOrder"))
                    .with_compensation(template("CancelOrder")),
            )
    }

    fn started() -> SagaInstance {
        let mut saga = SagaInstance::from_config(SagaId::new(), &config(), EntityId::new()).unwrap();
        saga.start().unwrap();
        saga
    }

    fn succeed_current(saga: &mut SagaInstance) {
        saga.dispatch_current().unwrap();
        saga.complete_current(Some(json!(200))).unwrap();
    }

    #[test]
    fn from_config_binds_every_command_to_the_entity() {
        let entity = EntityId::new();
        let saga = SagaInstance::from_config(SagaId::new(), &config(), entity).unwrap();

        assert_eq!(saga.state(), SagaState::NotStarted);
        assert_eq!(saga.steps().len(), 3);
        assert!(saga.steps().iter().all(|s| s.action().entity_id == entity));
        assert_eq!(saga.steps()[0].compensation().unwrap().entity_id, entity);
        assert!(saga.etag().is_initial());
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let empty = SagaConfig::new("empty", "Empty");
        assert!(SagaInstance::from_config(SagaId::new(), &empty, EntityId::new()).is_err());
    }

    #[test]
    fn forward_path_to_completion() {
        let mut saga = started();
        for _ in 0..3 {
            succeed_current(&mut saga);
        }

        assert_eq!(saga.state(), SagaState::Succeeded);
        assert_eq!(saga.current_step_index(), 3);
        assert!(saga.current_step().is_none());

        saga.complete().unwrap();
        assert_eq!(saga.state(), SagaState::Completed);
        assert!(
            saga.steps()
                .iter()
                .all(|s| s.status() == StepStatus::Succeeded)
        );
    }

    #[test]
    fn cannot_start_twice() {
        let mut saga = started();
        assert!(matches!(
            saga.start(),
            Err(DomainError::InvalidState {
                actual: SagaState::Executing,
                ..
            })
        ));
    }

    #[test]
    fn failure_walks_back_skipping_irreversible_steps() {
        let mut saga = started();
        succeed_current(&mut saga);
        succeed_current(&mut saga);
        saga.dispatch_current().unwrap();
        saga.fail_current(Some(json!(409)), "rejected", false)
            .unwrap();

        assert_eq!(saga.state(), SagaState::Compensating);
        assert_eq!(
            saga.halt_reason(),
            Some(HaltReason::StepFailed { sequence: 3 })
        );

        // Step 3 failed with a confirmed result, step 2 is irreversible.
        assert_eq!(saga.next_compensation(), Some(0));
        saga.begin_compensation(0).unwrap();
        saga.compensation_succeeded(0, Some(json!(200))).unwrap();
        assert_eq!(saga.next_compensation(), None);

        saga.finish_compensation().unwrap();
        assert_eq!(saga.state(), SagaState::Failed);

        let statuses: Vec<_> = saga.steps().iter().map(|s| s.status()).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Compensated,
                StepStatus::Succeeded,
                StepStatus::Failed
            ]
        );
    }

    #[test]
    fn unconfirmed_failure_includes_the_failed_step() {
        let mut saga = started();
        succeed_current(&mut saga);
        succeed_current(&mut saga);
        saga.dispatch_current().unwrap();
        saga.fail_current(None, "timed out", true).unwrap();

        assert_eq!(saga.next_compensation(), Some(2));
    }

    #[test]
    fn cancelled_saga_compensation_failure_halts() {
        let mut saga = started();
        succeed_current(&mut saga);
        succeed_current(&mut saga);
        saga.cancel().unwrap();
        assert_eq!(
            saga.halt_reason(),
            Some(HaltReason::Cancelled { sequence: 3 })
        );

        let index = saga.next_compensation().unwrap();
        assert_eq!(index, 0);
        saga.begin_compensation(index).unwrap();
        saga.compensation_failed(index, None, "service down")
            .unwrap();

        assert_eq!(saga.state(), SagaState::Failed);
        assert_eq!(
            saga.halt_reason(),
            Some(HaltReason::CompensationFailed { sequence: 1 })
        );
        assert_eq!(saga.steps()[2].status(), StepStatus::NotStarted);
    }

    #[test]
    fn lock_lost_halts_from_any_active_state() {
        let mut saga = started();
        succeed_current(&mut saga);
        saga.halt_lock_lost().unwrap();

        assert_eq!(saga.state(), SagaState::Failed);
        assert_eq!(saga.halt_reason(), Some(HaltReason::LockLost));
        assert!(saga.halt_lock_lost().is_err());
    }

    #[test]
    fn snapshot_roundtrip_preserves_progress_and_etag() {
        let mut saga = started();
        succeed_current(&mut saga);
        saga.dispatch_current().unwrap();

        let mut snapshot = saga.to_snapshot().unwrap();
        assert!(!snapshot.terminal);
        snapshot.etag = ETag::new(4);

        let restored = SagaInstance::from_snapshot(snapshot).unwrap();
        assert_eq!(restored.current_step_index(), 1);
        assert_eq!(restored.steps()[1].status(), StepStatus::Dispatched);
        assert_eq!(restored.etag(), ETag::new(4));
        assert_eq!(restored.id(), saga.id());
    }

    #[test]
    fn outcome_lists_every_step() {
        let mut saga = started();
        saga.dispatch_current().unwrap();
        saga.fail_current(None, "declined", false).unwrap();

        let outcome = saga.outcome();
        assert_eq!(outcome.state, SagaState::Compensating);
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.steps[0].status, StepStatus::Failed);
        assert_eq!(outcome.steps[0].error.as_deref(), Some("declined"));
        assert_eq!(outcome.steps[0].action.as_str(), "ReserveCredit");
    }
}
