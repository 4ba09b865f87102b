//! Saga orchestrator: drives instances through their state machine.

use std::sync::Arc;
use std::time::Instant;

use common::{EntityId, LockToken, SagaConfigId, SagaId};
use domain::{
    Command, ConfigSource, DomainError, ExpectedResult, HaltReason, SagaInstance, SagaOutcome,
    SagaState, StepStatus,
};
use saga_store::{EntityLockStore, SnapshotQuery, SnapshotStore};
use serde_json::Value;

use crate::cancellation::CancellationFlag;
use crate::config::OrchestratorConfig;
use crate::dispatcher::{CommandDispatcher, DispatchError};
use crate::error::{Result, SagaError};
use crate::evaluator::EvaluatorRegistry;
use crate::events::{EventSink, SagaEvent, TracingEventSink};
use crate::lock::LockGuard;
use crate::recorder::SnapshotRecorder;

/// Result of resuming one saga during a recovery scan.
#[derive(Debug)]
pub struct RecoveryReport {
    pub saga_id: SagaId,
    pub entity_id: EntityId,
    pub outcome: Result<SagaOutcome>,
}

/// How a dispatched command ended, from the saga's point of view.
enum StepResult {
    Accepted(Option<Value>),
    Rejected {
        actual: Option<Value>,
        reason: String,
        unconfirmed: bool,
    },
}

/// Orchestrates saga instances.
///
/// Each call to [`start`](Self::start) or [`resume`](Self::resume) drives
/// one instance to a terminal state on the calling task. The instance is
/// threaded by value through the transition functions below, and every
/// transition is persisted through the [`SnapshotRecorder`] before the next
/// one begins.
///
/// ```text
/// NotStarted ──► Executing ──► Succeeded ──► Completed
///                    │
///                    └──► Compensating ──► Failed
/// ```
pub struct SagaOrchestrator<S, L> {
    recorder: SnapshotRecorder<S>,
    locks: LockGuard<L>,
    dispatcher: CommandDispatcher,
    evaluators: EvaluatorRegistry,
    events: Arc<dyn EventSink>,
    config: OrchestratorConfig,
}

impl<S, L> SagaOrchestrator<S, L>
where
    S: SnapshotStore,
    L: EntityLockStore,
{
    /// Creates an orchestrator with the default configuration, logging
    /// events through `tracing`.
    pub fn new(
        store: S,
        locks: L,
        dispatcher: CommandDispatcher,
        evaluators: EvaluatorRegistry,
    ) -> Self {
        let config = OrchestratorConfig::default();
        Self {
            recorder: SnapshotRecorder::new(store, &config),
            locks: LockGuard::new(locks, config.lock_timeout),
            dispatcher,
            evaluators,
            events: Arc::new(TracingEventSink),
            config,
        }
    }

    pub fn with_config(self, config: OrchestratorConfig) -> Self {
        let Self {
            recorder,
            locks,
            dispatcher,
            evaluators,
            events,
            ..
        } = self;
        Self {
            recorder: SnapshotRecorder::new(recorder.into_store(), &config),
            locks: LockGuard::new(locks.into_store(), config.lock_timeout),
            dispatcher,
            evaluators,
            events,
            config,
        }
    }

    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Starts a saga for `entity_id` from the configuration `config_id`.
    ///
    /// Returns once the saga is `Completed` or `Failed`. If the entity
    /// already has an active saga, fails with `SagaAlreadyRunning` without
    /// creating an instance.
    pub async fn start<C>(
        &self,
        configs: &C,
        entity_id: EntityId,
        config_id: &SagaConfigId,
    ) -> Result<SagaOutcome>
    where
        C: ConfigSource + ?Sized,
    {
        self.start_with_cancellation(configs, entity_id, config_id, &CancellationFlag::new())
            .await
    }

    /// Like [`start`](Self::start), honoring `cancel` between steps.
    #[tracing::instrument(skip(self, configs, cancel))]
    pub async fn start_with_cancellation<C>(
        &self,
        configs: &C,
        entity_id: EntityId,
        config_id: &SagaConfigId,
        cancel: &CancellationFlag,
    ) -> Result<SagaOutcome>
    where
        C: ConfigSource + ?Sized,
    {
        let config = configs
            .fetch(config_id)
            .await?
            .ok_or_else(|| SagaError::ConfigNotFound(config_id.clone()))?;

        let saga_id = SagaId::new();
        let mut saga = SagaInstance::from_config(saga_id, &config, entity_id)?;
        self.validate_bindings(&saga)?;

        let token = self.locks.acquire(entity_id, saga_id).await?;

        saga.start()?;
        if let Err(e) = self.recorder.persist(&mut saga).await {
            self.locks.release(entity_id, token).await;
            return Err(e);
        }

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(%saga_id, %entity_id, steps = saga.steps().len(), "saga started");
        self.events.emit(SagaEvent::started(saga_id, entity_id));

        self.drive(saga, token, cancel).await
    }

    /// Continues a persisted saga from its latest snapshot.
    ///
    /// A terminal saga is returned as stored. Otherwise the entity lock is
    /// re-acquired (the same saga may re-take its own lock) and the saga
    /// continues in the direction it was persisted in.
    pub async fn resume(&self, saga_id: SagaId) -> Result<SagaOutcome> {
        self.resume_with_cancellation(saga_id, &CancellationFlag::new())
            .await
    }

    /// Like [`resume`](Self::resume), honoring `cancel` between steps.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn resume_with_cancellation(
        &self,
        saga_id: SagaId,
        cancel: &CancellationFlag,
    ) -> Result<SagaOutcome> {
        let saga = self.recorder.load(saga_id).await?;
        let entity_id = saga.entity_id();

        if saga.state().is_terminal() {
            tracing::debug!(%saga_id, state = %saga.state(), "saga already terminal");
            self.release_leftover_lock(entity_id, saga_id).await;
            return Ok(saga.outcome());
        }

        self.validate_bindings(&saga)?;
        let token = self.locks.acquire(entity_id, saga_id).await?;

        tracing::info!(
            %saga_id,
            %entity_id,
            state = %saga.state(),
            step = saga.current_step_index(),
            "resuming saga"
        );
        self.drive(saga, token, cancel).await
    }

    /// Resumes every unfinished saga in the store.
    ///
    /// A failure to resume one saga is reported and the scan continues.
    #[tracing::instrument(skip(self))]
    pub async fn recover_unfinished(&self) -> Result<Vec<RecoveryReport>> {
        let unfinished = self
            .recorder
            .store()
            .query(SnapshotQuery::unfinished())
            .await?;

        tracing::info!(count = unfinished.len(), "recovering unfinished sagas");

        let mut reports = Vec::with_capacity(unfinished.len());
        for snapshot in unfinished {
            let outcome = self.resume(snapshot.saga_id).await;
            if let Err(e) = &outcome {
                tracing::warn!(saga_id = %snapshot.saga_id, error = %e, "saga recovery failed");
            }
            reports.push(RecoveryReport {
                saga_id: snapshot.saga_id,
                entity_id: snapshot.entity_id,
                outcome,
            });
        }
        Ok(reports)
    }

    /// Loads a saga instance for inspection.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        match self.recorder.load(saga_id).await {
            Ok(saga) => Ok(Some(saga)),
            Err(SagaError::SnapshotNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Clears the lock on an entity regardless of its owner, for operators
    /// unblocking an entity whose saga halted.
    pub async fn force_release_lock(&self, entity_id: EntityId) -> Result<()> {
        self.locks.force_release(entity_id).await
    }

    /// Checks that every command has a handler and every result type an
    /// evaluator.
    fn validate_bindings(&self, saga: &SagaInstance) -> Result<()> {
        let commands = saga.steps().iter().flat_map(|step| {
            std::iter::once((step.action(), false))
                .chain(step.compensation().map(|c| (c, true)))
        });

        for (command, compensating) in commands {
            self.dispatcher
                .handler_for(&command.name, compensating)
                .map_err(|_| SagaError::NoHandlerRegistered {
                    command: command.name.clone(),
                    compensating,
                })?;
            if !self.evaluators.contains(&command.result_type) {
                return Err(SagaError::EvaluatorNotFound {
                    result_type: command.result_type.clone(),
                });
            }
        }
        Ok(())
    }

    /// Runs the saga to a terminal state, then releases the lock.
    ///
    /// On an error the saga is left where its last snapshot put it and the
    /// lock stays held, so the saga can be resumed.
    async fn drive(
        &self,
        saga: SagaInstance,
        token: LockToken,
        cancel: &CancellationFlag,
    ) -> Result<SagaOutcome> {
        let started = Instant::now();
        let saga_id = saga.id();
        let entity_id = saga.entity_id();

        let saga = match self.run(saga, token, cancel).await {
            Ok(saga) => saga,
            Err(e) => {
                tracing::error!(%saga_id, %entity_id, error = %e, "saga aborted");
                return Err(e);
            }
        };

        self.locks.release(entity_id, token).await;

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match saga.state() {
            SagaState::Completed => {
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(%saga_id, duration, "saga completed successfully");
            }
            _ => {
                let reason = halt_label(saga.halt_reason());
                metrics::counter!("saga_failed_total", "reason" => reason).increment(1);
                tracing::warn!(%saga_id, duration, reason, "saga failed");
            }
        }

        Ok(saga.outcome())
    }

    async fn run(
        &self,
        mut saga: SagaInstance,
        token: LockToken,
        cancel: &CancellationFlag,
    ) -> Result<SagaInstance> {
        loop {
            saga = match saga.state() {
                SagaState::Completed | SagaState::Failed => return Ok(saga),
                SagaState::NotStarted => {
                    saga.start()?;
                    self.persist(saga).await?
                }
                SagaState::Executing => self.advance(saga, token, cancel).await?,
                SagaState::Succeeded => self.finish(saga).await?,
                SagaState::Compensating => self.compensate_next(saga, token).await?,
            };
        }
    }

    /// One forward transition: cancel, dispatch the current step, or record
    /// its result.
    async fn advance(
        &self,
        mut saga: SagaInstance,
        token: LockToken,
        cancel: &CancellationFlag,
    ) -> Result<SagaInstance> {
        let undispatched = saga
            .current_step()
            .is_some_and(|s| s.status() == StepStatus::NotStarted);
        if cancel.is_cancelled() && undispatched {
            tracing::info!(saga_id = %saga.id(), "saga cancelled");
            saga.cancel()?;
            let saga = self.persist(saga).await?;
            self.events.emit(SagaEvent::compensating(
                saga.id(),
                saga.entity_id(),
                saga.halt_reason(),
            ));
            return Ok(saga);
        }

        if !self.locks.is_held(saga.entity_id(), token).await {
            return self.lose_lock(saga).await;
        }

        let index = saga.current_step_index();
        let step = saga.step(index)?;
        let (sequence, status) = (step.sequence(), step.status());
        let command = step.action().clone();

        match status {
            StepStatus::NotStarted => {
                saga.dispatch_current()?;
                saga = self.persist(saga).await?;
            }
            StepStatus::Dispatched if self.dispatcher.is_reissue_safe(&command.name) => {
                tracing::info!(saga_id = %saga.id(), sequence, command = %command.name, "re-dispatching unconfirmed step");
            }
            StepStatus::Dispatched => {
                tracing::warn!(saga_id = %saga.id(), sequence, command = %command.name, "unconfirmed step is not safe to re-issue");
                let result = StepResult::Rejected {
                    actual: None,
                    reason: "outcome unconfirmed and command is not safe to re-issue".to_string(),
                    unconfirmed: true,
                };
                return self.record_forward(saga, sequence, result).await;
            }
            other => {
                return Err(DomainError::InvalidStepTransition {
                    sequence,
                    from: other,
                    to: StepStatus::Dispatched,
                }
                .into());
            }
        }

        tracing::debug!(saga_id = %saga.id(), sequence, command = %command.name, "dispatching step");
        metrics::counter!("saga_step_dispatch_total", "direction" => "forward").increment(1);
        let result = self.execute(&command, false).await?;
        self.record_forward(saga, sequence, result).await
    }

    async fn record_forward(
        &self,
        mut saga: SagaInstance,
        sequence: u32,
        result: StepResult,
    ) -> Result<SagaInstance> {
        match result {
            StepResult::Accepted(actual) => {
                saga.complete_current(actual)?;
                let saga = self.persist(saga).await?;
                tracing::info!(saga_id = %saga.id(), sequence, "saga step succeeded");
                self.events
                    .emit(SagaEvent::step_succeeded(saga.id(), saga.entity_id(), sequence));
                Ok(saga)
            }
            StepResult::Rejected {
                actual,
                reason,
                unconfirmed,
            } => {
                saga.fail_current(actual, reason.clone(), unconfirmed)?;
                let saga = self.persist(saga).await?;
                tracing::warn!(saga_id = %saga.id(), sequence, unconfirmed, %reason, "saga step failed");
                self.events.emit(SagaEvent::step_failed(
                    saga.id(),
                    saga.entity_id(),
                    sequence,
                    reason,
                ));
                self.events.emit(SagaEvent::compensating(
                    saga.id(),
                    saga.entity_id(),
                    saga.halt_reason(),
                ));
                Ok(saga)
            }
        }
    }

    /// `Succeeded → Completed`.
    async fn finish(&self, mut saga: SagaInstance) -> Result<SagaInstance> {
        saga.complete()?;
        let saga = self.persist(saga).await?;
        self.events
            .emit(SagaEvent::completed(saga.id(), saga.entity_id()));
        Ok(saga)
    }

    /// One backward transition: compensate the next step that needs it, or
    /// finish in `Failed` once none remain.
    async fn compensate_next(&self, mut saga: SagaInstance, token: LockToken) -> Result<SagaInstance> {
        let Some(index) = saga.next_compensation() else {
            saga.finish_compensation()?;
            let saga = self.persist(saga).await?;
            self.emit_failed(&saga);
            return Ok(saga);
        };

        if !self.locks.is_held(saga.entity_id(), token).await {
            return self.lose_lock(saga).await;
        }

        let step = saga.step(index)?;
        let (sequence, status) = (step.sequence(), step.status());
        let Some(command) = step.compensation().cloned() else {
            return Err(DomainError::InvalidStepTransition {
                sequence,
                from: status,
                to: StepStatus::Compensating,
            }
            .into());
        };

        if status == StepStatus::Compensating {
            if !self.dispatcher.is_reissue_safe(&command.name) {
                tracing::warn!(saga_id = %saga.id(), sequence, command = %command.name, "unconfirmed compensation is not safe to re-issue");
                let result = StepResult::Rejected {
                    actual: None,
                    reason: "compensation outcome unconfirmed and command is not safe to re-issue"
                        .to_string(),
                    unconfirmed: true,
                };
                return self.record_compensation(saga, index, sequence, result).await;
            }
            tracing::info!(saga_id = %saga.id(), sequence, command = %command.name, "re-dispatching unconfirmed compensation");
        } else {
            saga.begin_compensation(index)?;
            saga = self.persist(saga).await?;
        }

        tracing::debug!(saga_id = %saga.id(), sequence, command = %command.name, "dispatching compensation");
        metrics::counter!("saga_step_dispatch_total", "direction" => "compensate").increment(1);
        metrics::counter!("saga_compensations_total").increment(1);
        let result = self.execute(&command, true).await?;
        self.record_compensation(saga, index, sequence, result).await
    }

    async fn record_compensation(
        &self,
        mut saga: SagaInstance,
        index: usize,
        sequence: u32,
        result: StepResult,
    ) -> Result<SagaInstance> {
        match result {
            StepResult::Accepted(actual) => {
                saga.compensation_succeeded(index, actual)?;
                let saga = self.persist(saga).await?;
                tracing::info!(saga_id = %saga.id(), sequence, "saga step compensated");
                self.events.emit(SagaEvent::step_compensated(
                    saga.id(),
                    saga.entity_id(),
                    sequence,
                ));
                Ok(saga)
            }
            StepResult::Rejected { actual, reason, .. } => {
                saga.compensation_failed(index, actual, reason.clone())?;
                let saga = self.persist(saga).await?;
                tracing::error!(saga_id = %saga.id(), sequence, %reason, "compensation failed, saga halted");
                self.events.emit(SagaEvent::compensation_failed(
                    saga.id(),
                    saga.entity_id(),
                    sequence,
                    reason,
                ));
                self.emit_failed(&saga);
                Ok(saga)
            }
        }
    }

    /// Dispatches a command and judges its result.
    ///
    /// Handler failures and timeouts become a rejected result; only a
    /// missing handler or evaluator is an error.
    async fn execute(&self, command: &Command, compensating: bool) -> Result<StepResult> {
        match self
            .dispatcher
            .dispatch(command, compensating, self.config.dispatch_timeout)
            .await
        {
            Ok(actual) => {
                let accepted = self.evaluators.evaluate(
                    &command.result_type,
                    actual.as_ref(),
                    &command.expected,
                )?;
                if accepted {
                    Ok(StepResult::Accepted(actual))
                } else {
                    let reason = rejection(actual.as_ref(), &command.expected);
                    Ok(StepResult::Rejected {
                        actual,
                        reason,
                        unconfirmed: false,
                    })
                }
            }
            Err(DispatchError::NoHandlerRegistered {
                command,
                compensating,
            }) => Err(SagaError::NoHandlerRegistered {
                command,
                compensating,
            }),
            Err(e) => Ok(StepResult::Rejected {
                actual: None,
                unconfirmed: e.is_unconfirmed(),
                reason: e.to_string(),
            }),
        }
    }

    async fn lose_lock(&self, mut saga: SagaInstance) -> Result<SagaInstance> {
        tracing::error!(
            saga_id = %saga.id(),
            entity_id = %saga.entity_id(),
            forward = saga.state().is_forward(),
            "entity lock lost, halting saga"
        );
        saga.halt_lock_lost()?;
        let saga = self.persist(saga).await?;
        self.emit_failed(&saga);
        Ok(saga)
    }

    async fn persist(&self, mut saga: SagaInstance) -> Result<SagaInstance> {
        self.recorder.persist(&mut saga).await?;
        Ok(saga)
    }

    fn emit_failed(&self, saga: &SagaInstance) {
        self.events
            .emit(SagaEvent::failed(saga.id(), saga.entity_id(), saga.halt_reason()));
    }

    /// Releases a lock a terminal saga still holds (the process stopped
    /// between the terminal snapshot and the release).
    async fn release_leftover_lock(&self, entity_id: EntityId, saga_id: SagaId) {
        match self.locks.store().holder(entity_id).await {
            Ok(Some(record)) if record.saga_id == saga_id => {
                tracing::info!(%saga_id, %entity_id, "releasing lock left by terminal saga");
                self.locks.release(entity_id, record.token).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(%entity_id, error = %e, "could not inspect entity lock"),
        }
    }
}

fn rejection(actual: Option<&Value>, expected: &ExpectedResult) -> String {
    match (actual, expected) {
        (Some(actual), ExpectedResult::Value(expected)) => {
            format!("result {actual} rejected, expected {expected}")
        }
        (Some(actual), ExpectedResult::Absent) => {
            format!("result {actual} returned, expected no result")
        }
        (None, ExpectedResult::Value(expected)) => {
            format!("no result returned, expected {expected}")
        }
        (None, ExpectedResult::Absent) => "result rejected".to_string(),
    }
}

fn halt_label(reason: Option<HaltReason>) -> &'static str {
    match reason {
        Some(HaltReason::StepFailed { .. }) => "step_failed",
        Some(HaltReason::Cancelled { .. }) => "cancelled",
        Some(HaltReason::LockLost) => "lock_lost",
        Some(HaltReason::CompensationFailed { .. }) => "compensation_failed",
        None => "unknown",
    }
}
