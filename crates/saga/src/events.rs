//! Saga lifecycle events for observers.
//!
//! Events are informational. Snapshots are the source of truth; a sink that
//! drops events never changes how a saga runs.

use chrono::{DateTime, Utc};
use common::{EntityId, SagaId};
use domain::HaltReason;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted as a saga moves through its state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaData),

    /// A step's action was accepted.
    SagaStepSucceeded(StepData),

    /// A step's action failed or was rejected.
    SagaStepFailed(StepFailedData),

    /// The saga turned around and began compensating.
    SagaCompensating(HaltData),

    /// A step's compensation was accepted.
    SagaStepCompensated(StepData),

    /// A step's compensation failed; the saga halts.
    SagaCompensationFailed(StepFailedData),

    /// Every step succeeded.
    SagaCompleted(SagaData),

    /// The saga ended in `Failed`.
    SagaFailed(HaltData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::SagaStepSucceeded(_) => "SagaStepSucceeded",
            SagaEvent::SagaStepFailed(_) => "SagaStepFailed",
            SagaEvent::SagaCompensating(_) => "SagaCompensating",
            SagaEvent::SagaStepCompensated(_) => "SagaStepCompensated",
            SagaEvent::SagaCompensationFailed(_) => "SagaCompensationFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }

    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaEvent::SagaStarted(d) | SagaEvent::SagaCompleted(d) => d.saga_id,
            SagaEvent::SagaStepSucceeded(d) | SagaEvent::SagaStepCompensated(d) => d.saga_id,
            SagaEvent::SagaStepFailed(d) | SagaEvent::SagaCompensationFailed(d) => d.saga_id,
            SagaEvent::SagaCompensating(d) | SagaEvent::SagaFailed(d) => d.saga_id,
        }
    }

    /// Step sequence number, for step-level events.
    pub fn sequence(&self) -> Option<u32> {
        match self {
            SagaEvent::SagaStepSucceeded(d) | SagaEvent::SagaStepCompensated(d) => {
                Some(d.sequence)
            }
            SagaEvent::SagaStepFailed(d) | SagaEvent::SagaCompensationFailed(d) => {
                Some(d.sequence)
            }
            _ => None,
        }
    }

    pub fn started(saga_id: SagaId, entity_id: EntityId) -> Self {
        SagaEvent::SagaStarted(SagaData::new(saga_id, entity_id))
    }

    pub fn completed(saga_id: SagaId, entity_id: EntityId) -> Self {
        SagaEvent::SagaCompleted(SagaData::new(saga_id, entity_id))
    }

    pub fn step_succeeded(saga_id: SagaId, entity_id: EntityId, sequence: u32) -> Self {
        SagaEvent::SagaStepSucceeded(StepData::new(saga_id, entity_id, sequence))
    }

    pub fn step_compensated(saga_id: SagaId, entity_id: EntityId, sequence: u32) -> Self {
        SagaEvent::SagaStepCompensated(StepData::new(saga_id, entity_id, sequence))
    }

    pub fn step_failed(
        saga_id: SagaId,
        entity_id: EntityId,
        sequence: u32,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::SagaStepFailed(StepFailedData::new(saga_id, entity_id, sequence, error))
    }

    pub fn compensation_failed(
        saga_id: SagaId,
        entity_id: EntityId,
        sequence: u32,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::SagaCompensationFailed(StepFailedData::new(saga_id, entity_id, sequence, error))
    }

    pub fn compensating(saga_id: SagaId, entity_id: EntityId, reason: Option<HaltReason>) -> Self {
        SagaEvent::SagaCompensating(HaltData::new(saga_id, entity_id, reason))
    }

    pub fn failed(saga_id: SagaId, entity_id: EntityId, reason: Option<HaltReason>) -> Self {
        SagaEvent::SagaFailed(HaltData::new(saga_id, entity_id, reason))
    }
}

/// Data for saga-level events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaData {
    pub saga_id: SagaId,
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
}

impl SagaData {
    fn new(saga_id: SagaId, entity_id: EntityId) -> Self {
        Self {
            saga_id,
            entity_id,
            timestamp: Utc::now(),
        }
    }
}

/// Data for step-level events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub saga_id: SagaId,
    pub entity_id: EntityId,
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
}

impl StepData {
    fn new(saga_id: SagaId, entity_id: EntityId, sequence: u32) -> Self {
        Self {
            saga_id,
            entity_id,
            sequence,
            timestamp: Utc::now(),
        }
    }
}

/// Data for step failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub saga_id: SagaId,
    pub entity_id: EntityId,
    pub sequence: u32,
    /// Error message describing the failure.
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl StepFailedData {
    fn new(saga_id: SagaId, entity_id: EntityId, sequence: u32, error: impl Into<String>) -> Self {
        Self {
            saga_id,
            entity_id,
            sequence,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Data for events carrying a halt reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltData {
    pub saga_id: SagaId,
    pub entity_id: EntityId,
    pub reason: Option<HaltReason>,
    pub timestamp: DateTime<Utc>,
}

impl HaltData {
    fn new(saga_id: SagaId, entity_id: EntityId, reason: Option<HaltReason>) -> Self {
        Self {
            saga_id,
            entity_id,
            reason,
            timestamp: Utc::now(),
        }
    }
}

/// Receives saga events. Emission is synchronous and infallible.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SagaEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SagaEvent) {
        tracing::info!(
            event_type = event.event_type(),
            saga_id = %event.saga_id(),
            sequence = ?event.sequence(),
            "saga event"
        );
    }
}

/// Forwards events to an unbounded channel. Events sent after the receiver
/// is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<SagaEvent>,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SagaEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SagaEvent) {
        let _ = self.tx.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SagaEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_and_sequences() {
        let saga = SagaId::new();
        let entity = EntityId::new();

        let started = SagaEvent::started(saga, entity);
        assert_eq!(started.event_type(), "SagaStarted");
        assert_eq!(started.sequence(), None);
        assert_eq!(started.saga_id(), saga);

        let failed = SagaEvent::step_failed(saga, entity, 2, "rejected");
        assert_eq!(failed.event_type(), "SagaStepFailed");
        assert_eq!(failed.sequence(), Some(2));
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = SagaEvent::failed(
            SagaId::new(),
            EntityId::new(),
            Some(HaltReason::StepFailed { sequence: 2 }),
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "SagaFailed");
        assert_eq!(json["data"]["reason"]["reason"], "step_failed");
        assert_eq!(json["data"]["reason"]["sequence"], 2);

        let back: SagaEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn channel_sink_delivers_and_tolerates_closed_receiver() {
        let (sink, mut rx) = ChannelEventSink::new();
        let saga = SagaId::new();
        sink.emit(SagaEvent::completed(saga, EntityId::new()));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.event_type(), "SagaCompleted");

        drop(rx);
        sink.emit(SagaEvent::completed(saga, EntityId::new()));
    }
}
