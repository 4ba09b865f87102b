use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ETag, EntityId, SagaConfigId, SagaId};

/// A persisted checkpoint of one saga instance.
///
/// The store treats `state` as opaque JSON; the orchestrator serializes its
/// whole instance into it (step statuses, current step index, saga state).
/// The surrounding columns exist so stores can index and filter snapshots
/// without decoding the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The saga this snapshot belongs to.
    pub saga_id: SagaId,

    /// The entity the saga operates on.
    pub entity_id: EntityId,

    /// The configuration the saga was instantiated from.
    pub config_id: SagaConfigId,

    /// On save: the ETag the writer last observed (`initial` for a new saga).
    /// On load: the ETag currently persisted.
    pub etag: ETag,

    /// True once the saga reached a terminal state.
    pub terminal: bool,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// The serialized saga state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        saga_id: SagaId,
        entity_id: EntityId,
        config_id: SagaConfigId,
        etag: ETag,
        terminal: bool,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            saga_id,
            entity_id,
            config_id,
            etag,
            terminal,
            taken_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }

    /// Gets a reference to the state as JSON.
    pub fn state_ref(&self) -> &serde_json::Value {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestState {
        step: usize,
        status: String,
    }

    #[test]
    fn snapshot_from_state_and_into_state() {
        let original = TestState {
            step: 2,
            status: "Compensating".to_string(),
        };

        let snapshot = Snapshot::from_state(
            SagaId::new(),
            EntityId::new(),
            SagaConfigId::new("order-placement"),
            ETag::new(3),
            false,
            &original,
        )
        .unwrap();

        assert_eq!(snapshot.etag, ETag::new(3));
        assert_eq!(snapshot.state_ref()["step"], 2);

        let restored: TestState = snapshot.into_state().unwrap();
        assert_eq!(restored, original);
    }
}
