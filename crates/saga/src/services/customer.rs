//! Customer credit service.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::EntityId;
use domain::{Command, CommandName};
use serde_json::{Value, json};

use super::{read, write};
use crate::dispatcher::{CommandHandler, HandlerError};

pub const RESERVE_CREDIT: &str = "ReserveCredit";
pub const RELEASE_CREDIT: &str = "ReleaseCredit";

#[derive(Debug, Default)]
struct InMemoryCustomerState {
    reservations: HashMap<EntityId, (String, u64)>,
    next_id: u32,
    decline_reserve: bool,
    fail_on_release: bool,
    reserve_calls: usize,
    release_calls: usize,
}

/// In-memory customer service owning `ReserveCredit` / `ReleaseCredit`.
///
/// The amount is read from the command payload's `amount` field.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCustomerService {
    state: Arc<RwLock<InMemoryCustomerState>>,
}

impl InMemoryCustomerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `ReserveCredit` answer with status 402 (insufficient credit).
    pub fn set_decline_reserve(&self, decline: bool) {
        write(&self.state).decline_reserve = decline;
    }

    /// Makes `ReleaseCredit` fail as if the service were down.
    pub fn set_fail_on_release(&self, fail: bool) {
        write(&self.state).fail_on_release = fail;
    }

    /// Returns the number of active credit reservations.
    pub fn reservation_count(&self) -> usize {
        read(&self.state).reservations.len()
    }

    /// Returns true if credit is reserved for the entity.
    pub fn has_reservation(&self, entity_id: EntityId) -> bool {
        read(&self.state).reservations.contains_key(&entity_id)
    }

    pub fn reserve_calls(&self) -> usize {
        read(&self.state).reserve_calls
    }

    pub fn release_calls(&self) -> usize {
        read(&self.state).release_calls
    }

    fn reserve(&self, command: &Command) -> Result<Option<Value>, HandlerError> {
        let mut state = write(&self.state);
        state.reserve_calls += 1;

        if state.decline_reserve {
            return Ok(Some(json!({"status": 402, "error": "insufficient credit"})));
        }

        let amount = command.payload.get("amount").and_then(Value::as_u64).unwrap_or(0);
        if let Some((id, _)) = state.reservations.get(&command.entity_id) {
            return Ok(Some(json!({"status": 200, "reservation_id": id})));
        }

        state.next_id += 1;
        let reservation_id = format!("CR-{:04}", state.next_id);
        state
            .reservations
            .insert(command.entity_id, (reservation_id.clone(), amount));

        Ok(Some(json!({"status": 200, "reservation_id": reservation_id, "amount": amount})))
    }

    fn release(&self, command: &Command) -> Result<Option<Value>, HandlerError> {
        let mut state = write(&self.state);
        state.release_calls += 1;

        if state.fail_on_release {
            return Err(HandlerError::Unavailable("credit service unavailable".to_string()));
        }

        state.reservations.remove(&command.entity_id);
        Ok(Some(json!({"status": 200})))
    }
}

#[async_trait]
impl CommandHandler for InMemoryCustomerService {
    fn command_names(&self) -> Vec<CommandName> {
        vec![CommandName::new(RESERVE_CREDIT), CommandName::new(RELEASE_CREDIT)]
    }

    async fn execute(
        &self,
        command: &Command,
        _compensating: bool,
    ) -> Result<Option<Value>, HandlerError> {
        match command.name.as_str() {
            RESERVE_CREDIT => self.reserve(command),
            RELEASE_CREDIT => self.release(command),
            other => Err(HandlerError::Rejected(format!("unknown command {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CommandTemplate, ExpectedResult};

    fn command(name: &str, entity: EntityId) -> Command {
        CommandTemplate::new(name, "http-status", ExpectedResult::value(200))
            .with_payload(json!({"amount": 150}))
            .bind(entity)
    }

    #[tokio::test]
    async fn reserve_and_release() {
        let service = InMemoryCustomerService::new();
        let entity = EntityId::new();

        let actual = service
            .execute(&command(RESERVE_CREDIT, entity), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(actual["status"], 200);
        assert_eq!(actual["reservation_id"], "CR-0001");
        assert_eq!(actual["amount"], 150);
        assert!(service.has_reservation(entity));

        service
            .execute(&command(RELEASE_CREDIT, entity), true)
            .await
            .unwrap();
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn reserving_twice_keeps_one_reservation() {
        let service = InMemoryCustomerService::new();
        let entity = EntityId::new();

        service.execute(&command(RESERVE_CREDIT, entity), false).await.unwrap();
        let again = service
            .execute(&command(RESERVE_CREDIT, entity), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(again["reservation_id"], "CR-0001");
        assert_eq!(service.reservation_count(), 1);
        assert_eq!(service.reserve_calls(), 2);
    }

    #[tokio::test]
    async fn declined_reserve_reports_status() {
        let service = InMemoryCustomerService::new();
        service.set_decline_reserve(true);

        let actual = service
            .execute(&command(RESERVE_CREDIT, EntityId::new()), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(actual["status"], 402);
        assert_eq!(service.reservation_count(), 0);
    }

    #[tokio::test]
    async fn failing_release() {
        let service = InMemoryCustomerService::new();
        service.set_fail_on_release(true);

        let result = service
            .execute(&command(RELEASE_CREDIT, EntityId::new()), true)
            .await;
        assert!(matches!(result, Err(HandlerError::Unavailable(_))));
        assert_eq!(service.release_calls(), 1);
    }
}
