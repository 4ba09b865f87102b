//! Inventory reservation service.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::EntityId;
use domain::{Command, CommandName};
use serde_json::{Value, json};

use super::{read, write};
use crate::dispatcher::{CommandHandler, HandlerError};

pub const RESERVE_INVENTORY: &str = "ReserveInventory";
pub const RELEASE_INVENTORY: &str = "ReleaseInventory";

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, (EntityId, Value)>,
    next_id: u32,
    fail_on_reserve: bool,
    fail_on_release: bool,
}

/// In-memory inventory service owning `ReserveInventory` /
/// `ReleaseInventory`.
///
/// Reservation results look like `{"status": 200, "reserved": true,
/// "reservation_id": "RES-0001"}`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail reserve calls with "Insufficient stock".
    pub fn set_fail_on_reserve(&self, fail: bool) {
        write(&self.state).fail_on_reserve = fail;
    }

    pub fn set_fail_on_release(&self, fail: bool) {
        write(&self.state).fail_on_release = fail;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        read(&self.state).reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        read(&self.state).reservations.contains_key(reservation_id)
    }

    fn reserve(&self, command: &Command) -> Result<Option<Value>, HandlerError> {
        let mut state = write(&self.state);

        if state.fail_on_reserve {
            return Err(HandlerError::Rejected("Insufficient stock".to_string()));
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        let items = command.payload.get("items").cloned().unwrap_or(Value::Null);
        state
            .reservations
            .insert(reservation_id.clone(), (command.entity_id, items));

        Ok(Some(json!({
            "status": 200,
            "reserved": true,
            "reservation_id": reservation_id,
        })))
    }

    /// Releases every reservation held for the command's entity.
    fn release(&self, command: &Command) -> Result<Option<Value>, HandlerError> {
        let mut state = write(&self.state);

        if state.fail_on_release {
            return Err(HandlerError::Unavailable("inventory service unavailable".to_string()));
        }

        state
            .reservations
            .retain(|_, (entity, _)| *entity != command.entity_id);
        Ok(Some(json!({"status": 200, "reserved": false})))
    }
}

#[async_trait]
impl CommandHandler for InMemoryInventoryService {
    fn command_names(&self) -> Vec<CommandName> {
        vec![
            CommandName::new(RESERVE_INVENTORY),
            CommandName::new(RELEASE_INVENTORY),
        ]
    }

    async fn execute(
        &self,
        command: &Command,
        _compensating: bool,
    ) -> Result<Option<Value>, HandlerError> {
        match command.name.as_str() {
            RESERVE_INVENTORY => self.reserve(command),
            RELEASE_INVENTORY => self.release(command),
            other => Err(HandlerError::Rejected(format!("unknown command {other}"))),
        }
    }
}
