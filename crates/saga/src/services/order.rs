//! Order service.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::EntityId;
use domain::{Command, CommandName};
use serde_json::{Value, json};

use super::{read, write};
use crate::dispatcher::{CommandHandler, HandlerError};

pub const CREATE_ORDER: &str = "CreateOrder";
pub const CANCEL_ORDER: &str = "CancelOrder";

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<EntityId, String>,
    cancelled: Vec<String>,
    next_id: u32,
    reject_create: bool,
    fail_on_cancel: bool,
    create_calls: usize,
}

/// In-memory order service owning `CreateOrder` / `CancelOrder`.
///
/// `CreateOrder` is not safe to re-issue: sending it twice would create two
/// orders.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `CreateOrder` answer with status 409.
    pub fn set_reject_create(&self, reject: bool) {
        write(&self.state).reject_create = reject;
    }

    pub fn set_fail_on_cancel(&self, fail: bool) {
        write(&self.state).fail_on_cancel = fail;
    }

    pub fn order_count(&self) -> usize {
        read(&self.state).orders.len()
    }

    pub fn order_for(&self, entity_id: EntityId) -> Option<String> {
        read(&self.state).orders.get(&entity_id).cloned()
    }

    /// Order ids cancelled so far, in order.
    pub fn cancelled(&self) -> Vec<String> {
        read(&self.state).cancelled.clone()
    }

    pub fn create_calls(&self) -> usize {
        read(&self.state).create_calls
    }

    fn create(&self, command: &Command) -> Result<Option<Value>, HandlerError> {
        let mut state = write(&self.state);
        state.create_calls += 1;

        if state.reject_create {
            return Ok(Some(json!({"status": 409, "error": "order rejected"})));
        }

        state.next_id += 1;
        let order_id = format!("ORD-{:04}", state.next_id);
        state.orders.insert(command.entity_id, order_id.clone());

        Ok(Some(json!({"status": 201, "order_id": order_id})))
    }

    fn cancel(&self, command: &Command) -> Result<Option<Value>, HandlerError> {
        let mut state = write(&self.state);

        if state.fail_on_cancel {
            return Err(HandlerError::Unavailable("order service unavailable".to_string()));
        }

        if let Some(order_id) = state.orders.remove(&command.entity_id) {
            state.cancelled.push(order_id);
        }
        Ok(Some(json!({"status": 200})))
    }
}

#[async_trait]
impl CommandHandler for InMemoryOrderService {
    fn command_names(&self) -> Vec<CommandName> {
        vec![CommandName::new(CREATE_ORDER), CommandName::new(CANCEL_ORDER)]
    }

    fn is_reissue_safe(&self, command: &CommandName) -> bool {
        command.as_str() != CREATE_ORDER
    }

    async fn execute(
        &self,
        command: &Command,
        _compensating: bool,
    ) -> Result<Option<Value>, HandlerError> {
        match command.name.as_str() {
            CREATE_ORDER => self.create(command),
            CANCEL_ORDER => self.cancel(command),
            other => Err(HandlerError::Rejected(format!("unknown command {other}"))),
        }
    }
}
