//! Command routing to the services that own each command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{Command, CommandName};
use serde_json::Value;
use thiserror::Error;

use crate::error::SagaError;

/// Error reported by a command handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The service refused the command.
    #[error("{0}")]
    Rejected(String),

    /// The service could not be reached or failed internally.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Why a dispatch did not produce a result.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No handler owns the command, or the owner cannot compensate.
    #[error("no handler registered for command '{command}' (compensating: {compensating})")]
    NoHandlerRegistered {
        command: CommandName,
        compensating: bool,
    },

    /// The handler ran and failed.
    #[error("handler for '{command}' failed: {source}")]
    HandlerExecution {
        command: CommandName,
        #[source]
        source: HandlerError,
    },

    /// The handler did not answer in time. Its effect is unknown.
    #[error("handler for '{command}' timed out after {timeout:?}")]
    Timeout { command: CommandName, timeout: Duration },
}

impl DispatchError {
    /// Returns true if the command may have taken effect without a result
    /// being observed.
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }
}

/// A service that executes commands on behalf of the orchestrator.
///
/// Handlers never see saga state; they receive a command and report the
/// actual result, or `None` when the service produces no result.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Command names this handler owns.
    fn command_names(&self) -> Vec<CommandName>;

    /// Whether this handler accepts compensating dispatches.
    fn supports_compensation(&self) -> bool {
        true
    }

    /// Whether `command` can be sent again when its first outcome was never
    /// observed.
    fn is_reissue_safe(&self, _command: &CommandName) -> bool {
        true
    }

    /// Executes the command.
    async fn execute(
        &self,
        command: &Command,
        compensating: bool,
    ) -> Result<Option<Value>, HandlerError>;
}

/// Routes commands to handlers by command name.
#[derive(Clone, Default)]
pub struct CommandDispatcher {
    handlers: HashMap<CommandName, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under every command name it owns.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> Result<(), SagaError> {
        let names = handler.command_names();
        if let Some(taken) = names.iter().find(|n| self.handlers.contains_key(*n)) {
            return Err(SagaError::DuplicateHandler(taken.clone()));
        }
        for name in names {
            self.handlers.insert(name, Arc::clone(&handler));
        }
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: impl CommandHandler + 'static) -> Result<Self, SagaError> {
        self.register(Arc::new(handler))?;
        Ok(self)
    }

    /// Finds the handler for a command, checking compensation support.
    pub fn handler_for(
        &self,
        name: &CommandName,
        compensating: bool,
    ) -> Result<&Arc<dyn CommandHandler>, DispatchError> {
        match self.handlers.get(name) {
            Some(handler) if !compensating || handler.supports_compensation() => Ok(handler),
            _ => Err(DispatchError::NoHandlerRegistered {
                command: name.clone(),
                compensating,
            }),
        }
    }

    /// Returns true if the owning handler allows re-sending the command.
    /// Unknown commands are never safe.
    pub fn is_reissue_safe(&self, name: &CommandName) -> bool {
        self.handlers
            .get(name)
            .is_some_and(|h| h.is_reissue_safe(name))
    }

    /// Dispatches a command and waits at most `timeout` for its result.
    ///
    /// No retries: a failed or timed-out dispatch is reported as-is.
    pub async fn dispatch(
        &self,
        command: &Command,
        compensating: bool,
        timeout: Duration,
    ) -> Result<Option<Value>, DispatchError> {
        let handler = self.handler_for(&command.name, compensating)?;

        match tokio::time::timeout(timeout, handler.execute(command, compensating)).await {
            Ok(Ok(actual)) => Ok(actual),
            Ok(Err(source)) => Err(DispatchError::HandlerExecution {
                command: command.name.clone(),
                source,
            }),
            Err(_) => Err(DispatchError::Timeout {
                command: command.name.clone(),
                timeout,
            }),
        }
    }
}
