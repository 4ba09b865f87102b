//! Domain layer of the saga orchestrator.
//!
//! This crate provides the saga data model:
//! - Command, CommandTemplate and the typed expected/actual results
//! - Step and its per-step status machine
//! - SagaInstance, the orchestrated run for one entity, with its state machine
//! - SagaConfig, the step template, and the ConfigSource it is fetched from
//! - SagaOutcome, the inspectable result of a run

pub mod command;
pub mod config;
pub mod error;
pub mod instance;
pub mod outcome;
pub mod state;
pub mod step;

pub use command::{Command, CommandName, CommandTemplate, ExpectedResult, ResultType};
pub use common::{EntityId, SagaConfigId, SagaId};
pub use config::{ConfigSource, InMemoryConfigSource, SagaConfig, StepDefinition};
pub use error::DomainError;
pub use instance::{HaltReason, SagaInstance};
pub use outcome::{SagaOutcome, StepOutcome};
pub use state::SagaState;
pub use step::{Step, StepStatus};
