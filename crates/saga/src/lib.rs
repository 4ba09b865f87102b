//! Saga orchestration engine.
//!
//! This crate drives orchestrated sagas: ordered steps, each pairing an
//! action command with an optional compensating command, executed against
//! independently-owned services so that the group either completes fully
//! or is rolled back.
//!
//! The pieces, leaves first:
//! - [`EvaluatorRegistry`] decides whether a command's actual result
//!   satisfies its expected result
//! - [`CommandDispatcher`] routes a command to the handler owning it
//! - [`LockGuard`] keeps at most one active saga per entity
//! - [`SnapshotRecorder`] persists the instance after every transition
//! - [`SagaOrchestrator`] owns the state machine and ties them together
//!
//! If a step fails, previously succeeded steps are compensated in reverse
//! order. A failed compensation halts the walk and leaves the saga `Failed`
//! for an operator to inspect.

pub mod cancellation;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod lock;
pub mod orchestrator;
pub mod recorder;
pub mod services;

pub use cancellation::CancellationFlag;
pub use config::OrchestratorConfig;
pub use dispatcher::{CommandDispatcher, CommandHandler, DispatchError, HandlerError};
pub use error::{Result, SagaError};
pub use evaluator::{
    EqualityEvaluator, EvaluatorRegistry, FnEvaluator, ResultEvaluator, StatusCodeEvaluator,
    SubsetEvaluator,
};
pub use events::{ChannelEventSink, EventSink, NoopEventSink, SagaEvent, TracingEventSink};
pub use lock::LockGuard;
pub use orchestrator::{RecoveryReport, SagaOrchestrator};
pub use recorder::SnapshotRecorder;
pub use services::{InMemoryCustomerService, InMemoryInventoryService, InMemoryOrderService};
