//! Order-placement demo for the saga orchestrator.
//!
//! Wires the in-memory customer, inventory and order services into an
//! orchestrator, recovers any sagas left unfinished in the store, then
//! places a batch of orders.

pub mod config;
pub mod error;

use common::EntityId;
use domain::{
    CommandTemplate, ExpectedResult, InMemoryConfigSource, SagaConfig, SagaConfigId, SagaOutcome,
    StepDefinition,
};
use saga::services::customer::{RELEASE_CREDIT, RESERVE_CREDIT};
use saga::services::inventory::{RELEASE_INVENTORY, RESERVE_INVENTORY};
use saga::services::order::{CANCEL_ORDER, CREATE_ORDER};
use saga::services::HTTP_STATUS;
use saga::{
    CommandDispatcher, EvaluatorRegistry, InMemoryCustomerService, InMemoryInventoryService,
    InMemoryOrderService, SagaOrchestrator, StatusCodeEvaluator, SubsetEvaluator,
};
use saga_store::{EntityLockStore, SnapshotStore};
use serde::Serialize;
use serde_json::json;

pub use config::{DemoConfig, FailureMode, LogFormat};
pub use error::{CliError, Result};

pub const ORDER_PLACEMENT: &str = "order-placement";

/// Result type judged by containment of the expected document.
pub const DOCUMENT: &str = "document";

/// Builds the three-step order-placement saga for an order of `amount`.
pub fn order_placement_config(amount: u64) -> SagaConfig {
    let status = |name: &str, codes: serde_json::Value| {
        CommandTemplate::new(name, HTTP_STATUS, ExpectedResult::value(codes))
    };

    SagaConfig::new(ORDER_PLACEMENT, "Order placement")
        .with_step(
            StepDefinition::new(
                1,
                status(RESERVE_CREDIT, json!(200)).with_payload(json!({ "amount": amount })),
            )
            .with_compensation(status(RELEASE_CREDIT, json!([200, 204]))),
        )
        .with_step(
            StepDefinition::new(
                2,
                CommandTemplate::new(
                    RESERVE_INVENTORY,
                    DOCUMENT,
                    ExpectedResult::value(json!({ "reserved": true })),
                )
                .with_payload(json!({ "items": [{ "sku": "SKU-001", "quantity": 1 }] })),
            )
            .with_compensation(CommandTemplate::new(
                RELEASE_INVENTORY,
                DOCUMENT,
                ExpectedResult::value(json!({ "reserved": false })),
            )),
        )
        .with_step(
            StepDefinition::new(3, status(CREATE_ORDER, json!([200, 201])))
                .with_compensation(status(CANCEL_ORDER, json!([200, 204]))),
        )
}

/// The services taking part in an order placement.
#[derive(Debug, Clone, Default)]
pub struct DemoServices {
    pub customers: InMemoryCustomerService,
    pub inventory: InMemoryInventoryService,
    pub orders: InMemoryOrderService,
}

impl DemoServices {
    /// Creates the services, rigged to misbehave as `failure` says.
    pub fn new(failure: FailureMode) -> Self {
        let services = Self::default();
        match failure {
            FailureMode::None => {}
            FailureMode::Credit => services.customers.set_decline_reserve(true),
            FailureMode::Inventory => services.inventory.set_fail_on_reserve(true),
            FailureMode::Order => services.orders.set_reject_create(true),
            FailureMode::Compensation => {
                services.orders.set_reject_create(true);
                services.inventory.set_fail_on_release(true);
            }
        }
        services
    }

    pub fn dispatcher(&self) -> Result<CommandDispatcher> {
        Ok(CommandDispatcher::new()
            .with(self.customers.clone())?
            .with(self.inventory.clone())?
            .with(self.orders.clone())?)
    }
}

pub fn evaluators() -> Result<EvaluatorRegistry> {
    Ok(EvaluatorRegistry::new()
        .with(StatusCodeEvaluator::new(HTTP_STATUS))?
        .with(SubsetEvaluator::new(DOCUMENT))?)
}

/// Builds an orchestrator over `store` and `locks` dispatching to `services`.
pub fn build_orchestrator<S, L>(
    store: S,
    locks: L,
    services: &DemoServices,
    config: &DemoConfig,
) -> Result<SagaOrchestrator<S, L>>
where
    S: SnapshotStore,
    L: EntityLockStore,
{
    Ok(
        SagaOrchestrator::new(store, locks, services.dispatcher()?, evaluators()?)
            .with_config(config.orchestrator.clone()),
    )
}

/// What a demo run did.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    /// Sagas found unfinished in the store and driven to a terminal state.
    pub recovered: Vec<SagaOutcome>,
    /// Sagas started by this run.
    pub placed: Vec<SagaOutcome>,
}

impl DemoReport {
    pub fn completed(&self) -> usize {
        self.placed.iter().filter(|o| o.is_completed()).count()
    }
}

/// Recovers unfinished sagas, then places `sagas` orders for new entities.
///
/// A saga that cannot be recovered is logged and skipped.
pub async fn run_demo<S, L>(
    orchestrator: &SagaOrchestrator<S, L>,
    configs: &InMemoryConfigSource,
    sagas: usize,
) -> Result<DemoReport>
where
    S: SnapshotStore,
    L: EntityLockStore,
{
    let mut recovered = Vec::new();
    for report in orchestrator.recover_unfinished().await? {
        match report.outcome {
            Ok(outcome) => recovered.push(outcome),
            Err(e) => tracing::warn!(
                saga_id = %report.saga_id,
                entity_id = %report.entity_id,
                error = %e,
                "skipping unrecoverable saga"
            ),
        }
    }

    let config_id = SagaConfigId::new(ORDER_PLACEMENT);
    let mut placed = Vec::with_capacity(sagas);
    for _ in 0..sagas {
        let entity_id = EntityId::new();
        let outcome = orchestrator.start(configs, entity_id, &config_id).await?;
        tracing::info!(
            saga_id = %outcome.saga_id,
            %entity_id,
            state = %outcome.state,
            "order placement finished"
        );
        placed.push(outcome);
    }

    Ok(DemoReport { recovered, placed })
}
