//! Demo entry point.
//!
//! Runs a batch of order-placement sagas, prints their outcomes as JSON and
//! dumps the Prometheus metrics on exit.

use domain::InMemoryConfigSource;
use saga_cli::{CliError, DemoConfig, DemoReport, DemoServices, LogFormat};
use saga_store::{InMemorySagaStore, PostgresSagaStore};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let config = DemoConfig::from_env();

    // 1. Initialize tracing; stdout carries the report
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire services and run against the configured store
    let services = DemoServices::new(config.failure);
    let configs = InMemoryConfigSource::with_configs([saga_cli::order_placement_config(250)]);
    tracing::info!(sagas = config.sagas, failure = ?config.failure, "starting saga demo");

    let report = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            let store = PostgresSagaStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL saga store");
            run(store.clone(), store, &services, &configs, &config).await?
        }
        None => {
            let store = InMemorySagaStore::new();
            run(store.clone(), store, &services, &configs, &config).await?
        }
    };

    // 4. Report
    tracing::info!(
        recovered = report.recovered.len(),
        placed = report.placed.len(),
        completed = report.completed(),
        "saga demo finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", metrics_handle.render());

    Ok(())
}

async fn run<S, L>(
    store: S,
    locks: L,
    services: &DemoServices,
    configs: &InMemoryConfigSource,
    config: &DemoConfig,
) -> Result<DemoReport, CliError>
where
    S: saga_store::SnapshotStore,
    L: saga_store::EntityLockStore,
{
    let orchestrator = saga_cli::build_orchestrator(store, locks, services, config)?;
    saga_cli::run_demo(&orchestrator, configs, config.sagas).await
}
