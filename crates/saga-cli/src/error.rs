//! Errors surfaced by the demo runner.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Saga(#[from] saga::SagaError),

    #[error(transparent)]
    Store(#[from] saga_store::StoreError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Failed to render outcome: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
