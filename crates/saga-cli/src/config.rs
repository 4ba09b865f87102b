//! Demo configuration loaded from environment variables.

use std::str::FromStr;

use saga::OrchestratorConfig;

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Which service misbehaves during the demo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Every service accepts.
    #[default]
    None,
    /// The customer service declines the credit reservation.
    Credit,
    /// The inventory service rejects the reservation.
    Inventory,
    /// The order service rejects the order, so credit and stock are released.
    Order,
    /// The order is rejected and releasing the stock fails, halting compensation.
    Compensation,
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "credit" => Ok(Self::Credit),
            "inventory" => Ok(Self::Inventory),
            "order" => Ok(Self::Order),
            "compensation" => Ok(Self::Compensation),
            other => Err(format!("unknown failure mode {other:?}")),
        }
    }
}

/// Demo configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DEMO_SAGAS`: number of sagas to start (default: `3`)
/// - `DEMO_FAIL`: `none`, `credit`, `inventory`, `order` or `compensation`
/// - `DATABASE_URL`: use PostgreSQL instead of the in-memory store
/// - the `SAGA_*` orchestrator settings, see [`OrchestratorConfig`]
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub sagas: usize,
    pub failure: FailureMode,
    pub database_url: Option<String>,
    pub orchestrator: OrchestratorConfig,
}

impl DemoConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_format),
            sagas: lookup("DEMO_SAGAS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sagas),
            failure: lookup("DEMO_FAIL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            orchestrator: OrchestratorConfig::from_lookup(&lookup),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            sagas: 3,
            failure: FailureMode::None,
            database_url: None,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}
