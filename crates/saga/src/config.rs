//! Orchestrator configuration.

use std::time::Duration;

/// Timeouts and retry policy for the orchestrator's suspension points.
///
/// | Variable | Default |
/// |---|---|
/// | `SAGA_DISPATCH_TIMEOUT_MS` | 5000 |
/// | `SAGA_LOCK_TIMEOUT_MS` | 1000 |
/// | `SAGA_SNAPSHOT_TIMEOUT_MS` | 2000 |
/// | `SAGA_SNAPSHOT_RETRY_ATTEMPTS` | 3 |
/// | `SAGA_SNAPSHOT_RETRY_BACKOFF_MS` | 50 |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub dispatch_timeout: Duration,
    pub lock_timeout: Duration,
    pub snapshot_timeout: Duration,
    /// Total write attempts per snapshot, at least 1.
    pub snapshot_retry_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub snapshot_retry_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_millis(5000),
            lock_timeout: Duration::from_millis(1000),
            snapshot_timeout: Duration::from_millis(2000),
            snapshot_retry_attempts: 3,
            snapshot_retry_backoff: Duration::from_millis(50),
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from environment variables, with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Missing or unparsable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            dispatch_timeout: millis("SAGA_DISPATCH_TIMEOUT_MS", defaults.dispatch_timeout),
            lock_timeout: millis("SAGA_LOCK_TIMEOUT_MS", defaults.lock_timeout),
            snapshot_timeout: millis("SAGA_SNAPSHOT_TIMEOUT_MS", defaults.snapshot_timeout),
            snapshot_retry_attempts: lookup("SAGA_SNAPSHOT_RETRY_ATTEMPTS")
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.snapshot_retry_attempts)
                .max(1),
            snapshot_retry_backoff: millis(
                "SAGA_SNAPSHOT_RETRY_BACKOFF_MS",
                defaults.snapshot_retry_backoff,
            ),
        }
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_snapshot_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.snapshot_retry_attempts = attempts.max(1);
        self.snapshot_retry_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(OrchestratorConfig::from_lookup(lookup(&[])), OrchestratorConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("SAGA_DISPATCH_TIMEOUT_MS", "250"),
            ("SAGA_SNAPSHOT_RETRY_ATTEMPTS", "5"),
        ]));
        assert_eq!(config.dispatch_timeout, Duration::from_millis(250));
        assert_eq!(config.snapshot_retry_attempts, 5);
        assert_eq!(config.lock_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn ignores_garbage_and_clamps_attempts() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("SAGA_LOCK_TIMEOUT_MS", "soon"),
            ("SAGA_SNAPSHOT_RETRY_ATTEMPTS", "0"),
        ]));
        assert_eq!(config.lock_timeout, Duration::from_millis(1000));
        assert_eq!(config.snapshot_retry_attempts, 1);
    }

    #[test]
    fn builders_override_defaults() {
        let config = OrchestratorConfig::default()
            .with_dispatch_timeout(Duration::from_millis(20))
            .with_lock_timeout(Duration::from_millis(30))
            .with_snapshot_retries(0, Duration::from_millis(5));
        assert_eq!(config.dispatch_timeout, Duration::from_millis(20));
        assert_eq!(config.lock_timeout, Duration::from_millis(30));
        assert_eq!(config.snapshot_retry_attempts, 1);
        assert_eq!(config.snapshot_retry_backoff, Duration::from_millis(5));
    }
}
