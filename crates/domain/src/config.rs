//! Saga configurations (step templates) and where they come from.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SagaConfigId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::command::CommandTemplate;
use crate::error::DomainError;

/// Template of one step: an action and an optional compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub sequence: u32,
    pub action: CommandTemplate,
    pub compensation: Option<CommandTemplate>,
}

impl StepDefinition {
    /// Creates an irreversible step definition.
    pub fn new(sequence: u32, action: CommandTemplate) -> Self {
        Self {
            sequence,
            action,
            compensation: None,
        }
    }

    /// Adds a compensating command.
    pub fn with_compensation(mut self, compensation: CommandTemplate) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn is_compensable(&self) -> bool {
        self.compensation.is_some()
    }
}

/// An ordered saga template, keyed by its [`SagaConfigId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaConfig {
    pub id: SagaConfigId,
    pub name: String,
    pub steps: Vec<StepDefinition>,
}

impl SagaConfig {
    /// Creates an empty configuration.
    pub fn new(id: impl Into<SagaConfigId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step definition.
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Checks the template is usable: at least one step, strictly
    /// increasing sequence numbers.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.steps.is_empty() {
            return Err(self.invalid("configuration has no steps".to_string()));
        }

        for pair in self.steps.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return Err(self.invalid(format!(
                    "step sequence numbers must be strictly increasing ({} then {})",
                    pair[0].sequence, pair[1].sequence
                )));
            }
        }

        Ok(())
    }

    /// Iterates over every command template, paired with whether it is a
    /// compensating command.
    pub fn command_templates(&self) -> impl Iterator<Item = (&CommandTemplate, bool)> {
        self.steps.iter().flat_map(|step| {
            std::iter::once((&step.action, false))
                .chain(step.compensation.iter().map(|c| (c, true)))
        })
    }

    fn invalid(&self, reason: String) -> DomainError {
        DomainError::InvalidConfig {
            config_id: self.id.clone(),
            reason,
        }
    }
}

/// Read-only source of saga configurations.
///
/// The administrative service owning configurations sits behind this trait.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetches a configuration, returning `None` if it does not exist.
    async fn fetch(&self, id: &SagaConfigId) -> Result<Option<SagaConfig>, DomainError>;
}

/// In-memory configuration source.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigSource {
    configs: Arc<RwLock<HashMap<SagaConfigId, SagaConfig>>>,
}

impl InMemoryConfigSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding the given configurations.
    pub fn with_configs(configs: impl IntoIterator<Item = SagaConfig>) -> Self {
        let configs = configs.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            configs: Arc::new(RwLock::new(configs)),
        }
    }

    /// Adds or replaces a configuration.
    pub async fn insert(&self, config: SagaConfig) {
        self.configs.write().await.insert(config.id.clone(), config);
    }
}

#[async_trait]
impl ConfigSource for InMemoryConfigSource {
    async fn fetch(&self, id: &SagaConfigId) -> Result<Option<SagaConfig>, DomainError> {
        Ok(self.configs.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ExpectedResult;

    fn template(name: &str) -> CommandTemplate {
        CommandTemplate::new(name, "status", ExpectedResult::value(200))
    }

    fn two_step_config() -> SagaConfig {
        SagaConfig::new("order-placement", "Order placement")
            .with_step(
                StepDefinition::new(1, template("ReserveCredit"))
                    .with_compensation(template("ReleaseCredit")),
            )
            .with_step(StepDefinition::new(2, template("CreateOrder")))
    }

    #[test]
    fn valid_config_passes() {
        assert!(two_step_config().validate().is_ok());
    }

    #[test]
    fn empty_config_is_rejected() {
        let config = SagaConfig::new("empty", "Empty");
        assert!(matches!(
            config.validate(),
            Err(DomainError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn non_increasing_sequence_is_rejected() {
        let config = SagaConfig::new("dup", "Duplicate")
            .with_step(StepDefinition::new(2, template("A")))
            .with_step(StepDefinition::new(2, template("B")));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn command_templates_include_compensations() {
        let config = two_step_config();
        let names: Vec<_> = config
            .command_templates()
            .map(|(t, compensating)| (t.name.as_str().to_string(), compensating))
            .collect();

        assert_eq!(
            names,
            vec![
                ("ReserveCredit".to_string(), false),
                ("ReleaseCredit".to_string(), true),
                ("CreateOrder".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn in_memory_source_fetch() {
        let source = InMemoryConfigSource::with_configs([two_step_config()]);

        let found = source
            .fetch(&SagaConfigId::new("order-placement"))
            .await
            .unwrap();
        assert_eq!(found.map(|c| c.steps.len()), Some(2));

        let missing = source.fetch(&SagaConfigId::new("nope")).await.unwrap();
        assert!(missing.is_none());

        source.insert(SagaConfig::new("nope", "Now present")).await;
        assert!(
            source
                .fetch(&SagaConfigId::new("nope"))
                .await
                .unwrap()
                .is_some()
        );
    }
}
