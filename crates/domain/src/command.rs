//! Commands dispatched by saga steps.

use common::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of a command, used to route it to its handler
/// (e.g. `"ReserveCredit"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandName(String);

impl CommandName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Tag identifying the type of a command's result.
///
/// Evaluators are registered per result type; the tag of a step's command
/// selects the evaluator that judges its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultType(String);

impl ResultType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResultType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

/// The result a command is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExpectedResult {
    /// The command is expected to return nothing.
    Absent,
    /// The command is expected to return a value matching this one.
    Value(Value),
}

impl ExpectedResult {
    /// Creates an expectation on a concrete value.
    pub fn value(value: impl Into<Value>) -> Self {
        ExpectedResult::Value(value.into())
    }
}

/// Definition of a command inside a saga configuration, not yet bound to
/// an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub name: CommandName,
    pub result_type: ResultType,
    pub expected: ExpectedResult,
    /// Request body handed to the handler.
    #[serde(default)]
    pub payload: Value,
}

impl CommandTemplate {
    /// Creates a template with an empty payload.
    pub fn new(
        name: impl Into<String>,
        result_type: impl Into<String>,
        expected: ExpectedResult,
    ) -> Self {
        Self {
            name: CommandName::new(name),
            result_type: ResultType::new(result_type),
            expected,
            payload: Value::Null,
        }
    }

    /// Sets the request payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Binds the template to an entity, producing a dispatchable command.
    pub fn bind(&self, entity_id: EntityId) -> Command {
        Command {
            name: self.name.clone(),
            entity_id,
            result_type: self.result_type.clone(),
            expected: self.expected.clone(),
            payload: self.payload.clone(),
            actual: None,
        }
    }
}

/// A named request directed at one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: CommandName,
    pub entity_id: EntityId,
    pub result_type: ResultType,
    pub expected: ExpectedResult,
    pub payload: Value,
    /// Result reported by the handler; `None` until dispatched, or when the
    /// handler returned nothing.
    pub actual: Option<Value>,
}

impl Command {
    /// Records the result reported by the handler.
    pub fn record_result(&mut self, actual: Option<Value>) {
        self.actual = actual;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_copies_template_fields() {
        let template = CommandTemplate::new(
            "ReserveCredit",
            "credit-reservation",
            ExpectedResult::value(json!({"reserved": true})),
        )
        .with_payload(json!({"amount": 250}));
        let entity = EntityId::new();

        let command = template.bind(entity);

        assert_eq!(command.name.as_str(), "ReserveCredit");
        assert_eq!(command.entity_id, entity);
        assert_eq!(command.result_type.as_str(), "credit-reservation");
        assert_eq!(command.payload["amount"], 250);
        assert!(command.actual.is_none());
    }

    #[test]
    fn expected_result_serialization() {
        let absent = serde_json::to_value(ExpectedResult::Absent).unwrap();
        assert_eq!(absent, json!({"kind": "absent"}));

        let value = serde_json::to_value(ExpectedResult::value(201)).unwrap();
        assert_eq!(value, json!({"kind": "value", "value": 201}));

        let back: ExpectedResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, ExpectedResult::value(201));
    }

    #[test]
    fn record_result_sets_actual() {
        let mut command =
            CommandTemplate::new("CreateOrder", "http-status", ExpectedResult::value(201))
                .bind(EntityId::new());
        command.record_result(Some(json!(201)));
        assert_eq!(command.actual, Some(json!(201)));
    }
}
