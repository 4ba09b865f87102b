//! Result evaluation strategies.

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ExpectedResult, ResultType};
use serde_json::Value;

use crate::error::SagaError;

/// Decides whether a command's actual result satisfies its expected result.
///
/// Evaluators are pure: no I/O, no side effects. Absent results never reach
/// an evaluator; the registry resolves them against the absence sentinel.
pub trait ResultEvaluator: Send + Sync {
    /// The result type this evaluator judges.
    fn result_type(&self) -> &ResultType;

    /// Returns true if `actual` satisfies `expected`.
    fn evaluate(&self, actual: &Value, expected: &Value) -> bool;
}

/// Accepts when the actual result equals the expected one.
#[derive(Debug, Clone)]
pub struct EqualityEvaluator {
    result_type: ResultType,
}

impl EqualityEvaluator {
    pub fn new(result_type: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::new(result_type),
        }
    }
}

impl ResultEvaluator for EqualityEvaluator {
    fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    fn evaluate(&self, actual: &Value, expected: &Value) -> bool {
        actual == expected
    }
}

/// Accepts when a status code matches.
///
/// The expected value is a number or a list of acceptable numbers. The
/// actual value is a number or an object with a numeric `status` field
/// (the shape the HTTP-backed handlers report).
#[derive(Debug, Clone)]
pub struct StatusCodeEvaluator {
    result_type: ResultType,
}

impl StatusCodeEvaluator {
    pub fn new(result_type: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::new(result_type),
        }
    }

    fn status_of(actual: &Value) -> Option<u64> {
        match actual {
            Value::Number(n) => n.as_u64(),
            Value::Object(map) => map.get("status").and_then(Value::as_u64),
            _ => None,
        }
    }
}

impl ResultEvaluator for StatusCodeEvaluator {
    fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    fn evaluate(&self, actual: &Value, expected: &Value) -> bool {
        let Some(status) = Self::status_of(actual) else {
            return false;
        };
        match expected {
            Value::Number(n) => n.as_u64() == Some(status),
            Value::Array(codes) => codes.iter().any(|c| c.as_u64() == Some(status)),
            _ => false,
        }
    }
}

/// Accepts when every field of the expected object is present, and equal,
/// in the actual object. Extra fields in the actual result are ignored.
#[derive(Debug, Clone)]
pub struct SubsetEvaluator {
    result_type: ResultType,
}

impl SubsetEvaluator {
    pub fn new(result_type: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::new(result_type),
        }
    }

    fn contains(actual: &Value, expected: &Value) -> bool {
        match (actual, expected) {
            (Value::Object(actual), Value::Object(expected)) => expected
                .iter()
                .all(|(k, v)| actual.get(k).is_some_and(|a| Self::contains(a, v))),
            _ => actual == expected,
        }
    }
}

impl ResultEvaluator for SubsetEvaluator {
    fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    fn evaluate(&self, actual: &Value, expected: &Value) -> bool {
        Self::contains(actual, expected)
    }
}

/// Evaluator backed by a closure.
pub struct FnEvaluator<F> {
    result_type: ResultType,
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&Value, &Value) -> bool + Send + Sync,
{
    pub fn new(result_type: impl Into<String>, f: F) -> Self {
        Self {
            result_type: ResultType::new(result_type),
            f,
        }
    }
}

impl<F> ResultEvaluator for FnEvaluator<F>
where
    F: Fn(&Value, &Value) -> bool + Send + Sync,
{
    fn result_type(&self) -> &ResultType {
        &self.result_type
    }

    fn evaluate(&self, actual: &Value, expected: &Value) -> bool {
        (self.f)(actual, expected)
    }
}

/// Evaluators keyed by the result type they judge.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<ResultType, Arc<dyn ResultEvaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an evaluator under its result type.
    pub fn register(&mut self, evaluator: impl ResultEvaluator + 'static) -> Result<(), SagaError> {
        let result_type = evaluator.result_type().clone();
        if self.evaluators.contains_key(&result_type) {
            return Err(SagaError::DuplicateEvaluator(result_type));
        }
        self.evaluators.insert(result_type, Arc::new(evaluator));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, evaluator: impl ResultEvaluator + 'static) -> Result<Self, SagaError> {
        self.register(evaluator)?;
        Ok(self)
    }

    pub fn contains(&self, result_type: &ResultType) -> bool {
        self.evaluators.contains_key(result_type)
    }

    /// Judges an actual result against the expectation.
    ///
    /// A missing actual result is accepted only when the absence sentinel
    /// is expected; a present result never satisfies the sentinel.
    pub fn evaluate(
        &self,
        result_type: &ResultType,
        actual: Option<&Value>,
        expected: &ExpectedResult,
    ) -> Result<bool, SagaError> {
        let evaluator =
            self.evaluators
                .get(result_type)
                .ok_or_else(|| SagaError::EvaluatorNotFound {
                    result_type: result_type.clone(),
                })?;

        Ok(match (actual, expected) {
            (None, ExpectedResult::Absent) => true,
            (None, ExpectedResult::Value(_)) | (Some(_), ExpectedResult::Absent) => false,
            (Some(actual), ExpectedResult::Value(expected)) => {
                evaluator.evaluate(actual, expected)
            }
        })
    }
}
