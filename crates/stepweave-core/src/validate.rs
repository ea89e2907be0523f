//! Path-existence assertions over responses.

use crate::document::{normalize_body, Document};
use crate::error::StepweaveError;
use crate::path::PathQuery;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Ordered list of path expressions a response must satisfy.
///
/// Each expression must select a non-empty collection. Reads from a
/// `{"steps": [...]}` document or from a bare array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ValidationDocument")]
pub struct ValidationSpec {
    /// Expressions, evaluated in order.
    #[serde(rename = "steps")]
    pub expressions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValidationDocument {
    Wrapped {
        #[serde(default)]
        steps: Vec<String>,
    },
    Bare(Vec<String>),
}

impl From<ValidationDocument> for ValidationSpec {
    fn from(document: ValidationDocument) -> Self {
        match document {
            ValidationDocument::Wrapped { steps } | ValidationDocument::Bare(steps) => {
                Self { expressions: steps }
            }
        }
    }
}

impl ValidationSpec {
    /// Creates a spec from expressions.
    pub fn new<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if there is nothing to assert.
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

/// Checks responses against a [`ValidationSpec`].
pub struct Validator<'q> {
    query: &'q dyn PathQuery,
}

impl<'q> Validator<'q> {
    /// Creates a validator using the given path-query capability.
    pub fn new(query: &'q dyn PathQuery) -> Self {
        Self { query }
    }

    /// Evaluates every expression in order and stops at the first failure.
    ///
    /// A string `body` holding JSON or XML is parsed before evaluation. An
    /// expression passes only if it selects a collection with at least one
    /// element; scalars, objects, empty collections and missing paths fail.
    pub fn validate(
        &self,
        actual: &Document,
        spec: &ValidationSpec,
    ) -> Result<(), StepweaveError> {
        if spec.is_empty() {
            return Ok(());
        }
        let actual = normalize_body(actual);
        for expression in &spec.expressions {
            let result = self
                .query
                .evaluate(&actual, expression)
                .map_err(|e| failure(expression, e.to_string()))?;
            match result {
                Value::Array(items) if !items.is_empty() => {
                    debug!(%expression, matches = items.len(), "Assertion passed");
                }
                Value::Array(_) => return Err(failure(expression, "empty collection")),
                other => {
                    return Err(failure(
                        expression,
                        format!("expected a non-empty collection, got {other}"),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn failure(expression: &str, reason: impl Into<String>) -> StepweaveError {
    StepweaveError::Validation {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}
