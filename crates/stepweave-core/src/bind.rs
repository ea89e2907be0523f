//! Per-scenario variable storage and extraction from responses.

use crate::document::{normalize_body, Document};
use crate::error::StepweaveError;
use crate::path::PathQuery;
use indexmap::IndexMap;
use std::fmt;
use std::time::Instant;
use tracing::debug;

/// Named values captured by earlier steps of one scenario run.
///
/// Insertion-ordered. Writing an existing name replaces its value. A cache
/// belongs to exactly one scenario run and is never shared between runs.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stepweave_core::VariableCache;
///
/// let mut cache = VariableCache::new();
/// cache.insert("orderId", json!("A-17"));
/// cache.insert("orderId", json!("A-18"));
///
/// assert_eq!(cache.get("orderId"), Some(&json!("A-18")));
/// assert_eq!(cache.len(), 1);
/// ```
pub struct VariableCache {
    values: IndexMap<String, Document>,
    started_at: Instant,
}

impl fmt::Debug for VariableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableCache")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Default for VariableCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            values: IndexMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Stores `value` under `name`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Document) {
        self.values.insert(name.into(), value);
    }

    /// Returns the value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&Document> {
        self.values.get(name)
    }

    /// Returns `true` if a value is stored under `name`.
    pub fn contains_key(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterates over names and values in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Document)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of stored variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Empties the cache so it can serve a new run.
    pub fn clear(&mut self) {
        self.values.clear();
        self.started_at = Instant::now();
    }

    /// Time since the cache was created or last cleared.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

/// Extracts named values from responses into a [`VariableCache`].
pub struct VariableBinder<'q> {
    query: &'q dyn PathQuery,
}

impl<'q> VariableBinder<'q> {
    /// Creates a binder using the given path-query capability.
    pub fn new(query: &'q dyn PathQuery) -> Self {
        Self { query }
    }

    /// Evaluates each binding against the body-normalized response and stores
    /// the result under its name.
    ///
    /// Any binding that cannot be evaluated aborts with
    /// [`StepweaveError::Binding`]; bindings before it stay stored.
    pub fn bind(
        &self,
        response: &Document,
        bindings: &IndexMap<String, String>,
        cache: &mut VariableCache,
    ) -> Result<(), StepweaveError> {
        if bindings.is_empty() {
            return Ok(());
        }
        let response = normalize_body(response);
        for (name, expression) in bindings {
            let value = self.query.evaluate(&response, expression).map_err(|e| {
                StepweaveError::Binding {
                    variable: name.clone(),
                    expression: expression.clone(),
                    reason: e.to_string(),
                }
            })?;
            debug!(variable = %name, %value, "Variable bound");
            cache.insert(name.clone(), value);
        }
        Ok(())
    }
}
