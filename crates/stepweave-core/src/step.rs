//! Scenario and step definitions.

use crate::document::Document;
use crate::error::StepweaveError;
use crate::settings::ExecutionSettings;
use crate::validate::ValidationSpec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Type-safe step name wrapper.
///
/// # Examples
///
/// ```
/// use stepweave_core::StepName;
///
/// let name = StepName::new("orders.create");
/// assert_eq!(name.as_str(), "orders.create");
///
/// let name: StepName = "payments.capture".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One unit of work: a call to `method` on `service`.
///
/// Reads from a scenario document:
///
/// ```yaml
/// service: orders
/// method: createOrder
/// request: { body: { sku: A1 } }
/// validation: { steps: ["$.body.orderId"] }
/// variables: { orderId: "$.body.orderId" }
/// settings: { maxRetries: 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Target service.
    #[serde(rename = "service")]
    pub service_name: String,
    /// Method whose request template the fragment is layered over.
    #[serde(rename = "method")]
    pub method_name: String,
    /// Step-level request values; they win over template values.
    #[serde(rename = "request", default)]
    pub request_fragment: Document,
    /// Assertions checked after each successful attempt.
    #[serde(rename = "validation", default)]
    pub validation_spec: ValidationSpec,
    /// Variables to capture: name to path expression.
    #[serde(rename = "variables", default)]
    pub variable_bindings: IndexMap<String, String>,
    /// Settings used for this call instead of the service baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ExecutionSettings>,
}

impl Step {
    /// Creates a step with an empty fragment and no assertions.
    pub fn new(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            request_fragment: Value::Null,
            validation_spec: ValidationSpec::default(),
            variable_bindings: IndexMap::new(),
            settings: None,
        }
    }

    /// Sets the request fragment.
    pub fn with_request(mut self, fragment: Document) -> Self {
        self.request_fragment = fragment;
        self
    }

    /// Sets the assertions.
    pub fn with_validation(mut self, spec: ValidationSpec) -> Self {
        self.validation_spec = spec;
        self
    }

    /// Adds a variable binding.
    pub fn bind(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.variable_bindings.insert(name.into(), expression.into());
        self
    }

    /// Sets a settings override for this step.
    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// `service.method`, used in logs and failure reports.
    pub fn name(&self) -> StepName {
        StepName::new(format!("{}.{}", self.service_name, self.method_name))
    }
}

/// An ordered sequence of steps forming one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Case identifier, used for reporting only.
    #[serde(rename = "testcaseId", default)]
    pub case_id: String,
    /// Case title, used for reporting only.
    #[serde(rename = "testcaseName", default)]
    pub case_name: String,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Creates an empty scenario.
    pub fn new(case_id: impl Into<String>, case_name: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            case_name: case_name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// `<id>__<name>` with whitespace runs replaced by `_`.
    pub fn display_name(&self) -> String {
        format!(
            "{}__{}",
            collapse_whitespace(&self.case_id),
            collapse_whitespace(&self.case_name)
        )
    }

    /// Reads a scenario from an already-parsed document.
    pub fn from_document(document: &Document) -> Result<Self, StepweaveError> {
        Self::deserialize(document)
            .map_err(|e| StepweaveError::Configuration(format!("invalid scenario: {e}")))
    }

    /// Reads every scenario listed under `testSuite` in a suite document.
    pub fn list_from_suite(suite: &Document) -> Result<Vec<Self>, StepweaveError> {
        let cases = suite
            .get("testSuite")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                StepweaveError::Configuration("suite has no 'testSuite' array".to_string())
            })?;
        cases.iter().map(Self::from_document).collect()
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_name() {
        let name = StepName::new("test");
        assert_eq!(name.as_str(), "test");

        let name: StepName = "test".into();
        assert_eq!(name.as_str(), "test");

        assert_eq!(Step::new("orders", "create").name().as_str(), "orders.create");
    }

    #[test]
    fn test_scenario_from_document() {
        let document = json!({
            "testcaseId": "TC 01",
            "testcaseName": "create   then fetch",
            "steps": [
                {
                    "service": "orders",
                    "method": "createOrder",
                    "request": {"body": {"sku": "A1"}},
                    "validation": {"steps": ["$.body.orderId"]},
                    "variables": {"orderId": "$.body.orderId"}
                },
                {
                    "service": "orders",
                    "method": "getOrder",
                    "settings": {"maxRetries": 5, "retryDelayMs": 10}
                }
            ]
        });

        let scenario = Scenario::from_document(&document).expect("valid scenario");
        assert_eq!(scenario.display_name(), "TC_01__create_then_fetch");
        assert_eq!(scenario.steps.len(), 2);

        let first = &scenario.steps[0];
        assert_eq!(first.request_fragment, json!({"body": {"sku": "A1"}}));
        assert_eq!(first.validation_spec, ValidationSpec::new(["$.body.orderId"]));
        assert_eq!(
            first.variable_bindings.get("orderId").map(String::as_str),
            Some("$.body.orderId")
        );
        assert!(first.settings.is_none());

        let second = &scenario.steps[1];
        assert_eq!(second.request_fragment, Value::Null);
        assert!(second.validation_spec.is_empty());
        let settings = second.settings.as_ref().expect("override present");
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.retry_delay_ms, 10);
        assert!(settings.throw_on_exhaustion);
    }

    #[test]
    fn test_scenario_rejects_malformed_step() {
        let document = json!({"steps": [{"method": "missingService"}]});
        assert!(matches!(
            Scenario::from_document(&document),
            Err(StepweaveError::Configuration(_))
        ));
    }

    #[test]
    fn test_list_from_suite() {
        let suite = json!({
            "testSuite": [
                {"testcaseId": "1", "testcaseName": "a", "steps": []},
                {"testcaseId": "2", "testcaseName": "b", "steps": []}
            ]
        });
        let scenarios = Scenario::list_from_suite(&suite).expect("valid suite");
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[1].display_name(), "2__b");

        assert!(Scenario::list_from_suite(&json!({})).is_err());
    }

    #[test]
    fn test_builder_style() {
        let scenario = Scenario::new("7", "checkout").step(
            Step::new("cart", "add")
                .with_request(json!({"body": {"sku": "A1"}}))
                .bind("cartId", "$.body.id")
                .with_settings(ExecutionSettings::no_retry()),
        );
        assert_eq!(scenario.steps[0].variable_bindings.len(), 1);
        assert_eq!(scenario.steps[0].settings, Some(ExecutionSettings::no_retry()));
    }
}
