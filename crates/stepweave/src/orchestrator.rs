//! Scenario execution: compose, call with retry, validate, bind.

use crate::cancel::CancelSignal;
use crate::retry::{RetryExecutor, RetryOutcome};
use crate::substitute::substitute;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stepweave_core::{
    compose_layers, resolve, resolve_optional, Document, ExecutionSettings, JsonPathQuery,
    PathQuery, Scenario, ScenarioFailure, Step, StepName, StepReporter, StepweaveError,
    TracingReporter, TransportRegistry, Validator, VariableBinder, VariableCache,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DEFAULT_CONCURRENCY: usize = 4;

/// What one completed step produced.
#[derive(Debug)]
pub struct StepRecord {
    /// Zero-based position in the scenario.
    pub index: usize,
    /// `service.method`.
    pub name: StepName,
    /// Number of transport calls made.
    pub attempts: u32,
    /// The last response returned by the transport.
    pub response: Option<Document>,
    /// The failure swallowed when retries ran out without raising.
    pub swallowed: Option<StepweaveError>,
}

/// A scenario that ran to its last step.
#[derive(Debug)]
pub struct ScenarioRun {
    /// Display name of the scenario.
    pub name: String,
    /// Per-step results in execution order.
    pub steps: Vec<StepRecord>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl ScenarioRun {
    /// Returns `true` if no step swallowed a failure.
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|step| step.swallowed.is_none())
    }
}

/// Outcome of one scenario within a suite run.
#[derive(Debug)]
pub struct ScenarioReport {
    /// Display name of the scenario.
    pub name: String,
    /// The run, or the step that stopped it.
    pub result: Result<ScenarioRun, ScenarioFailure>,
    /// Variables captured by the scenario's steps.
    pub variables: VariableCache,
}

impl ScenarioReport {
    /// Returns `true` if every step of the scenario completed.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs scenarios step by step against a [`TransportRegistry`].
///
/// Steps of one scenario run strictly in order. For each step the request
/// fragment is composed over the method template and the service defaults,
/// the transport is called under the resolved [`ExecutionSettings`], the
/// response is validated after every successful call and the step's
/// variables are bound into the scenario's [`VariableCache`]. The first
/// step that fails aborts the scenario.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use serde_json::json;
/// use stepweave::prelude::*;
///
/// #[derive(Debug)]
/// struct Orders;
///
/// #[async_trait]
/// impl Transport for Orders {
///     async fn execute(&self, _request: Document) -> Result<Document, StepweaveError> {
///         Ok(json!({"status": 201, "body": {"orderId": "A-17", "lines": [{"sku": "X"}]}}))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let catalog = ServiceCatalog::builder()
///     .add_service("orders", Orders)
///     .build()
///     .expect("valid catalog");
/// let orchestrator = Orchestrator::builder()
///     .registry(catalog)
///     .build()
///     .expect("valid orchestrator");
///
/// let scenario = Scenario::new("1", "create order").step(
///     Step::new("orders", "create")
///         .with_validation(ValidationSpec::new(["$.body.lines[*].sku"]))
///         .bind("orderId", "$.body.orderId")
///         .with_settings(ExecutionSettings::no_retry()),
/// );
///
/// let mut variables = VariableCache::new();
/// let run = orchestrator
///     .run_scenario(&scenario, &mut variables)
///     .await
///     .expect("scenario passes");
///
/// assert_eq!(run.steps.len(), 1);
/// assert_eq!(variables.get("orderId"), Some(&json!("A-17")));
/// # }
/// ```
pub struct Orchestrator {
    registry: Arc<dyn TransportRegistry>,
    reporter: Arc<dyn StepReporter>,
    query: Arc<dyn PathQuery>,
    settings_override: Option<ExecutionSettings>,
    cancel: Option<CancelSignal>,
    substitute_variables: bool,
    concurrency: usize,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings_override", &self.settings_override)
            .field("cancellable", &self.cancel.is_some())
            .field("substitute_variables", &self.substitute_variables)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Orchestrator {
    /// Creates a new orchestrator builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Runs every step of `scenario`, capturing variables into `variables`.
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        variables: &mut VariableCache,
    ) -> Result<ScenarioRun, ScenarioFailure> {
        let started = Instant::now();
        let name = scenario.display_name();
        info!(scenario = %name, steps = scenario.steps.len(), "Scenario started");

        let steps = self.run_steps(&scenario.steps, variables).await?;

        let run = ScenarioRun {
            name,
            steps,
            elapsed: started.elapsed(),
        };
        info!(
            scenario = %run.name,
            elapsed_ms = u64::try_from(run.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Scenario finished"
        );
        Ok(run)
    }

    /// Runs `steps` in order, stopping at the first failure.
    pub async fn run_steps(
        &self,
        steps: &[Step],
        variables: &mut VariableCache,
    ) -> Result<Vec<StepRecord>, ScenarioFailure> {
        let mut records = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let step_name = step.name();
            self.reporter.step_started(index, &step_name);

            match self.execute_step(step, variables).await {
                Ok(outcome) => {
                    self.reporter.step_finished(
                        index,
                        &step_name,
                        outcome.attempts,
                        outcome.swallowed.as_ref(),
                    );
                    records.push(StepRecord {
                        index,
                        name: step_name,
                        attempts: outcome.attempts,
                        response: outcome.value,
                        swallowed: outcome.swallowed,
                    });
                }
                Err(error) => {
                    self.reporter.step_failed(index, &step_name, &error);
                    return Err(ScenarioFailure {
                        step_index: index,
                        step_name,
                        error,
                    });
                }
            }
        }
        Ok(records)
    }

    /// Runs scenarios concurrently, each with its own [`VariableCache`].
    ///
    /// At most the configured concurrency runs at once. Reports come back in
    /// input order. A scenario task that panics is logged and has no report.
    pub async fn run_suite(self: &Arc<Self>, scenarios: Vec<Scenario>) -> Vec<ScenarioReport> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, scenario) in scenarios.into_iter().enumerate() {
            let orchestrator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let mut variables = VariableCache::new();
                let result = orchestrator.run_scenario(&scenario, &mut variables).await;
                if let Err(failure) = &result {
                    error!(scenario = %scenario.display_name(), "{}", failure);
                }
                let report = ScenarioReport {
                    name: scenario.display_name(),
                    result,
                    variables,
                };
                (index, report)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Scenario task failed: {}", e),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Calls `service` once with a fully formed request, outside any scenario.
    ///
    /// Uses the service's baseline settings, or
    /// [`ExecutionSettings::unmanaged`] if it has none, unless `overrides`
    /// is given. Nothing is validated or bound. When retries run out and
    /// `throwOnExhaustion` is off, the last response is returned, or `null`
    /// if no attempt produced one.
    pub async fn execute(
        &self,
        service: &str,
        request: Document,
        overrides: Option<&ExecutionSettings>,
    ) -> Result<Document, StepweaveError> {
        let transport = self.registry.resolve(service)?;
        let settings = resolve_optional(self.registry.baseline_settings(service), overrides);
        let outcome = self
            .executor(service)
            .run(
                || {
                    let transport = Arc::clone(&transport);
                    let request = request.clone();
                    async move { transport.execute(request).await }
                },
                &settings.with_validation(false),
                |_| Ok(()),
            )
            .await?;

        if let Some(failure) = &outcome.swallowed {
            warn!(service, "Returning last result after swallowed failure: {}", failure);
        }
        Ok(outcome.value.unwrap_or(Value::Null))
    }

    async fn execute_step(
        &self,
        step: &Step,
        variables: &mut VariableCache,
    ) -> Result<RetryOutcome<Document>, StepweaveError> {
        let request = self.compose_request(step, variables)?;
        debug!(step = %step.name(), %request, "Request composed");

        let transport = self.registry.resolve(&step.service_name)?;
        let baseline = match self.registry.baseline_settings(&step.service_name) {
            Some(settings) => settings.clone(),
            None => transport.settings(),
        };
        let overrides = step.settings.as_ref().or(self.settings_override.as_ref());
        let settings = resolve(&baseline, overrides);

        let validator = Validator::new(self.query.as_ref());
        let outcome = self
            .executor(&step.service_name)
            .run(
                || {
                    let transport = Arc::clone(&transport);
                    let request = request.clone();
                    async move { transport.execute(request).await }
                },
                &settings,
                |response| validator.validate(response, &step.validation_spec),
            )
            .await?;

        match (&outcome.value, &outcome.swallowed) {
            (Some(response), None) => {
                debug!(step = %step.name(), %response, "Response accepted");
                VariableBinder::new(self.query.as_ref()).bind(
                    response,
                    &step.variable_bindings,
                    variables,
                )?;
            }
            _ => debug!(step = %step.name(), "Variables not bound after swallowed failure"),
        }
        Ok(outcome)
    }

    fn compose_request(
        &self,
        step: &Step,
        variables: &VariableCache,
    ) -> Result<Document, StepweaveError> {
        let fragment = if self.substitute_variables && !variables.is_empty() {
            substitute(&step.request_fragment, variables)
        } else {
            step.request_fragment.clone()
        };
        let template = self
            .registry
            .request_template(&step.service_name, &step.method_name)?
            .cloned()
            .unwrap_or(Value::Null);
        let defaults = self
            .registry
            .request_defaults(&step.service_name)
            .cloned()
            .unwrap_or(Value::Null);

        let request = compose_layers([fragment, template, defaults])?;
        Ok(if request.is_null() { json!({}) } else { request })
    }

    fn executor(&self, service: &str) -> RetryExecutor {
        let executor = RetryExecutor::new(service);
        match &self.cancel {
            Some(signal) => executor.with_cancellation(signal.clone()),
            None => executor,
        }
    }
}

/// Builder for constructing [`Orchestrator`] instances.
pub struct OrchestratorBuilder {
    registry: Option<Arc<dyn TransportRegistry>>,
    reporter: Arc<dyn StepReporter>,
    query: Arc<dyn PathQuery>,
    settings_override: Option<ExecutionSettings>,
    cancel: Option<CancelSignal>,
    substitute_variables: bool,
    concurrency: usize,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    /// Creates a builder with tracing reporting and JSONPath queries.
    pub fn new() -> Self {
        Self {
            registry: None,
            reporter: Arc::new(TracingReporter),
            query: Arc::new(JsonPathQuery),
            settings_override: None,
            cancel: None,
            substitute_variables: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets the registry that resolves services.
    pub fn registry<R: TransportRegistry + 'static>(self, registry: R) -> Self {
        self.shared_registry(Arc::new(registry))
    }

    /// Sets an already shared registry.
    pub fn shared_registry(mut self, registry: Arc<dyn TransportRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the step lifecycle reporter.
    pub fn reporter<R: StepReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Sets the path-query capability used by assertions and bindings.
    pub fn path_query<Q: PathQuery + 'static>(mut self, query: Q) -> Self {
        self.query = Arc::new(query);
        self
    }

    /// Sets settings that replace service baselines for steps without their
    /// own settings.
    pub fn settings_override(mut self, settings: ExecutionSettings) -> Self {
        self.settings_override = Some(settings);
        self
    }

    /// Observes `signal` in every retry loop.
    pub fn cancellation(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Enables `${name}` substitution in request fragments.
    pub fn substitute_variables(mut self, enabled: bool) -> Self {
        self.substitute_variables = enabled;
        self
    }

    /// Sets how many scenarios a suite runs at once.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Result<Orchestrator, StepweaveError> {
        let registry = self.registry.ok_or_else(|| {
            StepweaveError::Configuration("A transport registry must be specified".to_string())
        })?;
        if self.concurrency == 0 {
            return Err(StepweaveError::Configuration(
                "Suite concurrency must be at least 1".to_string(),
            ));
        }

        Ok(Orchestrator {
            registry,
            reporter: self.reporter,
            query: self.query,
            settings_override: self.settings_override,
            cancel: self.cancel,
            substitute_variables: self.substitute_variables,
            concurrency: self.concurrency,
        })
    }
}
