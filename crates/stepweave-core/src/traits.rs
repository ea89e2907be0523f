//! Seams to the outside world: transports, their registry and reporting.

use crate::document::Document;
use crate::error::StepweaveError;
use crate::settings::ExecutionSettings;
use crate::step::StepName;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Performs the protocol-specific call behind a service.
///
/// Implementations translate a composed request document into a client call
/// (HTTP, SOAP, SQL, queue, cache) and the outcome back into a response
/// document. A transport may run several times for one step when retries are
/// enabled, so it must tolerate repetition of the same request.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use serde_json::json;
/// use stepweave_core::{Document, StepweaveError, Transport};
///
/// #[derive(Debug)]
/// struct EchoTransport;
///
/// #[async_trait]
/// impl Transport for EchoTransport {
///     async fn execute(&self, request: Document) -> Result<Document, StepweaveError> {
///         Ok(json!({"status": 200, "body": request}))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Executes one request.
    async fn execute(&self, request: Document) -> Result<Document, StepweaveError>;

    /// Baseline settings for calls through this transport.
    fn settings(&self) -> ExecutionSettings {
        ExecutionSettings::default()
    }
}

/// Looks up transports by service name.
///
/// Registries are read-only once built and may be shared between
/// concurrently running scenarios.
pub trait TransportRegistry: Send + Sync {
    /// Returns the transport serving `service`.
    fn resolve(&self, service: &str) -> Result<Arc<dyn Transport>, StepweaveError>;

    /// Returns the request template for `method` on `service`, if any.
    ///
    /// Registries that know their services' methods return a
    /// [`StepweaveError::Composition`] for a method they do not declare.
    fn request_template(
        &self,
        _service: &str,
        _method: &str,
    ) -> Result<Option<&Document>, StepweaveError> {
        Ok(None)
    }

    /// Returns service-wide request defaults composed beneath templates.
    fn request_defaults(&self, _service: &str) -> Option<&Document> {
        None
    }

    /// Returns the baseline settings for `service`, if it carries its own.
    fn baseline_settings(&self, _service: &str) -> Option<&ExecutionSettings> {
        None
    }
}

/// Receives step lifecycle events.
///
/// All hooks default to no-ops.
pub trait StepReporter: Send + Sync {
    /// Called before a step's request is composed.
    fn step_started(&self, _index: usize, _step: &StepName) {}

    /// Called when a step completes and its scenario moves on.
    ///
    /// `swallowed` carries the failure a step ended with when retries ran
    /// out without raising; such a step bound no variables. It is `None`
    /// for a step that validated and bound its variables.
    fn step_finished(
        &self,
        _index: usize,
        _step: &StepName,
        _attempts: u32,
        _swallowed: Option<&StepweaveError>,
    ) {
    }

    /// Called when a step aborts its scenario.
    fn step_failed(&self, _index: usize, _step: &StepName, _error: &StepweaveError) {}
}

/// Reporter that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl StepReporter for NoopReporter {}

/// Reporter that emits every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StepReporter for TracingReporter {
    fn step_started(&self, index: usize, step: &StepName) {
        info!(index, step = %step, "Step started");
    }

    fn step_finished(
        &self,
        index: usize,
        step: &StepName,
        attempts: u32,
        swallowed: Option<&StepweaveError>,
    ) {
        match swallowed {
            Some(failure) => warn!(
                index,
                step = %step,
                attempts,
                kind = %failure.kind(),
                "Step finished with swallowed failure: {}",
                failure
            ),
            None => info!(index, step = %step, attempts, "Step finished"),
        }
    }

    fn step_failed(&self, index: usize, step: &StepName, failure: &StepweaveError) {
        error!(
            index,
            step = %step,
            kind = %failure.kind(),
            expression = failure.failing_expression(),
            "Step failed: {}",
            failure
        );
    }
}
