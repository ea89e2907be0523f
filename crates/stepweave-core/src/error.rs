//! Scenario error types.

use crate::step::StepName;
use thiserror::Error;

/// Coarse classification of a [`StepweaveError`], used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request composition failed.
    Composition,
    /// The transport call failed or timed out.
    Transport,
    /// A response assertion failed.
    Validation,
    /// Retries were exhausted.
    Execution,
    /// Variable extraction failed.
    Binding,
    /// The run was cancelled.
    Interrupted,
    /// The engine was misconfigured.
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Composition => "composition",
            ErrorKind::Transport => "transport",
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Binding => "binding",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{name}")
    }
}

/// Errors that can occur while composing, executing or checking a step.
///
/// Only [`Transport`](StepweaveError::Transport),
/// [`Timeout`](StepweaveError::Timeout) and
/// [`Validation`](StepweaveError::Validation) are retried; everything else
/// propagates as soon as it is raised.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StepweaveError {
    /// Merge inputs were malformed or conflicting.
    #[error("Request composition failed: {0}")]
    Composition(String),

    /// The underlying unit of work failed.
    #[error("Transport call to '{service}' failed: {details}")]
    Transport {
        /// The service whose transport failed.
        service: String,
        /// Details about the failure.
        details: String,
    },

    /// A single attempt exceeded its time limit.
    #[error("Transport call to '{service}' timed out after {elapsed_ms} ms")]
    Timeout {
        /// The service whose transport timed out.
        service: String,
        /// The configured attempt limit.
        elapsed_ms: u64,
    },

    /// A response did not satisfy a path assertion.
    #[error("Validation failed for '{expression}': {reason}")]
    Validation {
        /// The first expression that failed.
        expression: String,
        /// Why it failed.
        reason: String,
    },

    /// Retries were exhausted; carries the last underlying failure.
    #[error("Execution failed after {attempts} attempt(s): {source}")]
    Execution {
        /// Total attempts made.
        attempts: u32,
        /// The last captured failure.
        #[source]
        source: Box<StepweaveError>,
    },

    /// A variable could not be extracted from a response.
    #[error("Binding '{variable}' from '{expression}' failed: {reason}")]
    Binding {
        /// The variable being bound.
        variable: String,
        /// The path expression used.
        expression: String,
        /// Why evaluation failed.
        reason: String,
    },

    /// A cancellation signal arrived while a step was in flight.
    #[error("Execution interrupted")]
    Interrupted,

    /// No transport is registered under the given service name.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The engine or a service definition is invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl StepweaveError {
    /// Shorthand for a [`StepweaveError::Transport`] failure.
    pub fn transport(service: impl Into<String>, details: impl ToString) -> Self {
        Self::Transport {
            service: service.into(),
            details: details.to_string(),
        }
    }

    /// Returns `true` for failures the retry loop may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Validation { .. }
        )
    }

    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Composition(_) => ErrorKind::Composition,
            Self::Transport { .. } | Self::Timeout { .. } => ErrorKind::Transport,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Binding { .. } => ErrorKind::Binding,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::ServiceNotFound(_) | Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Returns the failing validation expression, looking through
    /// [`StepweaveError::Execution`] wrappers.
    pub fn failing_expression(&self) -> Option<&str> {
        match self {
            Self::Validation { expression, .. } => Some(expression),
            Self::Execution { source, .. } => source.failing_expression(),
            _ => None,
        }
    }
}

/// The fail-fast report for a scenario that stopped at a step.
#[derive(Error, Debug)]
#[error("step #{step_index} '{step_name}' failed ({kind}): {error}", kind = .error.kind())]
pub struct ScenarioFailure {
    /// Zero-based position of the failing step.
    pub step_index: usize,
    /// Display name of the failing step.
    pub step_name: StepName,
    /// The originating error.
    #[source]
    pub error: StepweaveError,
}

impl ScenarioFailure {
    /// Returns the failing validation expression, if the step failed an assertion.
    pub fn failing_expression(&self) -> Option<&str> {
        self.error.failing_expression()
    }
}
