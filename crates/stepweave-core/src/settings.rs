//! Execution policy for a single transport call.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Retry, delay and validation policy applied to one call.
///
/// Deserializes from camelCase documents; every missing field takes its
/// default.
///
/// # Examples
///
/// ```
/// use stepweave_core::ExecutionSettings;
///
/// let settings: ExecutionSettings =
///     serde_json::from_value(serde_json::json!({"maxRetries": 5})).expect("valid settings");
/// assert_eq!(settings.max_retries, 5);
/// assert!(settings.retry_enabled);
/// assert_eq!(settings.total_attempts(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionSettings {
    /// Whether failed attempts are retried at all.
    pub retry_enabled: bool,
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Pause before each retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Pause before the first attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Whether a failure surviving all retries is raised or swallowed.
    pub throw_on_exhaustion: bool,
    /// Whether responses are checked against the step's assertions.
    pub validation_enabled: bool,
    /// Upper bound for a single transport call, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            retry_enabled: true,
            max_retries: 2,
            retry_delay_ms: 1000,
            initial_delay_ms: 0,
            throw_on_exhaustion: true,
            validation_enabled: true,
            attempt_timeout_ms: None,
        }
    }
}

impl ExecutionSettings {
    /// Hard defaults for calls made without any settings context.
    ///
    /// One attempt, no delays, no validation, failures propagate.
    pub fn unmanaged() -> Self {
        Self {
            retry_enabled: false,
            max_retries: 0,
            retry_delay_ms: 0,
            initial_delay_ms: 0,
            throw_on_exhaustion: true,
            validation_enabled: false,
            attempt_timeout_ms: None,
        }
    }

    /// Settings that never retry but keep validation on.
    pub fn no_retry() -> Self {
        Self {
            retry_enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the retry budget and enables retries.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.retry_enabled = true;
        self.max_retries = max_retries;
        self.retry_delay_ms = duration_ms(retry_delay);
        self
    }

    /// Sets the pause before the first attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = duration_ms(delay);
        self
    }

    /// Sets whether exhausted failures are raised.
    pub fn with_throw_on_exhaustion(mut self, throw: bool) -> Self {
        self.throw_on_exhaustion = throw;
        self
    }

    /// Sets whether responses are validated.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation_enabled = enabled;
        self
    }

    /// Sets the per-attempt time limit.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Number of times the work may run: the first attempt plus retries.
    pub fn total_attempts(&self) -> u32 {
        if self.retry_enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Pause before the first attempt.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Pause before each retry.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Per-attempt time limit, if any.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Picks the effective settings for one call.
///
/// An override wins wholesale; fields are never mixed between the two.
pub fn resolve(
    baseline: &ExecutionSettings,
    overrides: Option<&ExecutionSettings>,
) -> ExecutionSettings {
    match overrides {
        Some(settings) => {
            trace!(?settings, "Settings overridden");
            settings.clone()
        }
        None => baseline.clone(),
    }
}

/// Like [`resolve`], for call sites that may carry no settings at all.
///
/// With neither a baseline nor an override the call runs
/// [`unmanaged`](ExecutionSettings::unmanaged).
pub fn resolve_optional(
    baseline: Option<&ExecutionSettings>,
    overrides: Option<&ExecutionSettings>,
) -> ExecutionSettings {
    match baseline {
        Some(baseline) => resolve(baseline, overrides),
        None => resolve(&ExecutionSettings::unmanaged(), overrides),
    }
}
