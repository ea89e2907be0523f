//! Bounded retry loop around a single unit of work.

use crate::cancel::CancelSignal;
use std::future::Future;
use std::time::{Duration, Instant};
use stepweave_core::{ExecutionSettings, StepweaveError};
use tracing::{trace, warn};

/// What a finished retry loop produced.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The last value the work returned, validated or not.
    ///
    /// `None` if no attempt ever returned a value.
    pub value: Option<T>,
    /// How many times the work ran.
    pub attempts: u32,
    /// The final failure, when it was swallowed instead of raised.
    pub swallowed: Option<StepweaveError>,
}

impl<T> RetryOutcome<T> {
    /// Returns `true` if the last attempt succeeded and passed validation.
    pub fn is_success(&self) -> bool {
        self.swallowed.is_none()
    }
}

/// Runs work under an [`ExecutionSettings`] policy.
///
/// The loop waits `initialDelayMs` once before the first attempt, then runs
/// the work. A successful result is passed to the validation callback when
/// validation is enabled; a validation failure counts as a failed attempt.
/// Failed attempts are retried after `retryDelayMs` until
/// `maxRetries + 1` attempts have been made. Only retryable failures
/// (transport, timeout, validation) re-enter the loop; any other error is
/// returned at once.
///
/// When the budget runs out, the last failure is raised wrapped in
/// [`StepweaveError::Execution`] if `throwOnExhaustion` is set, and swallowed
/// into [`RetryOutcome::swallowed`] otherwise.
///
/// A fired [`CancelSignal`] ends the loop with
/// [`StepweaveError::Interrupted`] during a delay or an attempt. The work is
/// never started once the signal has fired.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use stepweave::{ExecutionSettings, RetryExecutor, StepweaveError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let calls = AtomicU32::new(0);
/// let settings = ExecutionSettings::default().with_retries(2, std::time::Duration::ZERO);
///
/// let outcome = RetryExecutor::new("inventory")
///     .run(
///         || {
///             let call = calls.fetch_add(1, Ordering::SeqCst);
///             async move {
///                 match call {
///                     0 => Err(StepweaveError::transport("inventory", "503")),
///                     _ => Ok(42),
///                 }
///             }
///         },
///         &settings,
///         |_| Ok(()),
///     )
///     .await
///     .expect("second attempt succeeds");
///
/// assert_eq!(outcome.value, Some(42));
/// assert_eq!(outcome.attempts, 2);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    label: String,
    cancel: Option<CancelSignal>,
}

impl RetryExecutor {
    /// Creates an executor; `label` names the target in logs and timeouts.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cancel: None,
        }
    }

    /// Observes `signal` at every suspension point.
    pub fn with_cancellation(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Runs `work` until it succeeds or the retry budget is spent.
    pub async fn run<T, W, Fut, V>(
        &self,
        mut work: W,
        settings: &ExecutionSettings,
        mut validation: V,
    ) -> Result<RetryOutcome<T>, StepweaveError>
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepweaveError>>,
        V: FnMut(&T) -> Result<(), StepweaveError>,
    {
        let started = Instant::now();
        let total_attempts = settings.total_attempts();
        let mut held: Option<T> = None;
        let mut last_failure: Option<StepweaveError> = None;
        let mut attempts = 0u32;

        if settings.initial_delay_ms > 0 {
            trace!(
                target_name = %self.label,
                "Sleeping for {} ms initial delay",
                settings.initial_delay_ms
            );
            self.pause(settings.initial_delay()).await?;
        }

        while attempts < total_attempts {
            if attempts > 0 {
                trace!(target_name = %self.label, "Sleeping for {} ms", settings.retry_delay_ms);
                self.pause(settings.retry_delay()).await?;
                warn!(target_name = %self.label, "Retry - {}", attempts);
            }
            self.check_cancelled()?;
            attempts += 1;

            let attempt_started = Instant::now();
            let result = self.attempt(work(), settings).await;
            trace!(
                target_name = %self.label,
                attempt = attempts,
                elapsed_ms = elapsed_ms(attempt_started),
                "Attempt finished"
            );

            let failure = match result {
                Ok(value) => {
                    let checked = if settings.validation_enabled {
                        validation(&value)
                    } else {
                        Ok(())
                    };
                    held = Some(value);
                    match checked {
                        Ok(()) => {
                            trace!(
                                target_name = %self.label,
                                "Execution time - {} ms",
                                elapsed_ms(started)
                            );
                            return Ok(RetryOutcome {
                                value: held,
                                attempts,
                                swallowed: None,
                            });
                        }
                        Err(error) => error,
                    }
                }
                Err(error) => error,
            };

            if !failure.is_retryable() {
                return Err(failure);
            }
            warn!(
                target_name = %self.label,
                attempt = attempts,
                max_attempts = total_attempts,
                "{}",
                failure
            );
            last_failure = Some(failure);
        }

        trace!(target_name = %self.label, "Execution time - {} ms", elapsed_ms(started));
        let Some(failure) = last_failure else {
            return Ok(RetryOutcome {
                value: held,
                attempts,
                swallowed: None,
            });
        };

        if settings.throw_on_exhaustion {
            Err(StepweaveError::Execution {
                attempts,
                source: Box::new(failure),
            })
        } else {
            warn!(
                target_name = %self.label,
                attempts,
                "Retries exhausted, continuing with last result: {}",
                failure
            );
            Ok(RetryOutcome {
                value: held,
                attempts,
                swallowed: Some(failure),
            })
        }
    }

    async fn attempt<T, Fut>(
        &self,
        call: Fut,
        settings: &ExecutionSettings,
    ) -> Result<T, StepweaveError>
    where
        Fut: Future<Output = Result<T, StepweaveError>>,
    {
        let bounded = async {
            match settings.attempt_timeout() {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(StepweaveError::Timeout {
                        service: self.label.clone(),
                        elapsed_ms: settings.attempt_timeout_ms.unwrap_or_default(),
                    }),
                },
                None => call.await,
            }
        };

        match &self.cancel {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(StepweaveError::Interrupted),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }

    fn check_cancelled(&self) -> Result<(), StepweaveError> {
        match &self.cancel {
            Some(signal) if signal.is_cancelled() => Err(StepweaveError::Interrupted),
            _ => Ok(()),
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), StepweaveError> {
        self.check_cancelled()?;
        match &self.cancel {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        warn!(target_name = %self.label, "Interrupted while sleeping");
                        Err(StepweaveError::Interrupted)
                    }
                    _ = tokio::time::sleep(duration) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn always_failing(
        calls: &AtomicU32,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, StepweaveError>> + '_ {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(StepweaveError::transport("svc", "down")))
        }
    }

    fn quick(max_retries: u32) -> ExecutionSettings {
        ExecutionSettings::default().with_retries(max_retries, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_exhaustion_raises_execution_error() {
        let calls = AtomicU32::new(0);
        let result = RetryExecutor::new("svc")
            .run(always_failing(&calls), &quick(2), |_| Ok(()))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(StepweaveError::Execution { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, StepweaveError::Transport { .. }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_stops_loop() {
        let calls = AtomicU32::new(0);
        let outcome = RetryExecutor::new("svc")
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(StepweaveError::transport("svc", "flaky"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                &quick(2),
                |_| Ok(()),
            )
            .await
            .expect("second attempt succeeds");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.value, Some("ok"));
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_validation_failure_is_retried() {
        let calls = AtomicU32::new(0);
        let outcome = RetryExecutor::new("svc")
            .run(
                || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst))),
                &quick(3),
                |value| {
                    if *value < 2 {
                        Err(StepweaveError::Validation {
                            expression: "$.ready".to_string(),
                            reason: "empty collection".to_string(),
                        })
                    } else {
                        Ok(())
                    }
                },
            )
            .await
            .expect("third attempt validates");

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.value, Some(2));
    }

    #[tokio::test]
    async fn test_validation_skipped_when_disabled() {
        let outcome = RetryExecutor::new("svc")
            .run(
                || std::future::ready(Ok(1)),
                &quick(2).with_validation(false),
                |_| {
                    Err(StepweaveError::Validation {
                        expression: "$.x".to_string(),
                        reason: "never".to_string(),
                    })
                },
            )
            .await
            .expect("validation is off");
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_swallow_returns_last_result() {
        let calls = AtomicU32::new(0);
        let settings = quick(1).with_throw_on_exhaustion(false);
        let outcome = RetryExecutor::new("svc")
            .run(
                || std::future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst))),
                &settings,
                |_| {
                    Err(StepweaveError::Validation {
                        expression: "$.status".to_string(),
                        reason: "empty collection".to_string(),
                    })
                },
            )
            .await
            .expect("failure is swallowed");

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.value, Some(1));
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.swallowed.as_ref().and_then(|e| e.failing_expression()),
            Some("$.status")
        );
    }

    #[tokio::test]
    async fn test_swallow_without_any_value() {
        let calls = AtomicU32::new(0);
        let settings = quick(0).with_throw_on_exhaustion(false);
        let outcome = RetryExecutor::new("svc")
            .run(always_failing(&calls), &settings, |_| Ok(()))
            .await
            .expect("failure is swallowed");
        assert_eq!(outcome.value, None);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_disabled_runs_once() {
        let calls = AtomicU32::new(0);
        let settings = ExecutionSettings {
            retry_enabled: false,
            max_retries: 5,
            ..ExecutionSettings::default()
        };
        let result = RetryExecutor::new("svc")
            .run(always_failing(&calls), &settings, |_| Ok(()))
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmanaged_settings_single_attempt() {
        let calls = AtomicU32::new(0);
        let result = RetryExecutor::new("adhoc")
            .run(always_failing(&calls), &ExecutionSettings::unmanaged(), |_| Ok(()))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(StepweaveError::Execution { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<RetryOutcome<()>, _> = RetryExecutor::new("svc")
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Err(StepweaveError::Composition("bad".to_string())))
                },
                &quick(3),
                |_| Ok(()),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(StepweaveError::Composition(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_applied_once() {
        let calls = AtomicU32::new(0);
        let settings = ExecutionSettings::default()
            .with_retries(3, Duration::ZERO)
            .with_initial_delay(Duration::from_millis(500));

        let started = tokio::time::Instant::now();
        let result = RetryExecutor::new("svc")
            .run(always_failing(&calls), &settings, |_| Ok(()))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_between_attempts() {
        let calls = AtomicU32::new(0);
        let settings = ExecutionSettings::default().with_retries(2, Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let _ = RetryExecutor::new("svc")
            .run(always_failing(&calls), &settings, |_| Ok(()))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let settings = quick(1).with_attempt_timeout(Duration::from_millis(50));

        let outcome = RetryExecutor::new("slow")
            .run(
                || {
                    let calls = Arc::clone(&calls);
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                        Ok("fast")
                    }
                },
                &settings,
                |_| Ok(()),
            )
            .await
            .expect("second attempt is fast");

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.value, Some("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exhaustion_keeps_cause() {
        let settings = quick(0).with_attempt_timeout(Duration::from_millis(50));
        let result: Result<RetryOutcome<()>, _> = RetryExecutor::new("slow")
            .run(
                || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
                &settings,
                |_| Ok(()),
            )
            .await;

        match result {
            Err(StepweaveError::Execution { source, .. }) => match *source {
                StepweaveError::Timeout {
                    service,
                    elapsed_ms,
                } => {
                    assert_eq!(service, "slow");
                    assert_eq!(elapsed_ms, 50);
                }
                other => panic!("unexpected cause: {other}"),
            },
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_delay() {
        let (handle, signal) = CancelSignal::channel();
        let calls = AtomicU32::new(0);
        let settings = ExecutionSettings::default().with_retries(5, Duration::from_secs(60));
        let executor = RetryExecutor::new("svc").with_cancellation(signal);

        let run = executor.run(always_failing(&calls), &settings, |_| Ok(()));
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);

        assert!(matches!(result, Err(StepweaveError::Interrupted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (handle, signal) = CancelSignal::channel();
        handle.cancel();
        let calls = AtomicU32::new(0);
        let result = RetryExecutor::new("svc")
            .with_cancellation(signal)
            .run(always_failing(&calls), &quick(2), |_| Ok(()))
            .await;
        assert!(matches!(result, Err(StepweaveError::Interrupted)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
