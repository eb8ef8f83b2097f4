//! Bounded retry with a fixed delay, and the runner that applies it to a stage.

use super::StageSpec;
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::errors::DemandflowError;
use crate::events::EventSink;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How often a failed stage is re-invoked and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: usize,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(retries: usize, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Total attempts allowed, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.retries + 1
    }
}

/// Attempt tracking for one stage execution.
#[derive(Debug, Default)]
struct RetryState {
    attempts: usize,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
}

/// Decides what to do after a failed attempt.
#[must_use]
fn should_retry(state: &RetryState, policy: &RetryPolicy) -> RetryDecision {
    if state.attempts >= policy.max_attempts() {
        RetryDecision::GiveUp
    } else {
        RetryDecision::Retry(policy.retry_delay)
    }
}

/// Result of running one stage through its retry policy.
#[derive(Debug)]
pub struct StageAttempts {
    /// Attempts made, including the first.
    pub attempts: usize,
    /// The successful output, or `StageExhaustedRetries` wrapping the last error.
    pub result: Result<StageOutput, DemandflowError>,
}

/// Executes a single stage, retrying failures per its [`RetryPolicy`].
#[derive(Clone)]
pub struct StageRunner {
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner").finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a runner that reports retries to `events`.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// Runs `spec` until it succeeds or its retry budget is spent.
    ///
    /// Every attempt is a fresh invocation of the stage action.
    pub async fn run(&self, spec: &StageSpec, ctx: &StageContext) -> StageAttempts {
        let mut state = RetryState::default();

        loop {
            state.attempts += 1;
            let attempt_ctx = ctx.for_attempt(state.attempts);

            let error = match spec.runner.execute(&attempt_ctx).await {
                Ok(output) => {
                    debug!(stage = %spec.name, attempt = state.attempts, "Stage attempt succeeded");
                    return StageAttempts {
                        attempts: state.attempts,
                        result: Ok(output),
                    };
                }
                Err(e) => e,
            };

            match should_retry(&state, &spec.retry) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        stage = %spec.name,
                        attempt = state.attempts,
                        max_attempts = spec.retry.max_attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Stage attempt failed, retrying"
                    );
                    self.events.emit(
                        "stage.retrying",
                        Some(json!({
                            "stage": &spec.name,
                            "attempt": state.attempts,
                            "error": error.to_string(),
                            "delay_ms": delay.as_secs_f64() * 1000.0,
                        })),
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    warn!(
                        stage = %spec.name,
                        attempts = state.attempts,
                        error = %error,
                        "Stage exhausted retries"
                    );
                    return StageAttempts {
                        attempts: state.attempts,
                        result: Err(DemandflowError::StageExhaustedRetries {
                            stage: spec.name.clone(),
                            attempts: state.attempts,
                            source: Box::new(error),
                        }),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageInputs;
    use crate::events::CollectingEventSink;
    use crate::stages::FnStage;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn flaky_spec(failures: usize, retries: usize, calls: Arc<AtomicUsize>) -> StageSpec {
        let stage = FnStage::new("flaky", move |_ctx: StageContext| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= failures {
                    Err(DemandflowError::SourceUnavailable(format!("attempt {n}")))
                } else {
                    Ok(StageOutput::ok_empty())
                }
            }
            .boxed()
        });
        StageSpec::new("flaky", Arc::new(stage)).with_retry(RetryPolicy::new(retries, Duration::from_millis(1)))
    }

    fn ctx() -> StageContext {
        StageContext::new(Uuid::new_v4(), "test", "flaky", StageInputs::default())
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
        assert_eq!(RetryPolicy::new(2, Duration::ZERO).max_attempts(), 3);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(1, Duration::from_secs(10));
        let mut state = RetryState::default();

        state.attempts = 1;
        assert_eq!(should_retry(&state, &policy), RetryDecision::Retry(Duration::from_secs(10)));

        state.attempts = 2;
        assert_eq!(should_retry(&state, &policy), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(CollectingEventSink::new());
        let runner = StageRunner::new(events.clone());

        let outcome = runner.run(&flaky_spec(2, 2, calls.clone()), &ctx()).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.events_of_type("stage.retrying").len(), 2);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = StageRunner::new(Arc::new(CollectingEventSink::new()));

        let outcome = runner.run(&flaky_spec(5, 1, calls.clone()), &ctx()).await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match outcome.result {
            Err(DemandflowError::StageExhaustedRetries { stage, attempts, source }) => {
                assert_eq!(stage, "flaky");
                assert_eq!(attempts, 2);
                assert_eq!(source.to_string(), "Source unavailable: attempt 2");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attempt_number_visible_to_stage() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let stage = FnStage::new("count", move |ctx: StageContext| {
            seen_clone.lock().push(ctx.attempt());
            async move {
                if ctx.attempt() < 2 {
                    Err(DemandflowError::StoreUnavailable("busy".to_string()))
                } else {
                    Ok(StageOutput::ok_empty())
                }
            }
            .boxed()
        });
        let spec = StageSpec::new("count", Arc::new(stage)).with_retry(RetryPolicy::new(3, Duration::ZERO));

        let outcome = StageRunner::new(Arc::new(CollectingEventSink::new())).run(&spec, &ctx()).await;

        assert!(outcome.result.is_ok());
        assert_eq!(*seen.lock(), vec![1, 2]);
    }
}
