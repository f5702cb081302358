//! Bounded retries with exponential backoff and cooperative cancellation.

use std::future::Future;

use domain::Step;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::{RetryError, StepError};

/// Re-runs a failing step according to a [`RetryPolicy`].
///
/// Cancellation is observed before each attempt and while waiting out a
/// backoff. An attempt that has already started always runs to completion
/// (or to its deadline) so its result can be recorded.
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `attempt_fn` with attempt numbers 1, 2, … until it succeeds,
    /// fails non-retriably, runs out of attempts or is cancelled.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        step: Step,
        mut attempt_fn: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            metrics::counter!("workflow_step_attempts_total", "step" => step.as_str())
                .increment(1);

            let error = match attempt_fn(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retriable() {
                return Err(RetryError::NonRetriable(error));
            }

            if attempt >= max_attempts {
                tracing::warn!(step = %step, attempts = attempt, error = %error, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::info!(
                step = %step,
                attempt,
                backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying step after backoff"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::executor::StepExecutor;

    fn policy(max_attempts: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(initial_ms), 2.0).unwrap()
    }

    fn failure(step: Step) -> StepError {
        StepError::Operation {
            step,
            cause: "flaky".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_needs_one_attempt() {
        let controller = RetryController::new(policy(3, 10), CancellationToken::new());
        let mut calls = 0;

        let result = controller
            .run_with_retry(Step::Ship, |_| {
                calls += 1;
                async { Ok::<_, StepError>("shipped") }
            })
            .await;

        assert_eq!(result, Ok("shipped"));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_waits_the_backoff_between_attempts() {
        let controller = RetryController::new(policy(3, 10), CancellationToken::new());
        let started = Instant::now();
        let attempts_at = Arc::new(Mutex::new(Vec::new()));

        let recorded = attempts_at.clone();
        let result = controller
            .run_with_retry(Step::ChargePayment, move |attempt| {
                recorded.lock().unwrap().push((attempt, started.elapsed()));
                async { Err::<(), _>(failure(Step::ChargePayment)) }
            })
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: failure(Step::ChargePayment),
            })
        );

        let attempts_at = attempts_at.lock().unwrap();
        let numbers: Vec<u32> = attempts_at.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let first_gap = attempts_at[1].1 - attempts_at[0].1;
        let second_gap = attempts_at[2].1 - attempts_at[1].1;
        assert!(first_gap >= Duration::from_millis(10) && first_gap < Duration::from_millis(15));
        assert!(second_gap >= Duration::from_millis(20) && second_gap < Duration::from_millis(25));
    }

    #[tokio::test(start_paused = true)]
    async fn step_that_always_times_out_is_attempted_three_times() {
        let timeout = Duration::from_millis(50);
        let executor = StepExecutor::new(timeout);
        let controller = RetryController::new(policy(3, 10), CancellationToken::new());
        let started = Instant::now();
        let attempts_at = Arc::new(Mutex::new(Vec::new()));

        let recorded = attempts_at.clone();
        let result = controller
            .run_with_retry(Step::Ship, move |attempt| {
                recorded.lock().unwrap().push((attempt, started.elapsed()));
                async move {
                    executor
                        .execute(Step::Ship, std::future::pending::<Result<(), String>>())
                        .await
                }
            })
            .await;

        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: StepError::Timeout {
                    step: Step::Ship,
                    timeout,
                },
            })
        );

        let attempts_at = attempts_at.lock().unwrap();
        assert_eq!(attempts_at.len(), 3);

        // Each gap is one full deadline plus the backoff: 10ms, then 20ms.
        let first_gap = attempts_at[1].1 - attempts_at[0].1;
        let second_gap = attempts_at[2].1 - attempts_at[1].1;
        assert!(first_gap >= timeout + Duration::from_millis(10));
        assert!(first_gap < timeout + Duration::from_millis(15));
        assert!(second_gap >= timeout + Duration::from_millis(20));
        assert!(second_gap < timeout + Duration::from_millis(25));
        assert!(started.elapsed() >= 3 * timeout + Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let controller = RetryController::new(policy(3, 10), CancellationToken::new());

        let result = controller
            .run_with_retry(Step::Ship, |attempt| async move {
                if attempt < 3 {
                    Err(failure(Step::Ship))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn integrity_failures_are_not_retried() {
        let controller = RetryController::new(policy(3, 10), CancellationToken::new());
        let mut calls = 0;
        let integrity = StepError::Integrity {
            step: Step::Validate,
            detail: "mismatch".to_string(),
        };

        let result = controller
            .run_with_retry(Step::Validate, |_| {
                calls += 1;
                let err = integrity.clone();
                async move { Err::<(), _>(err) }
            })
            .await;

        assert_eq!(result, Err(RetryError::NonRetriable(integrity)));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let controller = RetryController::new(policy(3, 10), cancel);
        let mut calls = 0;

        let result = controller
            .run_with_retry(Step::Ship, |_| {
                calls += 1;
                async { Ok::<_, StepError>(()) }
            })
            .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
        assert_eq!(calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let controller = RetryController::new(policy(3, 60_000), cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let result = controller
            .run_with_retry(Step::Ship, |_| async { Err::<(), _>(failure(Step::Ship)) })
            .await;
        canceller.await.unwrap();

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_does_not_interrupt_an_attempt() {
        let cancel = CancellationToken::new();
        let controller = RetryController::new(policy(3, 10), cancel.clone());

        let result = controller
            .run_with_retry(Step::Ship, |_| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, StepError>("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
    }
}
