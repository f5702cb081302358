//! Runs one step attempt under a deadline.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use domain::Step;

use crate::error::StepError;

/// Wraps a step operation with its deadline and classifies the outcome.
#[derive(Debug, Clone, Copy)]
pub struct StepExecutor {
    timeout: Duration,
}

impl StepExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `operation` once.
    ///
    /// If the deadline passes first, the operation future is dropped and
    /// `StepError::Timeout` is returned: whatever it was doing is abandoned,
    /// and callers must treat its effect as unknown.
    pub async fn execute<T, E, F>(&self, step: Step, operation: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let error = match tokio::time::timeout(self.timeout, operation).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => StepError::Operation {
                step,
                cause: e.to_string(),
            },
            Err(_) => StepError::Timeout {
                step,
                timeout: self.timeout,
            },
        };

        tracing::warn!(step = %step, kind = error.kind(), error = %error, "step attempt failed");
        metrics::counter!(
            "workflow_step_failures_total",
            "step" => step.as_str(),
            "kind" => error.kind()
        )
        .increment(1);

        Err(error)
    }
}
