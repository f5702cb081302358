//! Engine configuration: step deadline, retry policy and pool size.

use std::time::Duration;

use crate::error::ConfigError;

/// Bounded exponential backoff.
///
/// Attempt 1 runs immediately. After failed attempt `n` the controller waits
/// `initial_backoff * backoff_multiplier^(n-1)`, capped at `max_backoff`
/// when one is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    backoff_multiplier: f64,
    max_backoff: Option<Duration>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(10);
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

    /// Creates a policy, checking its bounds.
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(backoff_multiplier));
        }
        Ok(Self {
            max_attempts,
            initial_backoff,
            backoff_multiplier,
            max_backoff: None,
        })
    }

    /// Caps every backoff at `max_backoff`.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Result<Self, ConfigError> {
        if max_backoff < self.initial_backoff {
            return Err(ConfigError::MaxBackoffTooSmall {
                initial: self.initial_backoff,
                max: max_backoff,
            });
        }
        self.max_backoff = Some(max_backoff);
        Ok(self)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_backoff(&self) -> Option<Duration> {
        self.max_backoff
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        match self.max_backoff {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
            backoff_multiplier: Self::DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff: None,
        }
    }
}

/// Settings for the orchestrator and the pipeline runner.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    step_timeout: Duration,
    retry: RetryPolicy,
    max_concurrent_pipelines: usize,
}

impl WorkflowConfig {
    pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_CONCURRENT_PIPELINES: usize = 16;

    pub fn new(
        step_timeout: Duration,
        retry: RetryPolicy,
        max_concurrent_pipelines: usize,
    ) -> Result<Self, ConfigError> {
        if step_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if max_concurrent_pipelines == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self {
            step_timeout,
            retry,
            max_concurrent_pipelines,
        })
    }

    /// Deadline for a single step attempt.
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_concurrent_pipelines(&self) -> usize {
        self.max_concurrent_pipelines
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            step_timeout: Self::DEFAULT_STEP_TIMEOUT,
            retry: RetryPolicy::default(),
            max_concurrent_pipelines: Self::DEFAULT_MAX_CONCURRENT_PIPELINES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_worker_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), 3.0)
            .unwrap()
            .with_max_backoff(Duration::from_millis(500))
            .unwrap();

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0).unwrap();
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert_eq!(
            RetryPolicy::new(0, Duration::from_secs(1), 2.0),
            Err(ConfigError::ZeroAttempts)
        );
        assert!(matches!(
            RetryPolicy::new(3, Duration::from_secs(1), 0.5),
            Err(ConfigError::InvalidMultiplier(_))
        ));
        assert!(matches!(
            RetryPolicy::new(3, Duration::from_secs(1), f64::NAN),
            Err(ConfigError::InvalidMultiplier(_))
        ));
        assert!(matches!(
            RetryPolicy::new(3, Duration::from_secs(10), 2.0)
                .unwrap()
                .with_max_backoff(Duration::from_secs(1)),
            Err(ConfigError::MaxBackoffTooSmall { .. })
        ));
    }

    #[test]
    fn workflow_config_validates() {
        assert_eq!(
            WorkflowConfig::new(Duration::ZERO, RetryPolicy::default(), 4),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            WorkflowConfig::new(Duration::from_secs(1), RetryPolicy::default(), 0),
            Err(ConfigError::ZeroConcurrency)
        );

        let config = WorkflowConfig::default();
        assert_eq!(config.step_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_concurrent_pipelines(), 16);
    }
}
