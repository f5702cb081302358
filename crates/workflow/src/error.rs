//! Workflow error types.

use std::time::Duration;

use common::OrderId;
use domain::{RejectionReason, Step};
use order_store::StoreError;
use thiserror::Error;

/// Why a single step attempt did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// The operation did not finish before its deadline. Its outcome is
    /// unknown; the abandoned attempt may or may not have taken effect.
    #[error("Step '{step}' timed out after {timeout:?}")]
    Timeout { step: Step, timeout: Duration },

    /// The operation (or the store) reported a failure.
    #[error("Step '{step}' failed: {cause}")]
    Operation { step: Step, cause: String },

    /// Persisted data contradicts what the step expects. Retrying cannot
    /// fix this.
    #[error("Step '{step}' integrity violation: {detail}")]
    Integrity { step: Step, detail: String },
}

impl StepError {
    /// Returns the step the failure belongs to.
    pub fn step(&self) -> Step {
        match self {
            StepError::Timeout { step, .. }
            | StepError::Operation { step, .. }
            | StepError::Integrity { step, .. } => *step,
        }
    }

    /// Timeouts and operation failures are transient.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, StepError::Integrity { .. })
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Timeout { .. } => "timeout",
            StepError::Operation { .. } => "operation",
            StepError::Integrity { .. } => "integrity",
        }
    }
}

/// Outcome of a retried step that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    /// Every allowed attempt failed.
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: StepError },

    /// An attempt failed in a way retrying cannot fix.
    #[error(transparent)]
    NonRetriable(StepError),

    /// Cancellation was requested before an attempt or during a backoff.
    #[error("Cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Errors a pipeline reports to its caller.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The order failed validation. Terminal; nothing was charged.
    #[error("Order {order_id} rejected: {reason}")]
    Rejected {
        order_id: OrderId,
        reason: RejectionReason,
    },

    /// A step kept failing. The order stays at its last committed state and
    /// can be resumed.
    #[error("Step '{step}' of order {order_id} failed after {attempts} attempts: {last_cause}")]
    RetriesExhausted {
        order_id: OrderId,
        step: Step,
        attempts: u32,
        last_cause: String,
    },

    /// Persisted state contradicts the state machine.
    #[error("Integrity violation on order {order_id}: {detail}")]
    IntegrityViolation { order_id: OrderId, detail: String },

    /// The pipeline was cancelled before finishing.
    #[error("Pipeline for order {0} was cancelled")]
    Cancelled(OrderId),

    /// A pipeline for this order is already running.
    #[error("Pipeline for order {0} is already running")]
    AlreadyRunning(OrderId),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Store error outside of a step attempt.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The pipeline task panicked or was aborted.
    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WorkflowError {
    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Rejected { .. } => "rejected",
            WorkflowError::RetriesExhausted { .. } => "retries_exhausted",
            WorkflowError::IntegrityViolation { .. } => "integrity_violation",
            WorkflowError::Cancelled(_) => "cancelled",
            WorkflowError::AlreadyRunning(_) => "already_running",
            WorkflowError::OrderNotFound(_) => "order_not_found",
            WorkflowError::Store(_) => "store",
            WorkflowError::Join(_) => "join",
        }
    }
}

/// Invalid engine configuration, reported at startup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("backoff_multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("max_backoff ({max:?}) is shorter than initial_backoff ({initial:?})")]
    MaxBackoffTooSmall { initial: Duration, max: Duration },

    #[error("step timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max_concurrent_pipelines must be at least 1")]
    ZeroConcurrency,

    #[error("simulator rates must lie in [0, 1] and sum to at most 1 (failure={failure}, hang={hang})")]
    InvalidRates { failure: f64, hang: f64 },
}

/// Convenience type alias for workflow results.
pub type Result<T> = std::result::Result<T, WorkflowError>;
