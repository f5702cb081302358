//! Durable workflow engine for order fulfillment.
//!
//! An order moves through a fixed pipeline of steps:
//! 1. Receive
//! 2. Validate (may end the pipeline with a rejection)
//! 3. Charge payment
//! 4. Ship
//! 5. Prepare package
//! 6. Dispatch carrier
//!
//! Each step's remote operation may fail or hang. Steps are retried with
//! bounded backoff, and every step's effect is committed exactly once
//! together with its completion event, so a pipeline can be resumed from
//! the store after any interruption without repeating work.

pub mod activities;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod simulator;

pub use activities::{ActivityError, FulfillmentActivities, SimulatedActivities};
pub use config::{RetryPolicy, WorkflowConfig};
pub use error::{ConfigError, RetryError, StepError, WorkflowError};
pub use executor::StepExecutor;
pub use guard::{Guarded, IdempotencyGuard};
pub use orchestrator::Orchestrator;
pub use retry::RetryController;
pub use runner::{PipelineHandle, PipelineRunner};
pub use simulator::{Behavior, FlakySimulator};
pub use tokio_util::sync::CancellationToken;
