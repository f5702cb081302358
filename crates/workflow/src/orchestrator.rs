//! Drives an order through its steps until it reaches a terminal state.

use std::future::Future;
use std::time::Instant;

use common::OrderId;
use domain::{Order, OrderState, OrderSubmission, Step, StepOutput, step};
use order_store::OrderStore;
use tokio_util::sync::CancellationToken;

use crate::activities::{ActivityError, FulfillmentActivities};
use crate::config::WorkflowConfig;
use crate::error::{Result, RetryError, WorkflowError};
use crate::executor::StepExecutor;
use crate::guard::{Guarded, IdempotencyGuard};
use crate::retry::RetryController;

/// Runs fulfillment pipelines.
///
/// Every step goes through the same layers: the retry controller decides
/// whether to try again, the idempotency guard skips steps that already
/// completed and commits fresh results atomically, and the executor bounds
/// each attempt with the step deadline.
///
/// All progress lives in the store, so a pipeline interrupted at any point
/// (error, cancellation, crash) continues from the last committed step via
/// [`Orchestrator::resume`].
pub struct Orchestrator<S, A> {
    store: S,
    activities: A,
    guard: IdempotencyGuard<S>,
    executor: StepExecutor,
    config: WorkflowConfig,
}

impl<S, A> Orchestrator<S, A>
where
    S: OrderStore + Clone,
    A: FulfillmentActivities,
{
    pub fn new(store: S, activities: A, config: WorkflowConfig) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone())
                .with_commit_timeout(config.step_timeout()),
            executor: StepExecutor::new(config.step_timeout()),
            store,
            activities,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn activities(&self) -> &A {
        &self.activities
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Receives a new order and drives it to a terminal state.
    ///
    /// The order ID is generated here. Returns the dispatched order, or the
    /// reason the pipeline stopped.
    pub async fn submit(
        &self,
        submission: OrderSubmission,
        cancel: CancellationToken,
    ) -> Result<Order> {
        self.submit_as(OrderId::new(), submission, cancel).await
    }

    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub(crate) async fn submit_as(
        &self,
        order_id: OrderId,
        submission: OrderSubmission,
        cancel: CancellationToken,
    ) -> Result<Order> {
        metrics::counter!("workflow_pipelines_total").increment(1);
        let started = Instant::now();
        tracing::info!(items = submission.items.len(), "pipeline started");

        let result = self.receive_and_drive(order_id, &submission, &cancel).await;
        record_outcome(&result, started);
        result
    }

    /// Continues a persisted order from its current state.
    ///
    /// Steps that already completed are not run again. A dispatched order is
    /// returned as is; a rejected one reports its stored rejection.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn resume(&self, order_id: OrderId, cancel: CancellationToken) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(WorkflowError::OrderNotFound(order_id))?;

        metrics::counter!("workflow_pipelines_total").increment(1);
        let started = Instant::now();
        tracing::info!(state = %order.state(), "pipeline resumed");

        let result = self.drive(order, &cancel).await;
        record_outcome(&result, started);
        result
    }

    async fn receive_and_drive(
        &self,
        order_id: OrderId,
        submission: &OrderSubmission,
        cancel: &CancellationToken,
    ) -> Result<Order> {
        let activities = &self.activities;
        let guarded = self
            .run_step(order_id, Step::Receive, cancel, move || {
                let submission = submission.clone();
                async move {
                    activities
                        .receive_order(order_id, submission)
                        .await
                        .map(StepOutput::Received)
                }
            })
            .await?;

        let order = self.confirm(order_id, Step::Receive, &guarded).await?;
        self.drive(order, cancel).await
    }

    async fn drive(&self, mut order: Order, cancel: &CancellationToken) -> Result<Order> {
        let order_id = order.id();

        while let Some(step) = order.state().next_step() {
            let guarded = {
                let activities = &self.activities;
                let current = &order;
                self.run_step(order_id, step, cancel, move || {
                    perform(activities, step, current)
                })
                .await?
            };
            order = self.confirm(order_id, step, &guarded).await?;
        }

        if order.state() == OrderState::Rejected {
            return Err(self.rejection(order_id).await);
        }

        tracing::info!(order_id = %order_id, "order fulfilled");
        Ok(order)
    }

    async fn run_step<F, Fut>(
        &self,
        order_id: OrderId,
        step: Step,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<Guarded>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<StepOutput, ActivityError>>,
    {
        tracing::info!(order_id = %order_id, step = %step, "step started");

        let retry = RetryController::new(self.config.retry().clone(), cancel.clone());
        let guard = &self.guard;
        let executor = &self.executor;
        let operation = &operation;

        let result = retry
            .run_with_retry(step, move |attempt| {
                tracing::debug!(order_id = %order_id, step = %step, attempt, "attempt started");
                guard.guarded_execute(order_id, step, executor.execute(step, operation()))
            })
            .await;

        match result {
            Ok(guarded) => {
                tracing::info!(
                    order_id = %order_id,
                    step = %step,
                    replayed = guarded.replayed,
                    "step completed"
                );
                Ok(guarded)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(WorkflowError::RetriesExhausted {
                    order_id,
                    step,
                    attempts,
                    last_cause: last.to_string(),
                })
            }
            Err(RetryError::NonRetriable(e)) => Err(self.integrity(order_id, e.to_string())),
            Err(RetryError::Cancelled { attempts }) => {
                tracing::info!(order_id = %order_id, step = %step, attempts, "step cancelled");
                Err(WorkflowError::Cancelled(order_id))
            }
        }
    }

    /// Re-reads the order after a step and checks it landed where the
    /// step's output says it should.
    async fn confirm(&self, order_id: OrderId, step: Step, guarded: &Guarded) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(WorkflowError::OrderNotFound(order_id))?;

        let expected = guarded.output.target_state();
        if order.state() != expected {
            return Err(self.integrity(
                order_id,
                format!(
                    "after step '{step}' the order is {}, expected {expected}",
                    order.state()
                ),
            ));
        }
        Ok(order)
    }

    async fn rejection(&self, order_id: OrderId) -> WorkflowError {
        let event = match self.store.find_event(order_id, step::ORDER_REJECTED).await {
            Ok(event) => event,
            Err(e) => return e.into(),
        };

        let reason = event
            .and_then(|e| e.payload_as::<StepOutput>().ok())
            .and_then(|output| output.rejection().cloned());

        match reason {
            Some(reason) => {
                tracing::info!(order_id = %order_id, reason = %reason, "order rejected");
                WorkflowError::Rejected { order_id, reason }
            }
            None => self.integrity(
                order_id,
                "rejected order has no readable rejection event".to_string(),
            ),
        }
    }

    fn integrity(&self, order_id: OrderId, detail: String) -> WorkflowError {
        tracing::error!(order_id = %order_id, detail = %detail, "integrity violation");
        metrics::counter!("workflow_integrity_violations_total").increment(1);
        WorkflowError::IntegrityViolation { order_id, detail }
    }
}

/// Calls the activity behind `step` and tags its result.
async fn perform<A: FulfillmentActivities>(
    activities: &A,
    step: Step,
    order: &Order,
) -> std::result::Result<StepOutput, ActivityError> {
    let output = match step {
        // The order exists, so receiving it again yields the same record.
        Step::Receive => StepOutput::Received(domain::ReceivedOrder {
            order: order.clone(),
        }),
        Step::Validate => StepOutput::Validated(activities.validate_order(order).await?),
        Step::ChargePayment => StepOutput::PaymentCharged(activities.charge_payment(order).await?),
        Step::Ship => StepOutput::Shipped(activities.ship_order(order).await?),
        Step::PreparePackage => {
            StepOutput::PackagePrepared(activities.prepare_package(order).await?)
        }
        Step::DispatchCarrier => StepOutput::Dispatched(activities.dispatch_carrier(order).await?),
    };
    Ok(output)
}

fn record_outcome(result: &Result<Order>, started: Instant) {
    metrics::histogram!("workflow_pipeline_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(_) => metrics::counter!("workflow_pipelines_completed").increment(1),
        Err(WorkflowError::Rejected { .. }) => {
            metrics::counter!("workflow_pipelines_rejected").increment(1)
        }
        Err(e) => {
            tracing::warn!(error = %e, "pipeline stopped");
            metrics::counter!("workflow_pipelines_failed", "reason" => e.kind()).increment(1)
        }
    }
}
