//! Worker pool for pipelines.
//!
//! Each pipeline is one tokio task. A semaphore bounds how many run at once,
//! and each gets a child of the runner's cancellation token so one order can
//! be stopped without touching the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::OrderId;
use domain::{Order, OrderSubmission};
use order_store::OrderStore;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::activities::FulfillmentActivities;
use crate::error::{Result, WorkflowError};
use crate::orchestrator::Orchestrator;

/// A spawned pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    order_id: OrderId,
    cancel: CancellationToken,
    join: JoinHandle<Result<Order>>,
}

impl PipelineHandle {
    /// The order the pipeline drives.
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Requests cancellation. The current attempt still finishes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the pipeline to finish.
    pub async fn wait(self) -> Result<Order> {
        self.join.await?
    }
}

enum Job {
    Submit(OrderSubmission),
    Resume,
}

struct Inner<S, A> {
    orchestrator: Orchestrator<S, A>,
    permits: Semaphore,
    root: CancellationToken,
    tracker: TaskTracker,
    running: Mutex<HashMap<OrderId, CancellationToken>>,
}

impl<S, A> Inner<S, A> {
    fn running(&self) -> MutexGuard<'_, HashMap<OrderId, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S, A> Inner<S, A>
where
    S: OrderStore + Clone,
    A: FulfillmentActivities,
{
    async fn run(&self, order_id: OrderId, job: Job, cancel: CancellationToken) -> Result<Order> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkflowError::Cancelled(order_id)),
            permit = self.permits.acquire() => {
                permit.map_err(|_| WorkflowError::Cancelled(order_id))?
            }
        };

        match job {
            Job::Submit(submission) => {
                self.orchestrator
                    .submit_as(order_id, submission, cancel)
                    .await
            }
            Job::Resume => self.orchestrator.resume(order_id, cancel).await,
        }
    }
}

/// An order's entry in the running map. Removed on drop, so a pipeline that
/// panics or is aborted does not keep its order marked as running.
struct Registration<S, A> {
    inner: Arc<Inner<S, A>>,
    order_id: OrderId,
}

impl<S, A> Drop for Registration<S, A> {
    fn drop(&mut self) {
        self.inner.running().remove(&self.order_id);
    }
}

/// Runs pipelines concurrently, at most `max_concurrent_pipelines` at once.
///
/// Cloning is cheap; clones share the same pool.
pub struct PipelineRunner<S, A> {
    inner: Arc<Inner<S, A>>,
}

impl<S, A> Clone for PipelineRunner<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> PipelineRunner<S, A>
where
    S: OrderStore + Clone + 'static,
    A: FulfillmentActivities + 'static,
{
    pub fn new(orchestrator: Orchestrator<S, A>) -> Self {
        let permits = Semaphore::new(orchestrator.config().max_concurrent_pipelines());
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                permits,
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<S, A> {
        &self.inner.orchestrator
    }

    /// Starts a pipeline for a new order. The order ID is assigned here.
    pub fn submit(&self, submission: OrderSubmission) -> Result<PipelineHandle> {
        self.spawn(OrderId::new(), Job::Submit(submission))
    }

    /// Starts a pipeline that continues a persisted order.
    pub fn resume(&self, order_id: OrderId) -> Result<PipelineHandle> {
        self.spawn(order_id, Job::Resume)
    }

    /// Cancels the running pipeline of an order. Returns false if none runs.
    pub fn cancel(&self, order_id: OrderId) -> bool {
        match self.inner.running().get(&order_id) {
            Some(token) => {
                tracing::info!(order_id = %order_id, "cancelling pipeline");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, order_id: OrderId) -> bool {
        self.inner.running().contains_key(&order_id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running().len()
    }

    /// Resumes every unfinished order found in the store.
    ///
    /// Called once at startup so work interrupted by a restart continues.
    /// Orders that already have a running pipeline are skipped.
    pub async fn recover(&self) -> Result<Vec<PipelineHandle>> {
        let unfinished = self.orchestrator().store().find_unfinished_orders().await?;
        tracing::info!(count = unfinished.len(), "recovering unfinished orders");

        let mut handles = Vec::with_capacity(unfinished.len());
        for order_id in unfinished {
            match self.resume(order_id) {
                Ok(handle) => handles.push(handle),
                Err(WorkflowError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(handles)
    }

    /// Stops accepting work, cancels every pipeline and waits for in-flight
    /// attempts to finish and record their results.
    pub async fn shutdown(&self) {
        tracing::info!(running = self.running_count(), "shutting down pipeline runner");
        self.inner.root.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn spawn(&self, order_id: OrderId, job: Job) -> Result<PipelineHandle> {
        if self.inner.root.is_cancelled() {
            return Err(WorkflowError::Cancelled(order_id));
        }

        let cancel = self.inner.root.child_token();
        {
            let mut running = self.inner.running();
            if running.contains_key(&order_id) {
                return Err(WorkflowError::AlreadyRunning(order_id));
            }
            running.insert(order_id, cancel.clone());
        }

        let registration = Registration {
            inner: Arc::clone(&self.inner),
            order_id,
        };
        let token = cancel.clone();
        let join = self.inner.tracker.spawn(async move {
            let result = registration.inner.run(order_id, job, token).await;
            drop(registration);
            result
        });

        Ok(PipelineHandle {
            order_id,
            cancel,
            join,
        })
    }
}
