//! Exactly-once step completion.
//!
//! The completion event of a step is its idempotency record: the store keeps
//! at most one event per `(order_id, event_type)` and writes it in the same
//! transaction as the step's domain changes. A step that already has its
//! event is never run again; its stored output is handed back instead.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use common::OrderId;
use domain::{Step, StepOutput};
use order_store::{Event, OrderStore, OrderStoreExt, StepCommit};

use crate::error::StepError;

/// Result of a guarded step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded {
    /// The step's output, fresh or as first recorded.
    pub output: StepOutput,

    /// True if the output came from the stored event rather than this call.
    pub replayed: bool,
}

/// Wraps step operations so each step's effect is recorded once.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard<S> {
    store: S,
    commit_timeout: Option<Duration>,
}

impl<S: OrderStore> IdempotencyGuard<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            commit_timeout: None,
        }
    }

    /// Bounds each commit. A commit that overruns fails as a retriable
    /// `Timeout`; if it did land, the next attempt replays it.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the recorded output of `step` for an order, if it completed.
    pub async fn recorded_output(
        &self,
        order_id: OrderId,
        step: Step,
    ) -> Result<Option<StepOutput>, StepError> {
        let event = self
            .store
            .find_any_event(order_id, step.completion_event_types())
            .await
            .map_err(|e| StepError::Operation {
                step,
                cause: e.to_string(),
            })?;

        event.map(|event| decode(step, &event)).transpose()
    }

    /// Runs `operation` for `step` unless the step already completed.
    ///
    /// On success the output and all of its domain changes are committed
    /// together. If another attempt committed first, that attempt's output
    /// wins and is returned as a replay; this call's output is discarded.
    pub async fn guarded_execute<F>(
        &self,
        order_id: OrderId,
        step: Step,
        operation: F,
    ) -> Result<Guarded, StepError>
    where
        F: Future<Output = Result<StepOutput, StepError>>,
    {
        if let Some(output) = self.recorded_output(order_id, step).await? {
            tracing::debug!(order_id = %order_id, step = %step, "step already recorded, replaying");
            return Ok(replay(step, output));
        }

        let output = operation.await?;
        if output.step() != step {
            return Err(StepError::Integrity {
                step,
                detail: format!("operation produced output for step '{}'", output.step()),
            });
        }

        let commit = StepCommit::for_output(order_id, &output, Utc::now()).map_err(|e| {
            StepError::Integrity {
                step,
                detail: format!("output cannot be serialized: {e}"),
            }
        })?;

        let committed = match self.commit_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.store.commit_step(commit)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            order_id = %order_id,
                            step = %step,
                            timeout_ms = timeout.as_millis() as u64,
                            "step commit timed out"
                        );
                        return Err(StepError::Timeout { step, timeout });
                    }
                }
            }
            None => self.store.commit_step(commit).await,
        };

        match committed {
            Ok(_) => Ok(Guarded {
                output,
                replayed: false,
            }),
            Err(e) if e.is_conflict() => match self.recorded_output(order_id, step).await? {
                Some(winner) => {
                    tracing::info!(
                        order_id = %order_id,
                        step = %step,
                        "step committed concurrently, discarding this attempt's output"
                    );
                    Ok(replay(step, winner))
                }
                None => Err(StepError::Integrity {
                    step,
                    detail: e.to_string(),
                }),
            },
            // Nothing was written; the whole step is safe to run again.
            Err(e) => Err(StepError::Operation {
                step,
                cause: e.to_string(),
            }),
        }
    }
}

fn replay(step: Step, output: StepOutput) -> Guarded {
    metrics::counter!("workflow_step_replays_total", "step" => step.as_str()).increment(1);
    Guarded {
        output,
        replayed: true,
    }
}

fn decode(step: Step, event: &Event) -> Result<StepOutput, StepError> {
    let output: StepOutput = event.payload_as().map_err(|e| StepError::Integrity {
        step,
        detail: format!("event {} has an unreadable payload: {e}", event.id),
    })?;

    if output.step() != step {
        return Err(StepError::Integrity {
            step,
            detail: format!(
                "event {} holds output for step '{}'",
                event.id,
                output.step()
            ),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use common::PaymentId;
    use domain::{
        Address, Money, Order, OrderItem, OrderState, OrderSubmission, PaymentReceipt,
        ReceivedOrder, ValidationOutcome, step,
    };
    use order_store::InMemoryOrderStore;
    use tokio::sync::Barrier;

    use super::*;

    /// Delegates to the in-memory store, but the next `stalls` commits hang
    /// for an hour before landing.
    #[derive(Clone)]
    struct StallingStore {
        inner: InMemoryOrderStore,
        stalls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl OrderStore for StallingStore {
        async fn insert_order(&self, order: &Order) -> order_store::Result<()> {
            self.inner.insert_order(order).await
        }

        async fn get_order(&self, order_id: OrderId) -> order_store::Result<Option<Order>> {
            self.inner.get_order(order_id).await
        }

        async fn update_order_state(
            &self,
            order_id: OrderId,
            from: OrderState,
            to: OrderState,
            at: chrono::DateTime<Utc>,
        ) -> order_store::Result<Order> {
            self.inner.update_order_state(order_id, from, to, at).await
        }

        async fn insert_payment(&self, payment: &domain::Payment) -> order_store::Result<()> {
            self.inner.insert_payment(payment).await
        }

        async fn get_payments_for_order(
            &self,
            order_id: OrderId,
        ) -> order_store::Result<Vec<domain::Payment>> {
            self.inner.get_payments_for_order(order_id).await
        }

        async fn insert_event(&self, event: &Event) -> order_store::Result<()> {
            self.inner.insert_event(event).await
        }

        async fn find_event(
            &self,
            order_id: OrderId,
            event_type: &str,
        ) -> order_store::Result<Option<Event>> {
            self.inner.find_event(order_id, event_type).await
        }

        async fn get_events_for_order(&self, order_id: OrderId) -> order_store::Result<Vec<Event>> {
            self.inner.get_events_for_order(order_id).await
        }

        async fn find_unfinished_orders(&self) -> order_store::Result<Vec<OrderId>> {
            self.inner.find_unfinished_orders().await
        }

        async fn commit_step(&self, commit: StepCommit) -> order_store::Result<Event> {
            let stall = self
                .stalls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.commit_step(commit).await
        }
    }

    async fn validated_order(store: &InMemoryOrderStore) -> Order {
        let order = Order::receive(
            OrderId::new(),
            OrderSubmission::new(vec![OrderItem::new("ABC", 2)], Address::default()),
            Utc::now(),
        );
        let guard = IdempotencyGuard::new(store.clone());
        guard
            .guarded_execute(order.id(), Step::Receive, async {
                Ok(StepOutput::Received(ReceivedOrder {
                    order: order.clone(),
                }))
            })
            .await
            .unwrap();
        guard
            .guarded_execute(order.id(), Step::Validate, async {
                Ok(StepOutput::Validated(ValidationOutcome::Accepted))
            })
            .await
            .unwrap();
        order
    }

    fn receipt(cents: u64) -> StepOutput {
        StepOutput::PaymentCharged(PaymentReceipt {
            payment_id: PaymentId::new(),
            amount: Money::from_cents(cents),
            charged_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn completed_step_is_replayed_without_running() {
        let store = InMemoryOrderStore::new();
        let order = validated_order(&store).await;
        let guard = IdempotencyGuard::new(store.clone());
        let calls = AtomicU32::new(0);

        let first = guard
            .guarded_execute(order.id(), Step::ChargePayment, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(receipt(2))
            })
            .await
            .unwrap();
        let second = guard
            .guarded_execute(order.id(), Step::ChargePayment, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(receipt(2))
            })
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.output, second.output);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn failed_operation_writes_nothing() {
        let store = InMemoryOrderStore::new();
        let order = validated_order(&store).await;
        let guard = IdempotencyGuard::new(store.clone());

        let result = guard
            .guarded_execute(order.id(), Step::ChargePayment, async {
                Err(StepError::Operation {
                    step: Step::ChargePayment,
                    cause: "declined".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(StepError::Operation { .. })));
        assert_eq!(store.payment_count().await, 0);
        assert!(
            store
                .find_event(order.id(), step::PAYMENT_CHARGED)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            store.require_order(order.id()).await.unwrap().state(),
            OrderState::Validated
        );
    }

    #[tokio::test]
    async fn output_for_another_step_is_an_integrity_failure() {
        let store = InMemoryOrderStore::new();
        let order = validated_order(&store).await;
        let guard = IdempotencyGuard::new(store.clone());

        let result = guard
            .guarded_execute(order.id(), Step::ChargePayment, async {
                Ok(StepOutput::Validated(ValidationOutcome::Accepted))
            })
            .await;

        assert!(matches!(result, Err(StepError::Integrity { .. })));
    }

    #[tokio::test]
    async fn step_out_of_order_is_an_integrity_failure() {
        let store = InMemoryOrderStore::new();
        let order = validated_order(&store).await;
        let guard = IdempotencyGuard::new(store.clone());

        // Ship requires payment_charged; the order is only validated.
        let result = guard
            .guarded_execute(order.id(), Step::Ship, async {
                Ok(StepOutput::Shipped(domain::ShipmentConfirmation {
                    tracking_number: "TRK-1".to_string(),
                    shipped_at: Utc::now(),
                }))
            })
            .await;

        assert!(matches!(result, Err(StepError::Integrity { .. })));
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attempts_commit_exactly_once() {
        const ATTEMPTS: usize = 8;

        let store = InMemoryOrderStore::new();
        let order = validated_order(&store).await;
        let guard = Arc::new(IdempotencyGuard::new(store.clone()));
        // Every attempt passes the lookup before any of them commits.
        let barrier = Arc::new(Barrier::new(ATTEMPTS));

        let tasks: Vec<_> = (0..ATTEMPTS)
            .map(|_| {
                let guard = guard.clone();
                let barrier = barrier.clone();
                let order_id = order.id();
                tokio::spawn(async move {
                    guard
                        .guarded_execute(order_id, Step::ChargePayment, async move {
                            barrier.wait().await;
                            Ok(receipt(2))
                        })
                        .await
                })
            })
            .collect();

        let results: Vec<Guarded> = futures_util::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let fresh = results.iter().filter(|g| !g.replayed).count();
        assert_eq!(fresh, 1);
        assert!(results.iter().all(|g| g.output == results[0].output));

        assert_eq!(store.payment_count().await, 1);
        let events = store.get_events_for_order(order.id()).await.unwrap();
        let charged = events
            .iter()
            .filter(|e| e.event_type == step::PAYMENT_CHARGED)
            .count();
        assert_eq!(charged, 1);
        assert_eq!(
            store.require_order(order.id()).await.unwrap().state(),
            OrderState::PaymentCharged
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_commit_times_out_and_the_next_attempt_commits() {
        let store = InMemoryOrderStore::new();
        let order = validated_order(&store).await;
        let stalling = StallingStore {
            inner: store.clone(),
            stalls: Arc::new(AtomicU32::new(1)),
        };
        let timeout = Duration::from_millis(100);
        let guard = IdempotencyGuard::new(stalling).with_commit_timeout(timeout);

        let started = tokio::time::Instant::now();
        let first = guard
            .guarded_execute(order.id(), Step::ChargePayment, async { Ok(receipt(2)) })
            .await;

        assert_eq!(
            first,
            Err(StepError::Timeout {
                step: Step::ChargePayment,
                timeout,
            })
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.payment_count().await, 0);
        assert_eq!(
            store.require_order(order.id()).await.unwrap().state(),
            OrderState::Validated
        );

        let second = guard
            .guarded_execute(order.id(), Step::ChargePayment, async { Ok(receipt(2)) })
            .await
            .unwrap();

        assert!(!second.replayed);
        assert_eq!(store.payment_count().await, 1);
    }
}
