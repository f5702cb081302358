use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderState, Payment};

use crate::{Event, Result, StepCommit, StoreError};

/// Durable storage for orders, payments and events.
///
/// All implementations must be thread-safe (Send + Sync). Each method is a
/// self-contained unit: implementations acquire whatever connection they
/// need for the call and release it before returning, on every path.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order.
    ///
    /// Fails with `OrderAlreadyExists` if the ID is taken.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Loads an order. Returns None if it doesn't exist.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Moves an order from `from` to `to` if it is still in `from`.
    ///
    /// Fails with `StaleState` if the order has moved on, and with a domain
    /// error if the edge is not part of the state machine.
    async fn update_order_state(
        &self,
        order_id: OrderId,
        from: OrderState,
        to: OrderState,
        at: DateTime<Utc>,
    ) -> Result<Order>;

    /// Inserts a payment record.
    ///
    /// Fails with `PaymentAlreadyCharged` if the order already has a
    /// charged payment and this one is charged too.
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;

    /// Retrieves all payments for an order, oldest first.
    async fn get_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Appends an event.
    ///
    /// Fails with `DuplicateEvent` if the order already has an event of the
    /// same type.
    async fn insert_event(&self, event: &Event) -> Result<()>;

    /// Finds the event of a given type for an order.
    async fn find_event(&self, order_id: OrderId, event_type: &str) -> Result<Option<Event>>;

    /// Retrieves all events for an order in the order they were recorded.
    async fn get_events_for_order(&self, order_id: OrderId) -> Result<Vec<Event>>;

    /// IDs of orders not yet in a terminal state, oldest first.
    async fn find_unfinished_orders(&self) -> Result<Vec<OrderId>>;

    /// Applies every write of a completed step atomically.
    ///
    /// Returns the recorded event. Conflicts (`DuplicateEvent`,
    /// `OrderAlreadyExists`, `StaleState`, `PaymentAlreadyCharged`) leave
    /// the store untouched.
    async fn commit_step(&self, commit: StepCommit) -> Result<Event>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Loads an order, failing with `OrderNotFound` if it doesn't exist.
    async fn require_order(&self, order_id: OrderId) -> Result<Order> {
        self.get_order(order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    /// Finds the first event among `event_types` recorded for an order.
    async fn find_any_event(
        &self,
        order_id: OrderId,
        event_types: &[&str],
    ) -> Result<Option<Event>> {
        for event_type in event_types {
            if let Some(event) = self.find_event(order_id, event_type).await? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Returns the charged payment of an order, if any.
    async fn charged_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .get_payments_for_order(order_id)
            .await?
            .into_iter()
            .find(Payment::is_charged))
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
