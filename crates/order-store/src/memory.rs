use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{DomainError, Order, OrderState, Payment};
use tokio::sync::RwLock;

use crate::{Event, Result, StepCommit, StoreError, store::OrderStore};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    payments: Vec<Payment>,
    events: Vec<Event>,
}

impl Tables {
    fn has_event(&self, order_id: OrderId, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.order_id == order_id && e.event_type == event_type)
    }

    fn has_charged_payment(&self, order_id: OrderId) -> bool {
        self.payments
            .iter()
            .any(|p| p.order_id == order_id && p.is_charged())
    }

    fn check_payment(&self, payment: &Payment) -> Result<()> {
        if !self.orders.contains_key(&payment.order_id) {
            return Err(StoreError::OrderNotFound(payment.order_id));
        }
        if payment.is_charged() && self.has_charged_payment(payment.order_id) {
            return Err(StoreError::PaymentAlreadyCharged(payment.order_id));
        }
        Ok(())
    }

    fn check_event(&self, event: &Event) -> Result<()> {
        if self.has_event(event.order_id, &event.event_type) {
            return Err(StoreError::DuplicateEvent {
                order_id: event.order_id,
                event_type: event.event_type.clone(),
            });
        }
        Ok(())
    }

    /// Computes the transitioned order without storing it.
    fn transitioned(
        order: &Order,
        from: OrderState,
        to: OrderState,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut next = order.clone();
        next.apply_transition(from, to, at).map_err(|e| match e {
            DomainError::StateMismatch { expected, actual } => StoreError::StaleState {
                order_id: order.id(),
                expected,
                actual,
            },
            other => StoreError::Domain(other),
        })?;
        Ok(next)
    }
}

/// In-memory order store for testing and local runs.
///
/// Provides the same interface and conflict semantics as the PostgreSQL
/// implementation. A single lock guards all tables, so every commit is
/// atomic.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    /// Returns the total number of payments stored.
    pub async fn payment_count(&self) -> usize {
        self.tables.read().await.payments.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        tables.orders.clear();
        tables.payments.clear();
        tables.events.clear();
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order.id()) {
            return Err(StoreError::OrderAlreadyExists(order.id()));
        }
        tables.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn update_order_state(
        &self,
        order_id: OrderId,
        from: OrderState,
        to: OrderState,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut tables = self.tables.write().await;
        let current = tables
            .orders
            .get(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        let next = Tables::transitioned(current, from, to, at)?;
        tables.orders.insert(order_id, next.clone());
        Ok(next)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_payment(payment)?;
        tables.payments.push(payment.clone());
        Ok(())
    }

    async fn get_payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_event(&self, event: &Event) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&event.order_id) {
            return Err(StoreError::OrderNotFound(event.order_id));
        }
        tables.check_event(event)?;
        tables.events.push(event.clone());
        Ok(())
    }

    async fn find_event(&self, order_id: OrderId, event_type: &str) -> Result<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .find(|e| e.order_id == order_id && e.event_type == event_type)
            .cloned())
    }

    async fn get_events_for_order(&self, order_id: OrderId) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn find_unfinished_orders(&self) -> Result<Vec<OrderId>> {
        let tables = self.tables.read().await;
        let mut unfinished: Vec<&Order> = tables
            .orders
            .values()
            .filter(|o| !o.is_terminal())
            .collect();
        unfinished.sort_by_key(|o| o.created_at());
        Ok(unfinished.into_iter().map(Order::id).collect())
    }

    async fn commit_step(&self, commit: StepCommit) -> Result<Event> {
        commit.validate().map_err(StoreError::Corrupt)?;

        let mut tables = self.tables.write().await;

        // Check everything first so a failure leaves the tables untouched.
        tables.check_event(&commit.event)?;

        let mut staged = match commit.new_order {
            Some(order) => {
                if tables.orders.contains_key(&order.id()) {
                    return Err(StoreError::OrderAlreadyExists(order.id()));
                }
                order
            }
            None => tables
                .orders
                .get(&commit.order_id)
                .cloned()
                .ok_or(StoreError::OrderNotFound(commit.order_id))?,
        };

        if let Some(t) = commit.transition {
            staged = Tables::transitioned(&staged, t.from, t.to, t.at)?;
        }

        if let Some(payment) = &commit.payment
            && payment.is_charged()
            && tables.has_charged_payment(commit.order_id)
        {
            return Err(StoreError::PaymentAlreadyCharged(commit.order_id));
        }

        tables.orders.insert(commit.order_id, staged);
        if let Some(payment) = commit.payment {
            tables.payments.push(payment);
        }
        tables.events.push(commit.event.clone());

        Ok(commit.event)
    }
}
