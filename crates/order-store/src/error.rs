use common::OrderId;
use domain::{DomainError, OrderState};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order was not found in the store.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this ID has already been inserted.
    #[error("Order already exists: {0}")]
    OrderAlreadyExists(OrderId),

    /// An event of this type already exists for the order.
    #[error("Event '{event_type}' already recorded for order {order_id}")]
    DuplicateEvent {
        order_id: OrderId,
        event_type: String,
    },

    /// A conditional state update found the order in a different state.
    #[error("Stale state for order {order_id}: expected {expected}, found {actual}")]
    StaleState {
        order_id: OrderId,
        expected: OrderState,
        actual: OrderState,
    },

    /// The order already has a charged payment.
    #[error("Order {0} already has a charged payment")]
    PaymentAlreadyCharged(OrderId),

    /// A domain rule was violated, or a stored value failed to parse.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A stored value is out of range for its domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for errors caused by a concurrent writer getting there
    /// first, as opposed to infrastructure failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::OrderAlreadyExists(_)
                | StoreError::DuplicateEvent { .. }
                | StoreError::StaleState { .. }
                | StoreError::PaymentAlreadyCharged(_)
        )
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
