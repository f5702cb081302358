//! Domain error types.

use thiserror::Error;

use crate::order::OrderState;

/// Errors that can occur during domain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The edge is not part of the order state machine.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    /// The order is not in the state the transition starts from.
    #[error("State mismatch: expected {expected}, actual {actual}")]
    StateMismatch {
        expected: OrderState,
        actual: OrderState,
    },

    /// A stored state name could not be parsed.
    #[error("Unknown order state: {0}")]
    UnknownState(String),

    /// A step name could not be parsed.
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// A stored payment status could not be parsed.
    #[error("Unknown payment status: {0}")]
    UnknownPaymentStatus(String),
}
