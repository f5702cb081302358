//! Fulfillment steps and the events that record their completion.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

use super::OrderState;

/// Event type: order persisted by the receive step.
pub const ORDER_RECEIVED: &str = "order_received";

/// Event type: order passed validation.
pub const ORDER_VALIDATED: &str = "order_validated";

/// Event type: order failed validation.
pub const ORDER_REJECTED: &str = "order_rejected";

/// Event type: payment captured.
pub const PAYMENT_CHARGED: &str = "payment_charged";

/// Event type: order shipped.
pub const ORDER_SHIPPED: &str = "order_shipped";

/// Event type: package prepared.
pub const PACKAGE_PREPARED: &str = "package_prepared";

/// Event type: carrier dispatched.
pub const CARRIER_DISPATCHED: &str = "carrier_dispatched";

/// A single side-effecting operation that effects one order-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Receive,
    Validate,
    ChargePayment,
    Ship,
    PreparePackage,
    DispatchCarrier,
}

impl Step {
    /// All steps in pipeline order.
    pub const ALL: [Step; 6] = [
        Step::Receive,
        Step::Validate,
        Step::ChargePayment,
        Step::Ship,
        Step::PreparePackage,
        Step::DispatchCarrier,
    ];

    /// The state an order must be in before this step may run.
    ///
    /// `Receive` creates the order, so it has no precondition state.
    pub fn from_state(&self) -> Option<OrderState> {
        match self {
            Step::Receive => None,
            Step::Validate => Some(OrderState::Received),
            Step::ChargePayment => Some(OrderState::Validated),
            Step::Ship => Some(OrderState::PaymentCharged),
            Step::PreparePackage => Some(OrderState::Shipped),
            Step::DispatchCarrier => Some(OrderState::PackagePrepared),
        }
    }

    /// The state this step produces on success.
    pub fn to_state(&self) -> OrderState {
        match self {
            Step::Receive => OrderState::Received,
            Step::Validate => OrderState::Validated,
            Step::ChargePayment => OrderState::PaymentCharged,
            Step::Ship => OrderState::Shipped,
            Step::PreparePackage => OrderState::PackagePrepared,
            Step::DispatchCarrier => OrderState::Dispatched,
        }
    }

    /// The completion event recorded when this step succeeds.
    pub fn event_type(&self) -> &'static str {
        match self {
            Step::Receive => ORDER_RECEIVED,
            Step::Validate => ORDER_VALIDATED,
            Step::ChargePayment => PAYMENT_CHARGED,
            Step::Ship => ORDER_SHIPPED,
            Step::PreparePackage => PACKAGE_PREPARED,
            Step::DispatchCarrier => CARRIER_DISPATCHED,
        }
    }

    /// Every event type whose presence means this step already ran.
    ///
    /// Validation closes with either an accepted or a rejected event.
    pub fn completion_event_types(&self) -> &'static [&'static str] {
        match self {
            Step::Receive => &[ORDER_RECEIVED],
            Step::Validate => &[ORDER_VALIDATED, ORDER_REJECTED],
            Step::ChargePayment => &[PAYMENT_CHARGED],
            Step::Ship => &[ORDER_SHIPPED],
            Step::PreparePackage => &[PACKAGE_PREPARED],
            Step::DispatchCarrier => &[CARRIER_DISPATCHED],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Receive => "receive",
            Step::Validate => "validate",
            Step::ChargePayment => "charge_payment",
            Step::Ship => "ship",
            Step::PreparePackage => "prepare_package",
            Step::DispatchCarrier => "dispatch_carrier",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Step {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStep(s.to_string()))
    }
}
