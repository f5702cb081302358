//! Typed results of each fulfillment step.
//!
//! A step's output is what its completion event stores as payload, so a
//! replayed step hands back exactly what the first run produced.

use chrono::{DateTime, Utc};
use common::PaymentId;
use serde::{Deserialize, Serialize};

use super::{Money, Order, OrderState, Step, step};

/// The result of any step, tagged by the step that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepOutput {
    Received(ReceivedOrder),
    Validated(ValidationOutcome),
    PaymentCharged(PaymentReceipt),
    Shipped(ShipmentConfirmation),
    PackagePrepared(PackageConfirmation),
    Dispatched(DispatchConfirmation),
}

impl StepOutput {
    /// The step that produces this kind of output.
    pub fn step(&self) -> Step {
        match self {
            StepOutput::Received(_) => Step::Receive,
            StepOutput::Validated(_) => Step::Validate,
            StepOutput::PaymentCharged(_) => Step::ChargePayment,
            StepOutput::Shipped(_) => Step::Ship,
            StepOutput::PackagePrepared(_) => Step::PreparePackage,
            StepOutput::Dispatched(_) => Step::DispatchCarrier,
        }
    }

    /// The event type recorded for this output.
    pub fn event_type(&self) -> &'static str {
        match self {
            StepOutput::Validated(ValidationOutcome::Rejected { .. }) => step::ORDER_REJECTED,
            other => other.step().event_type(),
        }
    }

    /// The state the order is in once this output is committed.
    pub fn target_state(&self) -> OrderState {
        match self {
            StepOutput::Validated(ValidationOutcome::Rejected { .. }) => OrderState::Rejected,
            other => other.step().to_state(),
        }
    }

    /// Returns the rejection reason if this is a failed validation.
    pub fn rejection(&self) -> Option<&RejectionReason> {
        match self {
            StepOutput::Validated(ValidationOutcome::Rejected { reason }) => Some(reason),
            _ => None,
        }
    }
}

/// Output of the receive step: the order as first persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedOrder {
    pub order: Order,
}

/// Output of the validate step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted,
    Rejected { reason: RejectionReason },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }
}

/// Why an order failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    NoItems,
    MissingSku { index: usize },
    NonPositiveQuantity { index: usize, qty: i64 },
    TotalQuantityTooLarge,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NoItems => write!(f, "order has no items"),
            RejectionReason::MissingSku { index } => write!(f, "item {index} has no SKU"),
            RejectionReason::NonPositiveQuantity { index, qty } => {
                write!(f, "item {index} has non-positive quantity {qty}")
            }
            RejectionReason::TotalQuantityTooLarge => {
                write!(f, "total quantity exceeds the largest chargeable amount")
            }
        }
    }
}

/// Output of the charge_payment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub charged_at: DateTime<Utc>,
}

/// Output of the ship step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentConfirmation {
    pub tracking_number: String,
    pub shipped_at: DateTime<Utc>,
}

/// Output of the prepare_package step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfirmation {
    pub package_id: String,
    pub prepared_at: DateTime<Utc>,
}

/// Output of the dispatch_carrier step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfirmation {
    pub carrier: String,
    pub dispatched_at: DateTime<Utc>,
}
