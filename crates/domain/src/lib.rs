//! Domain layer for the order fulfillment workflow.
//!
//! This crate provides:
//! - the `Order` record and its forward-only state machine
//! - the `Step` table mapping each transition to the step that effects it
//! - typed step outputs (`StepOutput`) used as event payloads
//! - `Payment` records

pub mod error;
pub mod order;
pub mod payment;

pub use error::DomainError;
pub use order::{
    Address, DispatchConfirmation, Money, Order, OrderItem, OrderState, OrderSubmission,
    PackageConfirmation, PaymentReceipt, ReceivedOrder, RejectionReason, ShipmentConfirmation,
    Step, StepOutput, ValidationOutcome,
};
pub use order::step;
pub use payment::{Payment, PaymentStatus};
