//! The remote operations behind each fulfillment step.

pub mod simulated;

use async_trait::async_trait;
use common::OrderId;
use domain::{
    DispatchConfirmation, Order, OrderSubmission, PackageConfirmation, PaymentReceipt,
    ReceivedOrder, ShipmentConfirmation, ValidationOutcome,
};
use thiserror::Error;

pub use simulated::SimulatedActivities;

/// A remote operation failed. Always transient from the engine's view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivityError {
    #[error("Forced failure for testing")]
    SimulatedFailure,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Order {0} total does not fit a payment amount")]
    AmountOverflow(OrderId),
}

/// One operation per step. Implementations do the business work and talk
/// to external systems; they never write to the order store.
#[async_trait]
pub trait FulfillmentActivities: Send + Sync {
    /// Builds the order record for a new submission.
    async fn receive_order(
        &self,
        order_id: OrderId,
        submission: OrderSubmission,
    ) -> Result<ReceivedOrder, ActivityError>;

    /// Checks the order's items. A rejection is an outcome, not an error.
    async fn validate_order(&self, order: &Order) -> Result<ValidationOutcome, ActivityError>;

    /// Charges the customer.
    async fn charge_payment(&self, order: &Order) -> Result<PaymentReceipt, ActivityError>;

    async fn ship_order(&self, order: &Order) -> Result<ShipmentConfirmation, ActivityError>;

    async fn prepare_package(&self, order: &Order) -> Result<PackageConfirmation, ActivityError>;

    async fn dispatch_carrier(&self, order: &Order)
    -> Result<DispatchConfirmation, ActivityError>;
}
