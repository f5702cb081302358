//! Activities backed by the flaky simulator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentId};
use domain::{
    DispatchConfirmation, Money, Order, OrderSubmission, PackageConfirmation, PaymentReceipt,
    ReceivedOrder, ShipmentConfirmation, Step, ValidationOutcome,
};

use super::{ActivityError, FulfillmentActivities};
use crate::simulator::FlakySimulator;

#[derive(Debug, Default)]
struct CallLog {
    calls: HashMap<Step, u32>,
    charges: Vec<(OrderId, Money)>,
}

/// Activities whose remote calls go through a [`FlakySimulator`].
///
/// Each step can get its own simulator; steps without one use the default.
/// Clones share the call log, so tests can hand a clone to the engine and
/// inspect the original.
#[derive(Debug, Clone)]
pub struct SimulatedActivities {
    default: FlakySimulator,
    per_step: HashMap<Step, FlakySimulator>,
    carrier: String,
    log: Arc<Mutex<CallLog>>,
}

impl SimulatedActivities {
    pub const DEFAULT_CARRIER: &'static str = "SIM-EXPRESS";

    pub fn new(default: FlakySimulator) -> Self {
        Self {
            default,
            per_step: HashMap::new(),
            carrier: Self::DEFAULT_CARRIER.to_string(),
            log: Arc::default(),
        }
    }

    /// Activities that never fail or hang.
    pub fn reliable() -> Self {
        Self::new(FlakySimulator::reliable())
    }

    /// Uses `simulator` for `step` only.
    pub fn with_step(mut self, step: Step, simulator: FlakySimulator) -> Self {
        self.per_step.insert(step, simulator);
        self
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = carrier.into();
        self
    }

    pub fn simulator_for(&self, step: Step) -> &FlakySimulator {
        self.per_step.get(&step).unwrap_or(&self.default)
    }

    /// Number of times the operation of `step` was invoked.
    pub fn calls(&self, step: Step) -> u32 {
        self.log().calls.get(&step).copied().unwrap_or(0)
    }

    /// Number of charges that went through on the simulated payment side.
    pub fn charges_issued(&self) -> usize {
        self.log().charges.len()
    }

    pub fn charges(&self) -> Vec<(OrderId, Money)> {
        self.log().charges.clone()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, CallLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn remote_call(&self, step: Step) -> Result<(), ActivityError> {
        *self.log().calls.entry(step).or_default() += 1;
        self.simulator_for(step).call().await
    }
}

impl Default for SimulatedActivities {
    fn default() -> Self {
        Self::new(FlakySimulator::default())
    }
}

#[async_trait]
impl FulfillmentActivities for SimulatedActivities {
    async fn receive_order(
        &self,
        order_id: OrderId,
        submission: OrderSubmission,
    ) -> Result<ReceivedOrder, ActivityError> {
        tracing::info!(order_id = %order_id, items = submission.items.len(), "receiving order");
        self.remote_call(Step::Receive).await?;

        Ok(ReceivedOrder {
            order: Order::receive(order_id, submission, Utc::now()),
        })
    }

    async fn validate_order(&self, order: &Order) -> Result<ValidationOutcome, ActivityError> {
        tracing::info!(order_id = %order.id(), "validating order");
        self.remote_call(Step::Validate).await?;

        Ok(order.validate())
    }

    async fn charge_payment(&self, order: &Order) -> Result<PaymentReceipt, ActivityError> {
        let total = order
            .total_quantity()
            .ok_or(ActivityError::AmountOverflow(order.id()))?;
        let amount = Money::from_cents(total);
        tracing::info!(order_id = %order.id(), amount = %amount, "charging payment");
        self.remote_call(Step::ChargePayment).await?;

        self.log().charges.push((order.id(), amount));
        Ok(PaymentReceipt {
            payment_id: PaymentId::new(),
            amount,
            charged_at: Utc::now(),
        })
    }

    async fn ship_order(&self, order: &Order) -> Result<ShipmentConfirmation, ActivityError> {
        tracing::info!(order_id = %order.id(), "shipping order");
        self.remote_call(Step::Ship).await?;

        Ok(ShipmentConfirmation {
            tracking_number: format!("TRK-{}", order.id().as_uuid().simple()),
            shipped_at: Utc::now(),
        })
    }

    async fn prepare_package(&self, order: &Order) -> Result<PackageConfirmation, ActivityError> {
        tracing::info!(order_id = %order.id(), "preparing package");
        self.remote_call(Step::PreparePackage).await?;

        Ok(PackageConfirmation {
            package_id: format!("PKG-{}", order.id().as_uuid().simple()),
            prepared_at: Utc::now(),
        })
    }

    async fn dispatch_carrier(
        &self,
        order: &Order,
    ) -> Result<DispatchConfirmation, ActivityError> {
        tracing::info!(order_id = %order.id(), carrier = %self.carrier, "dispatching carrier");
        self.remote_call(Step::DispatchCarrier).await?;

        Ok(DispatchConfirmation {
            carrier: self.carrier.clone(),
            dispatched_at: Utc::now(),
        })
    }
}
