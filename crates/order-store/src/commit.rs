use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderState, Payment, StepOutput};

use crate::Event;

/// A conditional state change: applied only if the order is still in `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderState,
    pub to: OrderState,
    pub at: DateTime<Utc>,
}

/// Everything one completed step writes, applied as a single transaction.
///
/// Either every part becomes visible or none does: a domain update without
/// its completion event (or the reverse) is never observable.
#[derive(Debug, Clone)]
pub struct StepCommit {
    /// The order the step ran for.
    pub order_id: OrderId,

    /// A new order row (receive step only).
    pub new_order: Option<Order>,

    /// A payment row (charge step only).
    pub payment: Option<Payment>,

    /// The state change the step effects (every step but receive).
    pub transition: Option<Transition>,

    /// The completion event.
    pub event: Event,
}

impl StepCommit {
    /// Builds the commit for a step output.
    ///
    /// The event payload is the serialized output, so the stored event can
    /// be turned back into the same output on replay.
    pub fn for_output(
        order_id: OrderId,
        output: &StepOutput,
        at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(output)?;
        let event = Event::new(order_id, output.event_type(), payload, at);

        let new_order = match output {
            StepOutput::Received(received) => Some(received.order.clone()),
            _ => None,
        };

        let payment = match output {
            StepOutput::PaymentCharged(receipt) => Some(Payment::charged(order_id, receipt)),
            _ => None,
        };

        let transition = output.step().from_state().map(|from| Transition {
            from,
            to: output.target_state(),
            at,
        });

        Ok(Self {
            order_id,
            new_order,
            payment,
            transition,
            event,
        })
    }

    /// Checks the parts of the commit agree on the order they touch.
    pub fn validate(&self) -> Result<(), String> {
        if self.event.order_id != self.order_id {
            return Err(format!(
                "event belongs to order {}, commit to {}",
                self.event.order_id, self.order_id
            ));
        }
        if let Some(order) = &self.new_order
            && order.id() != self.order_id
        {
            return Err(format!(
                "new order {} does not match commit order {}",
                order.id(),
                self.order_id
            ));
        }
        if let Some(payment) = &self.payment
            && payment.order_id != self.order_id
        {
            return Err(format!(
                "payment for order {} does not match commit order {}",
                payment.order_id, self.order_id
            ));
        }
        if self.new_order.is_none() && self.transition.is_none() {
            return Err("commit neither creates nor advances an order".to_string());
        }
        Ok(())
    }
}
