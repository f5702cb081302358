//! Order record, state machine and step outputs.

mod aggregate;
mod outputs;
mod state;
pub mod step;
mod value_objects;

pub use aggregate::Order;
pub use outputs::{
    DispatchConfirmation, PackageConfirmation, PaymentReceipt, ReceivedOrder, RejectionReason,
    ShipmentConfirmation, StepOutput, ValidationOutcome,
};
pub use state::OrderState;
pub use step::Step;
pub use value_objects::{Address, Money, OrderItem, OrderSubmission};
