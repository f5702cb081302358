//! Shared identifier types for the order fulfillment workspace.

pub mod types;

pub use types::{OrderId, PaymentId};
