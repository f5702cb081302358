//! Order state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

use super::Step;

/// The state of an order in its fulfillment lifecycle.
///
/// State transitions:
/// ```text
/// Received ──► Validated ──► PaymentCharged ──► Shipped ──► PackagePrepared ──► Dispatched
///     │
///     └──► Rejected
/// ```
///
/// Shipping is recorded before packaging; see `Step` for the step that
/// effects each edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Order has been persisted by the receive step.
    Received,

    /// Items passed structural validation.
    Validated,

    /// Payment has been captured exactly once.
    PaymentCharged,

    /// Order has been handed to shipping.
    Shipped,

    /// Package is prepared for the carrier.
    PackagePrepared,

    /// Carrier has picked the package up (terminal state).
    Dispatched,

    /// Validation failed (terminal state).
    Rejected,
}

impl OrderState {
    /// The success path, in the only order it may be walked.
    pub const CANONICAL: [OrderState; 6] = [
        OrderState::Received,
        OrderState::Validated,
        OrderState::PaymentCharged,
        OrderState::Shipped,
        OrderState::PackagePrepared,
        OrderState::Dispatched,
    ];

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Dispatched | OrderState::Rejected)
    }

    /// Returns the step that moves an order out of this state.
    ///
    /// Terminal states have no next step.
    pub fn next_step(&self) -> Option<Step> {
        match self {
            OrderState::Received => Some(Step::Validate),
            OrderState::Validated => Some(Step::ChargePayment),
            OrderState::PaymentCharged => Some(Step::Ship),
            OrderState::Shipped => Some(Step::PreparePackage),
            OrderState::PackagePrepared => Some(Step::DispatchCarrier),
            OrderState::Dispatched | OrderState::Rejected => None,
        }
    }

    /// Position on the success path. `Rejected` is off the path.
    pub fn position(&self) -> Option<usize> {
        Self::CANONICAL.iter().position(|s| s == self)
    }

    /// Returns true if `self -> to` is an edge of the state machine.
    pub fn can_transition_to(&self, to: OrderState) -> bool {
        match (self, to) {
            (OrderState::Received, OrderState::Rejected) => true,
            (from, to) => match (from.position(), to.position()) {
                (Some(f), Some(t)) => t == f + 1,
                _ => false,
            },
        }
    }

    /// Returns the state name as stored and logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Received => "received",
            OrderState::Validated => "validated",
            OrderState::PaymentCharged => "payment_charged",
            OrderState::Shipped => "shipped",
            OrderState::PackagePrepared => "package_prepared",
            OrderState::Dispatched => "dispatched",
            OrderState::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(OrderState::Received),
            "validated" => Ok(OrderState::Validated),
            "payment_charged" => Ok(OrderState::PaymentCharged),
            "shipped" => Ok(OrderState::Shipped),
            "package_prepared" => Ok(OrderState::PackagePrepared),
            "dispatched" => Ok(OrderState::Dispatched),
            "rejected" => Ok(OrderState::Rejected),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_is_a_chain() {
        for pair in OrderState::CANONICAL.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
            assert!(!pair[1].can_transition_to(pair[0]));
        }
    }

    #[test]
    fn test_no_state_can_be_skipped() {
        assert!(!OrderState::Received.can_transition_to(OrderState::PaymentCharged));
        assert!(!OrderState::Validated.can_transition_to(OrderState::Shipped));
        assert!(!OrderState::Shipped.can_transition_to(OrderState::Dispatched));
    }

    #[test]
    fn test_no_state_repeats() {
        for state in OrderState::CANONICAL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_rejection_only_from_received() {
        assert!(OrderState::Received.can_transition_to(OrderState::Rejected));
        assert!(!OrderState::Validated.can_transition_to(OrderState::Rejected));
        assert!(!OrderState::PaymentCharged.can_transition_to(OrderState::Rejected));
        assert!(!OrderState::Rejected.can_transition_to(OrderState::Validated));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderState::Received.is_terminal());
        assert!(!OrderState::Validated.is_terminal());
        assert!(!OrderState::PaymentCharged.is_terminal());
        assert!(!OrderState::Shipped.is_terminal());
        assert!(!OrderState::PackagePrepared.is_terminal());
        assert!(OrderState::Dispatched.is_terminal());
        assert!(OrderState::Rejected.is_terminal());
    }

    #[test]
    fn test_next_step_resumes_after_payment() {
        assert_eq!(OrderState::PaymentCharged.next_step(), Some(Step::Ship));
        assert_eq!(OrderState::Dispatched.next_step(), None);
        assert_eq!(OrderState::Rejected.next_step(), None);
    }

    #[test]
    fn test_display_and_parse_agree() {
        for state in OrderState::CANONICAL
            .into_iter()
            .chain(std::iter::once(OrderState::Rejected))
        {
            assert_eq!(state.to_string().parse::<OrderState>().unwrap(), state);
        }
        assert!(matches!(
            "cancelled".parse::<OrderState>(),
            Err(DomainError::UnknownState(_))
        ));
    }

    #[test]
    fn test_serialization_uses_stored_names() {
        let json = serde_json::to_string(&OrderState::PackagePrepared).unwrap();
        assert_eq!(json, "\"package_prepared\"");
        let deserialized: OrderState = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, OrderState::PackagePrepared);
    }
}
