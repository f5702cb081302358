//! Order record and its transition rules.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

use super::{Address, OrderItem, OrderState, OrderSubmission, RejectionReason, ValidationOutcome};

/// An order moving through the fulfillment pipeline.
///
/// The state only moves forward along the edges `OrderState` allows, and
/// only through [`Order::apply_transition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    state: OrderState,
    items: Vec<OrderItem>,
    address: Address,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates the record the receive step persists.
    pub fn receive(id: OrderId, submission: OrderSubmission, at: DateTime<Utc>) -> Self {
        Self {
            id,
            state: OrderState::Received,
            items: submission.items,
            address: submission.address,
            created_at: at,
            updated_at: at,
        }
    }

    /// Rebuilds an order from stored columns.
    pub fn rehydrate(
        id: OrderId,
        state: OrderState,
        items: Vec<OrderItem>,
        address: Address,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state,
            items,
            address,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Sum of all item quantities, ignoring non-positive lines.
    ///
    /// `None` when the sum does not fit a stored payment amount (`i64`).
    pub fn total_quantity(&self) -> Option<u64> {
        self.items
            .iter()
            .try_fold(0_i64, |total, item| total.checked_add(item.qty.max(0)))
            .and_then(|total| u64::try_from(total).ok())
    }

    /// Checks the order's structure.
    ///
    /// A structurally invalid order is reported as `Rejected`, never as an
    /// error: retrying cannot fix it.
    pub fn validate(&self) -> ValidationOutcome {
        if self.items.is_empty() {
            return ValidationOutcome::Rejected {
                reason: RejectionReason::NoItems,
            };
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.sku.trim().is_empty() {
                return ValidationOutcome::Rejected {
                    reason: RejectionReason::MissingSku { index },
                };
            }
            if item.qty <= 0 {
                return ValidationOutcome::Rejected {
                    reason: RejectionReason::NonPositiveQuantity {
                        index,
                        qty: item.qty,
                    },
                };
            }
        }

        if self.total_quantity().is_none() {
            return ValidationOutcome::Rejected {
                reason: RejectionReason::TotalQuantityTooLarge,
            };
        }

        ValidationOutcome::Accepted
    }

    /// Moves the order from `from` to `to`.
    ///
    /// Fails if the order is not currently in `from` or the edge is not part
    /// of the state machine. `updated_at` never moves backwards.
    pub fn apply_transition(
        &mut self,
        from: OrderState,
        to: OrderState,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.state != from {
            return Err(DomainError::StateMismatch {
                expected: from,
                actual: self.state,
            });
        }
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidTransition { from, to });
        }

        self.state = to;
        self.updated_at = self.updated_at.max(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn order_with(items: Vec<OrderItem>) -> Order {
        Order::receive(
            OrderId::new(),
            OrderSubmission::new(items, Address::default()),
            Utc::now(),
        )
    }

    #[test]
    fn test_receive_starts_in_received() {
        let order = order_with(vec![OrderItem::new("ABC", 1)]);
        assert_eq!(order.state(), OrderState::Received);
        assert_eq!(order.created_at(), order.updated_at());
        assert!(!order.is_terminal());
    }

    #[test]
    fn test_validate_accepts_well_formed_order() {
        let order = order_with(vec![OrderItem::new("ABC", 1), OrderItem::new("XYZ", 3)]);
        assert_eq!(order.validate(), ValidationOutcome::Accepted);
        assert_eq!(order.total_quantity(), Some(4));
    }

    #[test]
    fn test_validate_rejects_total_that_overflows() {
        let order = order_with(vec![
            OrderItem::new("ABC", i64::MAX),
            OrderItem::new("DEF", i64::MAX),
            OrderItem::new("XYZ", i64::MAX),
        ]);
        assert_eq!(order.total_quantity(), None);
        assert_eq!(
            order.validate(),
            ValidationOutcome::Rejected {
                reason: RejectionReason::TotalQuantityTooLarge
            }
        );

        let largest = order_with(vec![OrderItem::new("ABC", i64::MAX)]);
        assert_eq!(largest.total_quantity(), Some(i64::MAX as u64));
        assert_eq!(largest.validate(), ValidationOutcome::Accepted);
    }

    #[test]
    fn test_validate_rejects_empty_items() {
        let order = order_with(vec![]);
        assert_eq!(
            order.validate(),
            ValidationOutcome::Rejected {
                reason: RejectionReason::NoItems
            }
        );
    }

    #[test]
    fn test_validate_rejects_missing_sku() {
        let order = order_with(vec![OrderItem::new("ABC", 1), OrderItem::new("  ", 2)]);
        assert_eq!(
            order.validate(),
            ValidationOutcome::Rejected {
                reason: RejectionReason::MissingSku { index: 1 }
            }
        );
    }

    #[test]
    fn test_validate_rejects_non_positive_quantity() {
        for qty in [0, -1] {
            let order = order_with(vec![OrderItem::new("ABC", qty)]);
            assert_eq!(
                order.validate(),
                ValidationOutcome::Rejected {
                    reason: RejectionReason::NonPositiveQuantity { index: 0, qty }
                }
            );
        }
    }

    #[test]
    fn test_apply_transition_advances_one_edge() {
        let mut order = order_with(vec![OrderItem::new("ABC", 1)]);
        let later = order.updated_at() + Duration::seconds(5);

        order
            .apply_transition(OrderState::Received, OrderState::Validated, later)
            .unwrap();

        assert_eq!(order.state(), OrderState::Validated);
        assert_eq!(order.updated_at(), later);
    }

    #[test]
    fn test_apply_transition_refuses_wrong_source_state() {
        let mut order = order_with(vec![OrderItem::new("ABC", 1)]);
        let result =
            order.apply_transition(OrderState::Validated, OrderState::PaymentCharged, Utc::now());
        assert!(matches!(
            result,
            Err(DomainError::StateMismatch {
                expected: OrderState::Validated,
                actual: OrderState::Received
            })
        ));
        assert_eq!(order.state(), OrderState::Received);
    }

    #[test]
    fn test_apply_transition_refuses_skipping() {
        let mut order = order_with(vec![OrderItem::new("ABC", 1)]);
        let result =
            order.apply_transition(OrderState::Received, OrderState::PaymentCharged, Utc::now());
        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
    }

    #[test]
    fn test_updated_at_is_monotonic() {
        let mut order = order_with(vec![OrderItem::new("ABC", 1)]);
        let original = order.updated_at();
        let earlier = original - Duration::seconds(30);

        order
            .apply_transition(OrderState::Received, OrderState::Validated, earlier)
            .unwrap();

        assert_eq!(order.updated_at(), original);
    }
}
