//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

/// Money amount in minor currency units (e.g. cents).
///
/// Never negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a new Money amount from minor units.
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> u64 {
        self.0
    }

    /// Adds two amounts, or `None` on overflow.
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}


/// A line of an order.
///
/// Quantity is signed so that malformed submissions survive receipt and are
/// rejected by the validate step rather than by deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Stock keeping unit.
    #[serde(default)]
    pub sku: String,

    /// Quantity ordered.
    pub qty: i64,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(sku: impl Into<String>, qty: i64) -> Self {
        Self {
            sku: sku.into(),
            qty,
        }
    }
}

/// Shipping address, kept as the opaque JSON document the caller sent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(serde_json::Value);

impl Address {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}

/// What a caller submits to start a fulfillment pipeline.
///
/// Carries no identifier: the engine assigns the order ID on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderSubmission {
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub address: Address,
}

impl OrderSubmission {
    pub fn new(items: Vec<OrderItem>, address: Address) -> Self {
        Self { items, address }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::zero().to_string(), "$0.00");
    }

    #[test]
    fn test_money_add() {
        let total = Money::from_cents(150)
            .checked_add(Money::from_cents(250))
            .unwrap();
        assert_eq!(total.cents(), 400);
        assert!(!total.is_zero());
        assert_eq!(Money::from_cents(u64::MAX).checked_add(Money::from_cents(1)), None);
    }

    #[test]
    fn test_submission_keeps_malformed_items() {
        let json = serde_json::json!({
            "items": [{"qty": -2}, {"sku": "ABC", "qty": 1}],
            "address": {"line1": "1 Main St", "zip": "12345"}
        });
        let submission: OrderSubmission = serde_json::from_value(json).unwrap();
        assert_eq!(submission.items[0], OrderItem::new("", -2));
        assert_eq!(submission.items[1], OrderItem::new("ABC", 1));
        assert_eq!(submission.address.as_json()["zip"], "12345");
    }

    #[test]
    fn test_submission_defaults_to_empty() {
        let submission: OrderSubmission = serde_json::from_str("{}").unwrap();
        assert!(submission.items.is_empty());
        assert_eq!(submission.address.as_json(), &serde_json::Value::Null);
    }
}
