//! Payment records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::order::{Money, PaymentReceipt};

/// Lifecycle of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Charged,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Charged => "charged",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "charged" => Ok(PaymentStatus::Charged),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::UnknownPaymentStatus(other.to_string())),
        }
    }
}

/// A payment against an order.
///
/// References the order, does not own it. At most one payment per order
/// may reach `Charged`; stores enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub status: PaymentStatus,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The charged payment recorded alongside a `payment_charged` event.
    pub fn charged(order_id: OrderId, receipt: &PaymentReceipt) -> Self {
        Self {
            id: receipt.payment_id,
            order_id,
            status: PaymentStatus::Charged,
            amount: receipt.amount,
            created_at: receipt.charged_at,
            updated_at: receipt.charged_at,
        }
    }

    pub fn is_charged(&self) -> bool {
        self.status == PaymentStatus::Charged
    }
}
