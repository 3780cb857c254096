//! Status enums for checkout, payments, orders and purchases.

use serde::{Deserialize, Serialize};

/// The step a shopper's checkout is on.
///
/// Forward path is `Cart -> Address -> Payment -> Success`. Only
/// `Address -> Cart` and `Payment -> Address` go backwards, and `Success` is
/// left only by closing the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    #[default]
    Cart,
    Address,
    Payment,
    Success,
}

impl CheckoutStep {
    /// The step reached by going back, if going back is allowed.
    #[must_use]
    pub const fn previous(self) -> Option<Self> {
        match self {
            Self::Address => Some(Self::Cart),
            Self::Payment => Some(Self::Address),
            Self::Cart | Self::Success => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cart => "cart",
            Self::Address => "address",
            Self::Payment => "payment",
            Self::Success => "success",
        }
    }
}

impl std::fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckoutStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cart" => Ok(Self::Cart),
            "address" => Ok(Self::Address),
            "payment" => Ok(Self::Payment),
            "success" => Ok(Self::Success),
            _ => Err(format!("invalid checkout step: {s}")),
        }
    }
}

/// Payment status as reported by the payment processor.
///
/// Unrecognised values deserialize to `Other` and are treated as pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Approved,
    Authorized,
    Pending,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    #[serde(other)]
    Other,
}

impl PaymentStatus {
    /// Whether the processor declined or voided the payment.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Paid,
    Refunded,
}

/// Per-verse purchase status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "purchase_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    #[default]
    Pending,
    Completed,
}
