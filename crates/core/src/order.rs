//! Orders, purchasers and payment confirmations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Cents, DiscountCodeId, Email, OrderId, ProductId, UserId};

/// A purchaser, identified by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub created_at: DateTime<Utc>,
}

/// A completed purchase of one product.
///
/// At most one order exists per (purchaser, product).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    /// Amount actually charged, after any discount.
    pub price_paid: Cents,
    pub discount_code_id: Option<DiscountCodeId>,
    pub created_at: DateTime<Utc>,
}

/// A settled charge reported by the payment processor.
///
/// This is the only input that creates orders, consumes discount uses and
/// mints purchase download tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSucceeded {
    /// The processor's event identifier; redeliveries carry the same value.
    pub event_id: String,
    pub product_id: ProductId,
    pub discount_code_id: Option<DiscountCodeId>,
    pub payer_email: Email,
    pub amount_charged: Cents,
}
