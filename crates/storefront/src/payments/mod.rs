//! Payment processor integration.
//!
//! # Architecture
//!
//! - [`PaymentProcessor`] is the seam handlers depend on
//! - [`StripeClient`] talks to a Stripe-compatible REST API with `reqwest`
//! - [`webhook`] authenticates and decodes processor notifications
//!
//! Orders are never created from the browser flow. The only input that
//! fulfills a purchase is a verified `charge.succeeded` webhook.

mod stripe;
pub mod webhook;

pub use stripe::StripeClient;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use digital_storefront_core::{Cents, CurrencyCode, DiscountCodeId, Email, ProductId};

/// Metadata key carrying the purchased product id.
pub const METADATA_PRODUCT_ID: &str = "productId";
/// Metadata key carrying the applied discount code id.
pub const METADATA_DISCOUNT_CODE_ID: &str = "discountCodeId";

/// Errors that can occur when talking to the payment processor.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The processor rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The response was well-formed but missing data we rely on.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

/// What to charge for a single product purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    pub amount: Cents,
    pub currency: CurrencyCode,
    pub product_id: ProductId,
    pub discount_code_id: Option<DiscountCodeId>,
    pub receipt_email: Email,
}

/// A payment intent as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    /// Handed to the browser to confirm the payment. Absent on some reads.
    pub client_secret: Option<String>,
    pub amount: Cents,
    pub status: PaymentIntentStatus,
    pub product_id: ProductId,
    pub discount_code_id: Option<DiscountCodeId>,
}

/// A payment processor able to create and look up payment intents.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a payment intent tagged with the product and discount code.
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Fetch a payment intent by id.
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError>;
}

/// Read the product and discount code ids back out of processor metadata.
///
/// A blank discount code id is treated as absent.
pub(crate) fn ids_from_metadata(
    metadata: &HashMap<String, String>,
) -> Result<(ProductId, Option<DiscountCodeId>), String> {
    let product_id = metadata
        .get(METADATA_PRODUCT_ID)
        .ok_or_else(|| format!("missing {METADATA_PRODUCT_ID} metadata"))?
        .parse::<ProductId>()
        .map_err(|e| format!("invalid {METADATA_PRODUCT_ID} metadata: {e}"))?;

    let discount_code_id = metadata
        .get(METADATA_DISCOUNT_CODE_ID)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::parse::<DiscountCodeId>)
        .transpose()
        .map_err(|e| format!("invalid {METADATA_DISCOUNT_CODE_ID} metadata: {e}"))?;

    Ok((product_id, discount_code_id))
}
