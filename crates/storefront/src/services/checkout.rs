//! Pricing and pre-payment checks.
//!
//! Both guards (coupon eligibility and duplicate purchase) run on freshly
//! read state immediately before the payment intent is created. A coupon
//! that stopped being usable is an error, never a silent full-price charge.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use digital_storefront_core::{
    Cents, CurrencyCode, DiscountCode, DiscountCodeId, Email, Product, ProductId,
};

use crate::db::{RepositoryError, Storage};
use crate::payments::{PaymentError, PaymentIntentRequest, PaymentProcessor};

/// Errors that can occur while pricing or starting a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The product does not exist or is not for sale.
    #[error("product not found")]
    ProductNotFound,

    /// The purchaser already owns this product.
    #[error("product already purchased")]
    AlreadyPurchased,

    /// The supplied coupon is unknown or no longer usable for this product.
    #[error("coupon expired")]
    CouponExpired,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The processor created an intent without a client secret.
    #[error("payment intent has no client secret")]
    MissingClientSecret,
}

/// A coupon that was accepted for a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedDiscount {
    pub id: DiscountCodeId,
    pub code: String,
    /// e.g. `20%` or `$15`
    pub display: String,
}

/// Price of a product, with any applicable discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub product_id: ProductId,
    pub name: String,
    pub price: Cents,
    pub price_display: String,
    /// Amount that would be charged.
    pub amount: Cents,
    pub amount_display: String,
    pub discount: Option<AppliedDiscount>,
    /// A coupon was supplied but cannot be applied.
    pub coupon_rejected: bool,
}

/// Input for starting a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub product_id: ProductId,
    pub email: Email,
    pub coupon: Option<String>,
}

/// A created payment intent ready for the browser to confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount: Cents,
    pub amount_display: String,
    pub discount: Option<AppliedDiscount>,
}

/// Load a product that can be bought.
async fn purchasable_product(
    storage: &dyn Storage,
    product_id: ProductId,
) -> Result<Product, CheckoutError> {
    storage
        .get_product(product_id)
        .await?
        .filter(|p| p.available)
        .ok_or(CheckoutError::ProductNotFound)
}

/// Outcome of looking up a supplied coupon string.
enum CouponLookup {
    NotSupplied,
    Usable(DiscountCode),
    Rejected,
}

/// Look up a coupon string and keep it only if usable for `product_id`.
///
/// Blank input counts as no coupon.
async fn lookup_coupon(
    storage: &dyn Storage,
    coupon: Option<&str>,
    product_id: ProductId,
    now: DateTime<Utc>,
) -> Result<CouponLookup, RepositoryError> {
    let Some(code) = coupon.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(CouponLookup::NotSupplied);
    };

    Ok(match storage.find_discount_code(code).await? {
        Some(discount) if discount.is_usable(product_id, now) => CouponLookup::Usable(discount),
        _ => CouponLookup::Rejected,
    })
}

fn applied(discount: &DiscountCode, currency: CurrencyCode) -> AppliedDiscount {
    AppliedDiscount {
        id: discount.id,
        code: discount.code.clone(),
        display: discount.display_amount(currency),
    }
}

/// Price a product, optionally with a coupon, without touching the processor.
///
/// # Errors
///
/// Returns `CheckoutError::ProductNotFound` if the product is missing or
/// unavailable.
#[instrument(skip(storage), fields(product_id = %product_id))]
pub async fn quote(
    storage: &dyn Storage,
    product_id: ProductId,
    coupon: Option<&str>,
    currency: CurrencyCode,
    now: DateTime<Utc>,
) -> Result<PriceQuote, CheckoutError> {
    let product = purchasable_product(storage, product_id).await?;

    let (discount, coupon_rejected) = match lookup_coupon(storage, coupon, product_id, now).await? {
        CouponLookup::NotSupplied => (None, false),
        CouponLookup::Usable(code) => (Some(code), false),
        CouponLookup::Rejected => (None, true),
    };

    let amount = discount
        .as_ref()
        .map_or(product.price, |d| d.discounted_amount(product.price));

    Ok(PriceQuote {
        product_id,
        price_display: product.price.display(currency),
        price: product.price,
        amount_display: amount.display(currency),
        amount,
        discount: discount.as_ref().map(|d| applied(d, currency)),
        coupon_rejected,
        name: product.name,
    })
}

/// Run both pre-payment guards and create the payment intent.
///
/// # Errors
///
/// - `CheckoutError::ProductNotFound` if the product is missing or unavailable
/// - `CheckoutError::AlreadyPurchased` if the email already owns the product
/// - `CheckoutError::CouponExpired` if a supplied coupon is not usable
/// - `CheckoutError::Payment` if the processor call fails
#[instrument(skip(storage, payments, request), fields(product_id = %request.product_id))]
pub async fn start_checkout(
    storage: &dyn Storage,
    payments: &dyn PaymentProcessor,
    request: CheckoutRequest,
    currency: CurrencyCode,
    now: DateTime<Utc>,
) -> Result<CheckoutSession, CheckoutError> {
    let product = purchasable_product(storage, request.product_id).await?;

    if storage
        .has_purchased(&request.email, request.product_id)
        .await?
    {
        return Err(CheckoutError::AlreadyPurchased);
    }

    let discount = match lookup_coupon(storage, request.coupon.as_deref(), product.id, now).await? {
        CouponLookup::NotSupplied => None,
        CouponLookup::Usable(code) => Some(code),
        CouponLookup::Rejected => return Err(CheckoutError::CouponExpired),
    };

    let amount = discount
        .as_ref()
        .map_or(product.price, |d| d.discounted_amount(product.price));

    let intent = payments
        .create_payment_intent(&PaymentIntentRequest {
            amount,
            currency,
            product_id: product.id,
            discount_code_id: discount.as_ref().map(|d| d.id),
            receipt_email: request.email,
        })
        .await?;

    let client_secret = intent
        .client_secret
        .ok_or(CheckoutError::MissingClientSecret)?;

    info!(
        payment_intent = %intent.id,
        amount = amount.as_i64(),
        discounted = discount.is_some(),
        "Checkout started"
    );

    Ok(CheckoutSession {
        payment_intent_id: intent.id,
        client_secret,
        amount,
        amount_display: amount.display(currency),
        discount: discount.as_ref().map(|d| applied(d, currency)),
    })
}
