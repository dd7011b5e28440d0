//! Purchase page pricing, checkout start and the post-payment landing page.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use digital_storefront_core::{Email, FieldErrors, ProductId};

use crate::error::{AppError, Result, add_breadcrumb};
use crate::payments::PaymentIntentStatus;
use crate::services::checkout::{self, CheckoutRequest, CheckoutSession, PriceQuote};
use crate::services::downloads::{self, download_url};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub coupon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutForm {
    pub email: String,
    #[serde(default)]
    pub coupon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseSuccessQuery {
    pub payment_intent: String,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResult {
    pub success: bool,
    pub product_id: ProductId,
    pub product_name: String,
    pub price_display: String,
    /// Present when the payment succeeded.
    pub download_url: Option<String>,
    /// Present when the payment did not succeed.
    pub retry_url: Option<String>,
}

fn parse_product_id(raw: &str) -> Result<ProductId> {
    raw.parse()
        .map_err(|_| AppError::NotFound("product".to_owned()))
}

/// Price a product, applying `?coupon=` when it is usable.
#[instrument(skip(state))]
pub async fn quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<PriceQuote>> {
    let product_id = parse_product_id(&id)?;
    let quote = checkout::quote(
        state.storage(),
        product_id,
        query.coupon.as_deref(),
        state.config().payments.currency,
        Utc::now(),
    )
    .await?;
    Ok(Json(quote))
}

/// Validate the purchase and create a payment intent.
#[instrument(skip(state, form))]
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<CheckoutForm>,
) -> Result<Json<CheckoutSession>> {
    let product_id = parse_product_id(&id)?;
    let email = Email::parse(&form.email).map_err(|_| {
        AppError::Validation(FieldErrors::single("email", "Invalid email address"))
    })?;

    add_breadcrumb(
        "checkout",
        "Checkout requested",
        Some(&[("product_id", &product_id.to_string())]),
    );

    let session = checkout::start_checkout(
        state.storage(),
        state.payments(),
        CheckoutRequest {
            product_id,
            email,
            coupon: form.coupon,
        },
        state.config().payments.currency,
        Utc::now(),
    )
    .await?;
    Ok(Json(session))
}

/// Landing page after the processor redirects the buyer back.
///
/// Issues a download link straight away when the payment succeeded; the
/// order itself is recorded by the webhook.
#[instrument(skip(state))]
pub async fn purchase_success(
    State(state): State<AppState>,
    Query(query): Query<PurchaseSuccessQuery>,
) -> Result<Json<PurchaseResult>> {
    let intent = state
        .payments()
        .retrieve_payment_intent(&query.payment_intent)
        .await?;

    let product = state
        .storage()
        .get_product(intent.product_id)
        .await?
        .ok_or_else(|| AppError::NotFound("product".to_owned()))?;

    let success = intent.status == PaymentIntentStatus::Succeeded;
    let download_url = if success {
        let token = downloads::issue(state.storage(), product.id, Utc::now()).await?;
        Some(download_url(&state.config().base_url, token.id))
    } else {
        None
    };

    Ok(Json(PurchaseResult {
        success,
        product_id: product.id,
        price_display: product.price.display(state.config().payments.currency),
        retry_url: (!success).then(|| format!("/products/{}/purchase", product.id)),
        download_url,
        product_name: product.name,
    }))
}
