//! Payment processor webhooks.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::error::Result;
use crate::payments::webhook::{self, CHARGE_SUCCEEDED, SIGNATURE_HEADER, WebhookError};
use crate::services::fulfillment::{self, FulfillmentContext, FulfillmentOutcome};
use crate::state::AppState;

/// Authenticate a delivery and fulfill `charge.succeeded` events.
///
/// Other event types are acknowledged and ignored.
#[instrument(skip(state, headers, body), fields(event_id))]
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MissingSignature)?;

    let config = state.config();
    let now = Utc::now();
    webhook::verify_signature(
        config.payments.webhook_secret.expose_secret(),
        signature,
        &body,
        now.timestamp(),
    )?;

    let event = webhook::parse_event(&body)?;
    tracing::Span::current().record("event_id", event.id.as_str());

    if event.kind != CHARGE_SUCCEEDED {
        info!(event_type = %event.kind, "Ignoring webhook event");
        return Ok((StatusCode::OK, Json(json!({ "received": true }))));
    }

    let charge = event.charge_succeeded()?;
    let outcome = fulfillment::fulfill_charge(
        state.storage(),
        state.mailer(),
        FulfillmentContext {
            base_url: &config.base_url,
            currency: config.payments.currency,
        },
        &charge,
        now,
    )
    .await?;

    let body = match outcome {
        FulfillmentOutcome::AlreadyProcessed => json!({ "received": true, "duplicate": true }),
        FulfillmentOutcome::Fulfilled {
            order_id,
            discount_over_limit,
            discount_missing,
            receipt_sent,
            ..
        } => json!({
            "received": true,
            "order_id": order_id,
            "discount_over_limit": discount_over_limit.is_some(),
            "discount_missing": discount_missing.is_some(),
            "receipt_sent": receipt_sent,
        }),
    };

    Ok((StatusCode::OK, Json(body)))
}
