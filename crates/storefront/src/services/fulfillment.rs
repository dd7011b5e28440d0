//! Turning settled charges into orders.
//!
//! Fulfillment is driven only by verified `charge.succeeded` webhooks, which
//! the processor delivers at least once. The storage write is a single
//! transaction keyed by the event id; the receipt email is sent after it
//! commits and a send failure never undoes the order.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use digital_storefront_core::{
    ChargeSucceeded, CurrencyCode, DiscountCodeId, DownloadVerificationId, OrderId, Product,
};

use crate::db::{ChargeRecord, FulfilledOrder, RepositoryError, Storage};
use crate::services::downloads::download_url;
use crate::services::email::{Mailer, ReceiptEmail};

/// Errors that can occur while fulfilling a charge.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The charge references a product that does not exist.
    #[error("product not found")]
    ProductNotFound,

    /// The purchaser already owns the product; no second order was created.
    #[error("product already purchased")]
    AlreadyPurchased,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What fulfilling a charge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// The event was already fulfilled by an earlier delivery.
    AlreadyProcessed,
    /// A new order was recorded.
    Fulfilled {
        order_id: OrderId,
        download_id: DownloadVerificationId,
        /// The discount code was already at its limit; the order stands but
        /// needs reconciliation.
        discount_over_limit: Option<DiscountCodeId>,
        /// The discount code was deleted before the charge settled; the
        /// order was stored without it and needs reconciliation.
        discount_missing: Option<DiscountCodeId>,
        receipt_sent: bool,
    },
}

/// Settings the fulfillment flow needs from configuration.
#[derive(Debug, Clone, Copy)]
pub struct FulfillmentContext<'a> {
    pub base_url: &'a str,
    pub currency: CurrencyCode,
}

/// Record a settled charge and send the receipt.
///
/// # Errors
///
/// - `FulfillmentError::ProductNotFound` if the product is unknown
/// - `FulfillmentError::AlreadyPurchased` if the purchaser already owns it
/// - `FulfillmentError::Repository` if storage fails
#[instrument(
    skip(storage, mailer, ctx, charge),
    fields(event_id = %charge.event_id, product_id = %charge.product_id)
)]
pub async fn fulfill_charge(
    storage: &dyn Storage,
    mailer: &dyn Mailer,
    ctx: FulfillmentContext<'_>,
    charge: &ChargeSucceeded,
    now: DateTime<Utc>,
) -> Result<FulfillmentOutcome, FulfillmentError> {
    let product = storage
        .get_product(charge.product_id)
        .await?
        .ok_or(FulfillmentError::ProductNotFound)?;

    let fulfilled = match storage.record_charge(charge, now).await? {
        ChargeRecord::Duplicate => {
            info!("Webhook event already processed");
            return Ok(FulfillmentOutcome::AlreadyProcessed);
        }
        ChargeRecord::AlreadyPurchased { user } => {
            warn!(user_id = %user.id, "Charge for a product the purchaser already owns");
            return Err(FulfillmentError::AlreadyPurchased);
        }
        ChargeRecord::Recorded(fulfilled) => fulfilled,
    };

    let discount_over_limit = if fulfilled.discount_over_limit {
        warn!(
            order_id = %fulfilled.order.id,
            discount_code_id = ?charge.discount_code_id,
            "Discount code used past its limit; usage counter not incremented"
        );
        charge.discount_code_id
    } else {
        None
    };

    let discount_missing = if fulfilled.discount_missing {
        warn!(
            order_id = %fulfilled.order.id,
            discount_code_id = ?charge.discount_code_id,
            "Discount code deleted before the charge settled; order stored without it"
        );
        charge.discount_code_id
    } else {
        None
    };

    let receipt = receipt_for(&fulfilled, &product, ctx);
    let receipt_sent = match mailer.send_purchase_receipt(&fulfilled.user.email, &receipt).await {
        Ok(()) => true,
        Err(e) => {
            warn!(order_id = %fulfilled.order.id, error = %e, "Failed to send purchase receipt");
            false
        }
    };

    info!(
        order_id = %fulfilled.order.id,
        price_paid = fulfilled.order.price_paid.as_i64(),
        "Order fulfilled"
    );

    Ok(FulfillmentOutcome::Fulfilled {
        order_id: fulfilled.order.id,
        download_id: fulfilled.download.id,
        discount_over_limit,
        discount_missing,
        receipt_sent,
    })
}

fn receipt_for(
    fulfilled: &FulfilledOrder,
    product: &Product,
    ctx: FulfillmentContext<'_>,
) -> ReceiptEmail {
    ReceiptEmail {
        order_id: fulfilled.order.id.to_string(),
        product_name: product.name.clone(),
        product_description: product.description.clone(),
        price_paid: fulfilled.order.price_paid.display(ctx.currency),
        purchased_on: fulfilled.order.created_at.format("%b %-d, %Y").to_string(),
        download_url: download_url(ctx.base_url, fulfilled.download.id),
    }
}
