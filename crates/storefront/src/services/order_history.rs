//! Emailing a purchaser fresh links for everything they bought.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use digital_storefront_core::{CurrencyCode, Email, FieldErrors};

use crate::db::{RepositoryError, Storage};
use crate::services::downloads::{self, download_url};
use crate::services::email::{EmailError, HistoryItem, Mailer};

/// Shown after every accepted request, whether or not the address has orders.
pub const SENT_MESSAGE: &str =
    "Check your email to view your order history and download your products.";

/// Errors that can occur while sending order history.
#[derive(Debug, Error)]
pub enum OrderHistoryError {
    #[error("invalid input: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Email(#[from] EmailError),
}

/// Mint a token per order of `raw_email` and mail the links.
///
/// Addresses without a purchase history get no email but the caller sees
/// the same success as everyone else.
///
/// Returns the number of links sent.
///
/// # Errors
///
/// Returns `OrderHistoryError::Validation` for a malformed address and
/// `OrderHistoryError::Email` when the send fails.
#[instrument(skip(storage, mailer, raw_email))]
pub async fn send_order_history(
    storage: &dyn Storage,
    mailer: &dyn Mailer,
    base_url: &str,
    currency: CurrencyCode,
    raw_email: &str,
    now: DateTime<Utc>,
) -> Result<usize, OrderHistoryError> {
    let email = Email::parse(raw_email).map_err(|_| {
        OrderHistoryError::Validation(FieldErrors::single("email", "Invalid email address"))
    })?;

    let purchases = storage.orders_for_email(&email).await?;
    if purchases.is_empty() {
        info!(email_domain = %email.domain(), "Order history requested for address without orders");
        return Ok(0);
    }

    // Links must exist before they are mailed. If the send fails the tokens
    // were never disclosed and lapse with the download window.
    let mut items = Vec::with_capacity(purchases.len());
    for purchase in &purchases {
        let token = downloads::issue(storage, purchase.product.id, now).await?;
        items.push(HistoryItem {
            order_id: purchase.order.id.to_string(),
            product_name: purchase.product.name.clone(),
            price_paid: purchase.order.price_paid.display(currency),
            purchased_on: purchase.order.created_at.format("%b %-d, %Y").to_string(),
            download_url: download_url(base_url, token.id),
        });
    }

    mailer.send_order_history(&email, &items).await?;
    info!(orders = items.len(), "Order history sent");
    Ok(items.len())
}
