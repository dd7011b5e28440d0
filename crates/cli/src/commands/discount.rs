//! Discount code management from the command line.
//!
//! Goes through the same service layer as the admin listener, so validation
//! and error messages match.

use chrono::{DateTime, Utc};
use digital_storefront::services::admin::{self, DiscountCodeAdminError};
use digital_storefront_core::{CurrencyCode, DiscountKind, NewDiscountCode, ProductId};

use super::{CommandError, connect};

pub struct DiscountArgs {
    pub code: String,
    pub kind: DiscountKind,
    pub amount: i64,
    pub all_products: bool,
    pub products: Vec<String>,
    pub expires_at: Option<String>,
    pub limit: Option<i64>,
}

impl DiscountArgs {
    fn into_input(self) -> Result<NewDiscountCode, CommandError> {
        let expires_at = self
            .expires_at
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| CommandError::Invalid(format!("expires_at: {e}")))
            })
            .transpose()?;

        let product_ids = if self.products.is_empty() {
            None
        } else {
            Some(
                self.products
                    .iter()
                    .map(|raw| {
                        raw.parse::<ProductId>()
                            .map_err(|_| CommandError::Invalid(format!("product id: {raw}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            )
        };

        Ok(NewDiscountCode {
            code: self.code,
            kind: self.kind,
            amount: self.amount,
            all_products: self.all_products,
            product_ids,
            expires_at,
            limit: self.limit,
        })
    }
}

fn admin_error(err: DiscountCodeAdminError) -> CommandError {
    match err {
        DiscountCodeAdminError::Validation(fields) => CommandError::Invalid(fields.to_string()),
        DiscountCodeAdminError::Repository(e) => CommandError::Repository(e),
        other => CommandError::Invalid(other.to_string()),
    }
}

/// Validate and create a discount code.
pub async fn create(args: DiscountArgs) -> Result<(), CommandError> {
    let input = args.into_input()?;
    let store = connect().await?;

    let code = admin::create_discount_code(&store, input, Utc::now())
        .await
        .map_err(admin_error)?;

    tracing::info!(discount_code_id = %code.id, code = %code.code, "Discount code created");
    Ok(())
}

/// Log every discount code with its status.
pub async fn list() -> Result<(), CommandError> {
    let store = connect().await?;
    let currency = std::env::var("STRIPE_CURRENCY")
        .ok()
        .and_then(|raw| raw.parse::<CurrencyCode>().ok())
        .unwrap_or_default();
    let codes = admin::list_discount_codes(&store, currency, Utc::now())
        .await
        .map_err(admin_error)?;

    for code in codes {
        tracing::info!(
            code = %code.code,
            amount = %code.amount,
            status = ?code.status,
            uses = code.uses,
            limit = ?code.limit,
            orders = code.order_count,
            "Discount code"
        );
    }
    Ok(())
}
