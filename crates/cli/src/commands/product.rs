//! Product registration.
//!
//! The file itself is copied into product storage out of band; this only
//! records where it lives.

use chrono::Utc;
use digital_storefront::db::ProductStore;
use digital_storefront_core::{NewProduct, ProductId};

use super::{CommandError, connect};

pub struct ProductArgs {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub file_path: String,
    pub image_path: String,
    pub available: bool,
}

/// Register a product and return its id. Validation matches the admin
/// listener; `available` publishes it straight away.
pub async fn add(args: ProductArgs) -> Result<ProductId, CommandError> {
    let draft = NewProduct {
        name: args.name,
        description: args.description,
        price_in_cents: args.price,
        file_path: args.file_path,
        image_path: args.image_path,
    }
    .validate()
    .map_err(|errors| CommandError::Invalid(errors.to_string()))?;

    let mut product = draft.into_product(Utc::now());
    product.available = args.available;

    let store = connect().await?;
    store.insert_product(&product).await?;

    tracing::info!(product_id = %product.id, name = %product.name, "Product added");
    Ok(product.id)
}
