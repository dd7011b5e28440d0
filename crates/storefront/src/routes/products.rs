//! Product listing.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::instrument;

use digital_storefront_core::{Cents, Product, ProductId};

use crate::error::Result;
use crate::state::AppState;

/// Public view of a product. Never exposes the stored file location.
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Cents,
    pub price_display: String,
    pub image_path: String,
    pub purchase_url: String,
}

impl ProductView {
    fn from_product(product: Product, state: &AppState) -> Self {
        Self {
            purchase_url: format!("/products/{}/purchase", product.id),
            price_display: product.price.display(state.config().payments.currency),
            id: product.id,
            name: product.name,
            description: product.description,
            price: product.price,
            image_path: product.image_path,
        }
    }
}

/// List products available for purchase.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<ProductView>>> {
    let products = state.storage().list_products(true).await?;
    Ok(Json(
        products
            .into_iter()
            .map(|p| ProductView::from_product(p, &state))
            .collect(),
    ))
}
