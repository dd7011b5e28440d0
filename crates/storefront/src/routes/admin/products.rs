//! Product management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;

use digital_storefront_core::{NewProduct, Product, ProductId};

use crate::error::Result;
use crate::services::admin;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityForm {
    pub available: bool,
}

/// Every product, including unavailable ones and their storage paths.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(admin::list_products(state.storage()).await?))
}

/// Register a product whose file was already placed in product storage.
#[instrument(skip(state, input))]
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = admin::create_product(
        state.storage(),
        &state.config().storage_root,
        input,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state, input))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    Json(input): Json<NewProduct>,
) -> Result<Json<Product>> {
    let product =
        admin::update_product(state.storage(), &state.config().storage_root, id, input).await?;
    Ok(Json(product))
}

#[instrument(skip(state))]
pub async fn set_availability(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    Json(form): Json<AvailabilityForm>,
) -> Result<StatusCode> {
    admin::set_product_available(state.storage(), id, form.available).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<StatusCode> {
    admin::delete_product(state.storage(), &state.config().storage_root, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
