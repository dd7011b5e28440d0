//! Order management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::instrument;

use digital_storefront_core::OrderId;

use crate::error::Result;
use crate::services::admin::{self, OrderListing};
use crate::state::AppState;

#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<OrderListing>>> {
    let orders = admin::list_orders(state.storage(), state.config().payments.currency).await?;
    Ok(Json(orders))
}

#[instrument(skip(state))]
pub async fn delete(State(state): State<AppState>, Path(id): Path<OrderId>) -> Result<StatusCode> {
    admin::delete_order(state.storage(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
