//! Discount code management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::instrument;

use digital_storefront_core::{DiscountCode, DiscountCodeId, NewDiscountCode};

use crate::error::Result;
use crate::services::admin::{self, DiscountCodeListing};
use crate::state::AppState;

/// Every code with its computed status and order count.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<DiscountCodeListing>>> {
    let codes = admin::list_discount_codes(
        state.storage(),
        state.config().payments.currency,
        Utc::now(),
    )
    .await?;
    Ok(Json(codes))
}

#[instrument(skip(state, input))]
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewDiscountCode>,
) -> Result<(StatusCode, Json<DiscountCode>)> {
    let code = admin::create_discount_code(state.storage(), input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(code)))
}

#[instrument(skip(state))]
pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<DiscountCodeId>,
) -> Result<StatusCode> {
    admin::set_discount_code_active(state.storage(), id, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<DiscountCodeId>,
) -> Result<StatusCode> {
    admin::set_discount_code_active(state.storage(), id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Only codes no order has used can be deleted.
#[instrument(skip(state))]
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<DiscountCodeId>,
) -> Result<StatusCode> {
    admin::delete_discount_code(state.storage(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
