//! Purchaser management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::instrument;

use digital_storefront_core::UserId;

use crate::error::Result;
use crate::services::admin::{self, UserListing};
use crate::state::AppState;

#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<UserListing>>> {
    let users = admin::list_users(state.storage(), state.config().payments.currency).await?;
    Ok(Json(users))
}

/// Removes the purchaser together with their orders.
#[instrument(skip(state))]
pub async fn delete(State(state): State<AppState>, Path(id): Path<UserId>) -> Result<StatusCode> {
    admin::delete_user(state.storage(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
