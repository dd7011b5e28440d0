//! Order history requests.

use axum::{Json, extract::State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::services::order_history::{self, SENT_MESSAGE};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderHistoryForm {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct OrderHistoryResponse {
    pub message: &'static str,
}

/// Email fresh download links for every order of an address.
///
/// The response is identical whether or not the address has orders.
#[instrument(skip(state, form))]
pub async fn history(
    State(state): State<AppState>,
    Json(form): Json<OrderHistoryForm>,
) -> Result<Json<OrderHistoryResponse>> {
    let config = state.config();
    order_history::send_order_history(
        state.storage(),
        state.mailer(),
        &config.base_url,
        config.payments.currency,
        &form.email,
        Utc::now(),
    )
    .await?;

    Ok(Json(OrderHistoryResponse {
        message: SENT_MESSAGE,
    }))
}
