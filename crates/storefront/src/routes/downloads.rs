//! Download link redemption.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};

use digital_storefront_core::TokenError;

use crate::error::{AppError, Result};
use crate::services::downloads::{self, DownloadError};
use crate::state::AppState;

/// Stream the product file for a valid token, or redirect to the expired
/// page.
#[instrument(skip(state))]
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let grant = downloads::validate(state.storage(), &token, Utc::now()).await?;

    let path = state.config().storage_root.join(&grant.file_path);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!(path = %path.display(), "Product file missing from storage");
            return Err(DownloadError::Token(TokenError::NotFound).into());
        }
        Err(e) => return Err(AppError::Internal(format!("reading product file: {e}"))),
    };

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        grant.filename
    ))
    .map_err(|e| AppError::Internal(format!("content disposition: {e}")))?;

    info!(product_id = %grant.product_id, bytes = bytes.len(), "Download served");

    Ok((
        [
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(bytes.len())),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from(bytes),
    )
        .into_response())
}

/// Where unknown and expired links land.
pub async fn expired() -> impl IntoResponse {
    Json(json!({
        "error": TokenError::Expired.user_message(),
        "orders_url": "/orders",
    }))
}
