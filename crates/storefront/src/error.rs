//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-side errors to
//! Sentry before responding to the client. All route handlers return
//! `Result<T, AppError>`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use thiserror::Error;

use digital_storefront_core::FieldErrors;

use crate::db::RepositoryError;
use crate::payments::PaymentError;
use crate::payments::webhook::WebhookError;
use crate::services::admin::{
    DiscountCodeAdminError, OrderAdminError, ProductAdminError, UserAdminError,
};
use crate::services::checkout::CheckoutError;
use crate::services::downloads::DownloadError;
use crate::services::fulfillment::FulfillmentError;
use crate::services::order_history::OrderHistoryError;

/// Where failed download links are sent.
pub const LINK_EXPIRED_PATH: &str = "/products/download/expired";

pub const ALREADY_PURCHASED_MESSAGE: &str =
    "You have already purchased this product. Try downloading it from the My Orders page";
pub const COUPON_EXPIRED_MESSAGE: &str = "Coupon has expired";
pub const EMAIL_FAILED_MESSAGE: &str =
    "There was an error when sending your email. Please try again later.";

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Order history error: {0}")]
    OrderHistory(#[from] OrderHistoryError),

    #[error("Discount code error: {0}")]
    DiscountCodeAdmin(#[from] DiscountCodeAdminError),

    #[error("Product error: {0}")]
    ProductAdmin(#[from] ProductAdminError),

    #[error("Order error: {0}")]
    OrderAdmin(#[from] OrderAdminError),

    #[error("User error: {0}")]
    UserAdmin(#[from] UserAdminError),

    /// Payment processor call failed.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::OrderHistory(OrderHistoryError::Validation(_))
            | Self::DiscountCodeAdmin(DiscountCodeAdminError::Validation(_))
            | Self::ProductAdmin(ProductAdminError::Validation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Checkout(CheckoutError::ProductNotFound)
            | Self::DiscountCodeAdmin(DiscountCodeAdminError::NotFound)
            | Self::ProductAdmin(ProductAdminError::NotFound)
            | Self::OrderAdmin(OrderAdminError::NotFound)
            | Self::UserAdmin(UserAdminError::NotFound)
            | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Checkout(CheckoutError::AlreadyPurchased | CheckoutError::CouponExpired)
            | Self::Fulfillment(FulfillmentError::AlreadyPurchased)
            | Self::DiscountCodeAdmin(DiscountCodeAdminError::InUse)
            | Self::ProductAdmin(ProductAdminError::HasOrders)
            | Self::Database(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Fulfillment(FulfillmentError::ProductNotFound)
            | Self::Webhook(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Checkout(CheckoutError::Payment(_) | CheckoutError::MissingClientSecret)
            | Self::OrderHistory(OrderHistoryError::Email(_))
            | Self::Payment(_) => StatusCode::BAD_GATEWAY,
            Self::Database(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            Self::Download(DownloadError::Token(_)) => StatusCode::SEE_OTHER,
            Self::Checkout(CheckoutError::Repository(_))
            | Self::Fulfillment(FulfillmentError::Repository(_))
            | Self::Download(DownloadError::Repository(_))
            | Self::OrderHistory(OrderHistoryError::Repository(_))
            | Self::DiscountCodeAdmin(DiscountCodeAdminError::Repository(_))
            | Self::ProductAdmin(ProductAdminError::Repository(_))
            | Self::OrderAdmin(OrderAdminError::Repository(_))
            | Self::UserAdmin(UserAdminError::Repository(_))
            | Self::Database(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the client. Internal details never leave here.
    fn public_message(&self) -> String {
        match self {
            Self::Checkout(CheckoutError::AlreadyPurchased)
            | Self::Fulfillment(FulfillmentError::AlreadyPurchased) => {
                ALREADY_PURCHASED_MESSAGE.to_owned()
            }
            Self::Checkout(CheckoutError::CouponExpired) => COUPON_EXPIRED_MESSAGE.to_owned(),
            Self::Checkout(CheckoutError::ProductNotFound)
            | Self::Fulfillment(FulfillmentError::ProductNotFound)
            | Self::ProductAdmin(ProductAdminError::NotFound) => "Product not found".to_owned(),
            Self::DiscountCodeAdmin(DiscountCodeAdminError::NotFound) => {
                "Discount code not found".to_owned()
            }
            Self::OrderAdmin(OrderAdminError::NotFound) => "Order not found".to_owned(),
            Self::UserAdmin(UserAdminError::NotFound) => "User not found".to_owned(),
            Self::DiscountCodeAdmin(DiscountCodeAdminError::InUse) => {
                "Discount code has been used by orders; deactivate it instead".to_owned()
            }
            Self::ProductAdmin(ProductAdminError::HasOrders) => {
                "Product has orders; make it unavailable instead".to_owned()
            }
            Self::OrderHistory(OrderHistoryError::Email(_)) => EMAIL_FAILED_MESSAGE.to_owned(),
            Self::Webhook(err) => format!("Webhook error: {err}"),
            Self::Validation(_)
            | Self::OrderHistory(OrderHistoryError::Validation(_))
            | Self::DiscountCodeAdmin(DiscountCodeAdminError::Validation(_))
            | Self::ProductAdmin(ProductAdminError::Validation(_)) => {
                "Validation failed".to_owned()
            }
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::BadRequest(why) => why.clone(),
            _ if self.status() == StatusCode::BAD_GATEWAY => "External service error".to_owned(),
            _ => "Internal server error".to_owned(),
        }
    }

    fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation(errors)
            | Self::OrderHistory(OrderHistoryError::Validation(errors))
            | Self::DiscountCodeAdmin(DiscountCodeAdminError::Validation(errors))
            | Self::ProductAdmin(ProductAdminError::Validation(errors)) => Some(errors),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = %status, "Client error");
        }

        // Unknown and expired links look the same to the visitor
        if let Self::Download(DownloadError::Token(_)) = &self {
            return Redirect::to(LINK_EXPIRED_PATH).into_response();
        }

        let body = self.field_errors().map_or_else(
            || json!({ "error": self.public_message() }),
            |fields| json!({ "error": self.public_message(), "fields": fields }),
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for customer actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::header;
    use digital_storefront_core::TokenError;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(CheckoutError::CouponExpired.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(FulfillmentError::AlreadyPurchased.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(WebhookError::SignatureMismatch.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Validation(FieldErrors::single("code", "Code is required"))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(OrderAdminError::NotFound.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(UserAdminError::NotFound.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(ProductAdminError::Validation(FieldErrors::single("name", "short")).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(AppError::Internal("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_token_errors_redirect_to_expired_page() {
        for err in [TokenError::NotFound, TokenError::Expired] {
            let response = AppError::from(DownloadError::Token(err)).into_response();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(
                response.headers().get(header::LOCATION).unwrap(),
                LINK_EXPIRED_PATH
            );
        }
    }

    #[tokio::test]
    async fn test_validation_body_carries_fields() {
        let response =
            AppError::Validation(FieldErrors::single("amount", "Amount must be at least 1"))
                .into_response();
        let body = body_json(response).await;
        assert_eq!(body["fields"]["amount"][0], "Amount must be at least 1");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response =
            AppError::Database(RepositoryError::DataCorruption("secret detail".to_owned()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_already_purchased_message() {
        let body = body_json(AppError::from(CheckoutError::AlreadyPurchased).into_response()).await;
        assert_eq!(body["error"], ALREADY_PURCHASED_MESSAGE);
    }
}
