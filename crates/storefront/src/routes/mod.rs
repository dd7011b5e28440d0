//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Health check
//! GET  /health/ready                    - Readiness (storage reachable)
//!
//! # Products
//! GET  /products                        - Product listing
//! GET  /products/{id}/purchase          - Price quote (?coupon=CODE)
//! POST /products/{id}/purchase          - Start checkout (creates payment intent)
//! GET  /stripe/purchase-success         - Post-payment landing (?payment_intent=ID)
//!
//! # Downloads
//! GET  /products/download/{token}       - Redeem a download link
//! GET  /products/download/expired       - Where failed links land
//!
//! # Orders
//! POST /orders/history                  - Email download links for past orders
//!
//! # Webhooks
//! POST /webhooks/stripe                 - Signed payment events
//! ```
//!
//! The admin listener serves a separate router:
//!
//! ```text
//! GET    /admin/discount-codes                 - Discount code listing
//! POST   /admin/discount-codes                 - Create a discount code
//! POST   /admin/discount-codes/{id}/activate   - Enable a code
//! POST   /admin/discount-codes/{id}/deactivate - Disable a code
//! DELETE /admin/discount-codes/{id}            - Delete an unused code
//! GET    /admin/products                       - Product listing
//! POST   /admin/products                       - Register a stored product
//! PUT    /admin/products/{id}                  - Edit product metadata
//! POST   /admin/products/{id}/availability     - Make purchasable or not
//! DELETE /admin/products/{id}                  - Delete an unsold product
//! GET    /admin/orders                         - Order listing
//! DELETE /admin/orders/{id}                    - Delete an order
//! GET    /admin/users                          - Purchaser listing
//! DELETE /admin/users/{id}                     - Delete a purchaser and their orders
//! ```

pub mod admin;
pub mod checkout;
pub mod downloads;
pub mod health;
pub mod orders;
pub mod products;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the public routes router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/products", get(products::index))
        .route(
            "/products/{id}/purchase",
            get(checkout::quote).post(checkout::start),
        )
        .route("/products/download/expired", get(downloads::expired))
        .route("/products/download/{token}", get(downloads::download))
        .route("/stripe/purchase-success", get(checkout::purchase_success))
        .route("/orders/history", post(orders::history))
        .route("/webhooks/stripe", post(webhooks::stripe))
}

/// Create the admin listener router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .nest("/admin", admin::routes())
}
