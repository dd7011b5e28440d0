//! Backoffice routes, served only on the admin listener.

pub mod discount_codes;
pub mod orders;
pub mod products;
pub mod users;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::state::AppState;

/// Create the admin routes router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/discount-codes",
            get(discount_codes::index).post(discount_codes::create),
        )
        .route(
            "/discount-codes/{id}",
            axum::routing::delete(discount_codes::delete),
        )
        .route(
            "/discount-codes/{id}/activate",
            post(discount_codes::activate),
        )
        .route(
            "/discount-codes/{id}/deactivate",
            post(discount_codes::deactivate),
        )
        .route("/products", get(products::index).post(products::create))
        .route(
            "/products/{id}",
            put(products::update).delete(products::delete),
        )
        .route(
            "/products/{id}/availability",
            post(products::set_availability),
        )
        .route("/orders", get(orders::index))
        .route("/orders/{id}", axum::routing::delete(orders::delete))
        .route("/users", get(users::index))
        .route("/users/{id}", axum::routing::delete(users::delete))
}
