//! Digital Storefront library.
//!
//! This crate provides the storefront, payment webhook and admin listeners
//! as a library, allowing them to be tested and reused. The binary wires in
//! `PostgreSQL`, Stripe and SMTP; tests substitute in-memory collaborators
//! through [`state::AppState`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

use std::time::Duration;

use axum::{
    Router,
    http::{Request, Response},
};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use state::AppState;

/// Router for the public listener.
pub fn public_router(state: AppState) -> Router {
    with_common_layers(routes::routes()).with_state(state)
}

/// Router for the admin listener.
pub fn admin_router(state: AppState) -> Router {
    with_common_layers(routes::admin_routes()).with_state(state)
}

#[allow(clippy::cast_possible_truncation)]
fn with_common_layers(router: Router<AppState>) -> Router<AppState> {
    router
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri().path(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &Response<_>, latency: Duration, span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record("latency_ms", latency.as_millis() as u64);
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
}
