//! Digital Storefront - Public storefront and admin listeners.
//!
//! This binary serves two listeners:
//! - the public storefront and payment webhook (port 3000 by default)
//! - the backoffice admin API (port 3001 by default)
//!
//! The admin listener is meant to be bound to a private interface. Nothing on
//! it is reachable through the public address.
//!
//! # Collaborators
//!
//! - `PostgreSQL` for products, discount codes, orders and download links
//! - Stripe for payment intents and `charge.succeeded` webhooks
//! - SMTP for receipts and order history emails

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use digital_storefront::config::StorefrontConfig;
use digital_storefront::db::{self, PgStore};
use digital_storefront::payments::StripeClient;
use digital_storefront::services::email::SmtpMailer;
use digital_storefront::state::AppState;
use digital_storefront::{admin_router, public_router};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "digital_storefront=info,tower_http=debug".into());

    // JSON logs when LOG_FORMAT=json, text otherwise
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json");
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: cargo run -p digital-storefront-cli -- migrate

    let payments = StripeClient::new(&config.payments);
    let mailer = SmtpMailer::new(&config.email).expect("Failed to create SMTP mailer");

    let state = AppState::new(
        config.clone(),
        Arc::new(PgStore::new(pool)),
        Arc::new(payments),
        Arc::new(mailer),
    );

    let public = public_router(state.clone())
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());
    let admin = admin_router(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let public_addr = config.socket_addr();
    let admin_addr = config.admin_socket_addr();

    let public_listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .expect("Failed to bind public address");
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .expect("Failed to bind admin address");

    tracing::info!("storefront listening on {}", public_addr);
    tracing::info!("admin listening on {}", admin_addr);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut public_shutdown = shutdown_tx.subscribe();
    let mut admin_shutdown = shutdown_tx.subscribe();

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let public_server = axum::serve(public_listener, public).with_graceful_shutdown(async move {
        let _ = public_shutdown.recv().await;
    });
    let admin_server = axum::serve(admin_listener, admin).with_graceful_shutdown(async move {
        let _ = admin_shutdown.recv().await;
    });

    let (public_result, admin_result) = tokio::join!(public_server, admin_server);
    public_result.expect("Public server error");
    admin_result.expect("Admin server error");
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
