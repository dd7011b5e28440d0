//! Emailing download links for past orders.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode};
use serde_json::json;

use digital_storefront::error::EMAIL_FAILED_MESSAGE;
use digital_storefront::services::order_history::SENT_MESSAGE;
use digital_storefront_core::ProductId;
use digital_storefront_integration_tests::{
    BASE_URL, TestApp, charge_succeeded, deliver_webhook, json_body, send,
};

async fn buy(app: &TestApp, event_id: &str, product_id: ProductId, email: &str) {
    let payload = charge_succeeded(event_id, product_id, None, email, 1000);
    assert_eq!(
        deliver_webhook(app.public(), &payload).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_history_email_has_a_fresh_link_per_order() {
    let app = TestApp::new();
    let guide = app.seed_product("Guide", 1000, b"pdf").await;
    let atlas = app.seed_product("Atlas", 2500, b"pdf").await;
    buy(&app, "evt_1", guide.id, "buyer@example.com").await;
    buy(&app, "evt_2", atlas.id, "buyer@example.com").await;
    let downloads_before = app.store.download_count().await;

    let response = send(
        app.public(),
        Method::POST,
        "/orders/history",
        Some(json!({ "email": "Buyer@Example.com" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], SENT_MESSAGE);

    let histories = app.mailer.histories.lock().await;
    assert_eq!(histories.len(), 1);
    let (to, items) = &histories[0];
    assert_eq!(to.as_str(), "buyer@example.com");
    assert_eq!(items.len(), 2);
    assert!(
        items
            .iter()
            .all(|i| i.download_url.starts_with(&format!("{BASE_URL}/products/download/")))
    );
    assert_eq!(app.store.download_count().await, downloads_before + 2);
}

#[tokio::test]
async fn test_unknown_address_gets_the_same_answer_and_no_email() {
    let app = TestApp::new();

    let response = send(
        app.public(),
        Method::POST,
        "/orders/history",
        Some(json!({ "email": "nobody@example.com" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], SENT_MESSAGE);
    assert!(app.mailer.histories.lock().await.is_empty());
}

#[tokio::test]
async fn test_malformed_address_is_rejected() {
    let app = TestApp::new();

    let response = send(
        app.public(),
        Method::POST,
        "/orders/history",
        Some(json!({ "email": "buyer-at-example" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        json_body(response).await["fields"]["email"][0],
        "Invalid email address"
    );
}

#[tokio::test]
async fn test_send_failure_is_reported() {
    let app = TestApp::new();
    let guide = app.seed_product("Guide", 1000, b"pdf").await;
    buy(&app, "evt_1", guide.id, "buyer@example.com").await;
    app.mailer.set_fail(true);
    let downloads_before = app.store.download_count().await;

    let response = send(
        app.public(),
        Method::POST,
        "/orders/history",
        Some(json!({ "email": "buyer@example.com" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"], EMAIL_FAILED_MESSAGE);
    assert!(!body.to_string().contains("/products/download/"));
    assert!(app.mailer.histories.lock().await.is_empty());
    // The unsent token stays bounded by its own expiry.
    assert_eq!(app.store.download_count().await, downloads_before + 1);
}
