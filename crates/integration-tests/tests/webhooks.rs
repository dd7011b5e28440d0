//! Payment webhook authentication and order fulfillment.

#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use tower::ServiceExt;

use digital_storefront::db::DiscountCodeStore;
use digital_storefront::payments::webhook::{SIGNATURE_HEADER, sign_payload};
use digital_storefront_core::DiscountKind;
use digital_storefront_integration_tests::{
    BASE_URL, TestApp, WEBHOOK_SECRET, charge_succeeded, deliver_webhook, json_body, send,
};

async fn deliver_with_signature(app: &TestApp, payload: &str, signature: Option<String>) -> StatusCode {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let request = builder.body(Body::from(payload.to_owned())).unwrap();
    app.public().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_charge_creates_order_and_sends_receipt() {
    let app = TestApp::new();
    let product = app.seed_product("Field Guide", 1999, b"pdf").await;
    let payload = charge_succeeded("evt_1", product.id, None, "Buyer@Example.com", 1999);

    let response = deliver_webhook(app.public(), &payload).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["receipt_sent"], true);

    assert_eq!(app.store.order_count().await, 1);
    assert_eq!(app.store.download_count().await, 1);

    let receipts = app.mailer.receipts.lock().await;
    assert_eq!(receipts.len(), 1);
    let (to, receipt) = &receipts[0];
    assert_eq!(to.as_str(), "buyer@example.com");
    assert_eq!(receipt.product_name, "Field Guide");
    assert_eq!(receipt.price_paid, "$19.99");
    assert!(
        receipt
            .download_url
            .starts_with(&format!("{BASE_URL}/products/download/"))
    );
}

#[tokio::test]
async fn test_redelivered_event_is_a_no_op() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let payload = charge_succeeded("evt_dup", product.id, None, "buyer@example.com", 1000);

    assert_eq!(
        deliver_webhook(app.public(), &payload).await.status(),
        StatusCode::OK
    );
    let second = deliver_webhook(app.public(), &payload).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["duplicate"], true);

    assert_eq!(app.store.order_count().await, 1);
    assert_eq!(app.mailer.receipts.lock().await.len(), 1);
}

#[tokio::test]
async fn test_simultaneous_completions_keep_one_order() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let first = charge_succeeded("evt_a", product.id, None, "buyer@example.com", 1000);
    let second = charge_succeeded("evt_b", product.id, None, "buyer@example.com", 1000);

    let (a, b) = tokio::join!(
        deliver_webhook(app.public(), &first),
        deliver_webhook(app.public(), &second)
    );

    let mut statuses = [a.status(), b.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    assert_eq!(app.store.order_count().await, 1);
}

#[tokio::test]
async fn test_charge_with_code_counts_a_use() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let code = app
        .seed_discount_code("ONCE", DiscountKind::Percentage, 10, None, Some(1), 0)
        .await;

    let payload = charge_succeeded("evt_1", product.id, Some(code.id), "a@example.com", 900);
    let body = json_body(deliver_webhook(app.public(), &payload).await).await;
    assert_eq!(body["discount_over_limit"], false);

    let stored = app.store.get_discount_code(code.id).await.unwrap().unwrap();
    assert_eq!(stored.uses, 1);
}

#[tokio::test]
async fn test_charge_past_limit_still_fulfills() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let code = app
        .seed_discount_code("ONCE", DiscountKind::Percentage, 10, None, Some(1), 1)
        .await;

    let payload = charge_succeeded("evt_late", product.id, Some(code.id), "b@example.com", 900);
    let response = deliver_webhook(app.public(), &payload).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["discount_over_limit"], true);

    assert_eq!(app.store.order_count().await, 1);
    let stored = app.store.get_discount_code(code.id).await.unwrap().unwrap();
    assert_eq!(stored.uses, 1);
}

#[tokio::test]
async fn test_last_use_raced_by_two_buyers_counts_once() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let code = app
        .seed_discount_code("LAST", DiscountKind::Percentage, 10, None, Some(1), 0)
        .await;
    let first = charge_succeeded("evt_a", product.id, Some(code.id), "a@example.com", 900);
    let second = charge_succeeded("evt_b", product.id, Some(code.id), "b@example.com", 900);

    let (a, b) = tokio::join!(
        deliver_webhook(app.public(), &first),
        deliver_webhook(app.public(), &second)
    );
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let mut over_limit = [
        json_body(a).await["discount_over_limit"].as_bool().unwrap(),
        json_body(b).await["discount_over_limit"].as_bool().unwrap(),
    ];
    over_limit.sort_unstable();
    assert_eq!(over_limit, [false, true]);

    assert_eq!(app.store.order_count().await, 2);
    let stored = app.store.get_discount_code(code.id).await.unwrap().unwrap();
    assert_eq!(stored.uses, 1);
}

#[tokio::test]
async fn test_code_deleted_before_settlement_still_fulfills() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let code = app
        .seed_discount_code("GONE", DiscountKind::Percentage, 10, None, None, 0)
        .await;
    let deleted = send(
        app.admin(),
        Method::DELETE,
        &format!("/admin/discount-codes/{}", code.id),
        None,
    )
    .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let payload = charge_succeeded("evt_1", product.id, Some(code.id), "a@example.com", 900);
    let response = deliver_webhook(app.public(), &payload).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["discount_missing"], true);
    assert_eq!(body["discount_over_limit"], false);
    assert_eq!(app.store.order_count().await, 1);
    assert_eq!(app.mailer.receipts.lock().await.len(), 1);
}

#[tokio::test]
async fn test_receipt_failure_keeps_the_order() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    app.mailer.set_fail(true);

    let payload = charge_succeeded("evt_1", product.id, None, "buyer@example.com", 1000);
    let response = deliver_webhook(app.public(), &payload).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["receipt_sent"], false);
    assert_eq!(app.store.order_count().await, 1);
}

#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let payload = charge_succeeded("evt_1", product.id, None, "buyer@example.com", 1000);
    let signature = sign_payload(WEBHOOK_SECRET, payload.as_bytes(), Utc::now().timestamp());
    let tampered = payload.replace("1000", "1");

    let status = deliver_with_signature(&app, &tampered, Some(signature)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let payload = charge_succeeded("evt_1", product.id, None, "buyer@example.com", 1000);

    let status = deliver_with_signature(&app, &payload, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_stale_signature_is_rejected() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let payload = charge_succeeded("evt_1", product.id, None, "buyer@example.com", 1000);
    let signature = sign_payload(
        WEBHOOK_SECRET,
        payload.as_bytes(),
        Utc::now().timestamp() - 3600,
    );

    let status = deliver_with_signature(&app, &payload, Some(signature)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_other_event_types_are_acknowledged() {
    let app = TestApp::new();
    let payload = r#"{"id":"evt_x","type":"payment_intent.created","data":{"object":{}}}"#;

    let response = deliver_webhook(app.public(), payload).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.order_count().await, 0);
}

#[tokio::test]
async fn test_charge_for_unknown_product_is_rejected() {
    let app = TestApp::new();
    let payload = charge_succeeded(
        "evt_1",
        digital_storefront_core::ProductId::generate(),
        None,
        "buyer@example.com",
        1000,
    );

    let response = deliver_webhook(app.public(), &payload).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count().await, 0);
}
