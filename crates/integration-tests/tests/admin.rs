//! Backoffice routes on the admin listener.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode};
use serde_json::json;

use digital_storefront_core::{DiscountKind, ProductId};
use digital_storefront_integration_tests::{
    TestApp, charge_succeeded, deliver_webhook, json_body, send,
};

#[tokio::test]
async fn test_create_and_list_discount_codes() {
    let app = TestApp::new();

    let response = send(
        app.admin(),
        Method::POST,
        "/admin/discount-codes",
        Some(json!({
            "code": "LAUNCH20",
            "kind": "PERCENTAGE",
            "amount": 20,
            "all_products": true,
            "limit": 100,
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let listing = json_body(send(app.admin(), Method::GET, "/admin/discount-codes", None).await).await;
    assert_eq!(listing[0]["code"], "LAUNCH20");
    assert_eq!(listing[0]["amount"], "20%");
    assert_eq!(listing[0]["uses"], 0);
    assert_eq!(listing[0]["limit"], 100);
    assert_eq!(listing[0]["order_count"], 0);
}

#[tokio::test]
async fn test_invalid_code_reports_every_field() {
    let app = TestApp::new();

    let response = send(
        app.admin(),
        Method::POST,
        "/admin/discount-codes",
        Some(json!({
            "code": "  ",
            "kind": "PERCENTAGE",
            "amount": 150,
            "all_products": true,
        })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert!(body["fields"]["code"].is_array());
    assert!(body["fields"]["amount"].is_array());
}

#[tokio::test]
async fn test_duplicate_code_is_a_field_error() {
    let app = TestApp::new();
    app.seed_discount_code("TAKEN", DiscountKind::Fixed, 5, None, None, 0)
        .await;

    let response = send(
        app.admin(),
        Method::POST,
        "/admin/discount-codes",
        Some(json!({ "code": "TAKEN", "kind": "FIXED", "amount": 5, "all_products": true })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        json_body(response).await["fields"]["code"][0],
        "Code already exists"
    );
}

#[tokio::test]
async fn test_deactivated_code_no_longer_applies() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let code = app
        .seed_discount_code("SAVE20", DiscountKind::Percentage, 20, None, None, 0)
        .await;

    let response = send(
        app.admin(),
        Method::POST,
        &format!("/admin/discount-codes/{}/deactivate", code.id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let uri = format!("/products/{}/purchase?coupon=SAVE20", product.id);
    let quote = json_body(send(app.public(), Method::GET, &uri, None).await).await;
    assert_eq!(quote["amount"], 1000);
    assert_eq!(quote["coupon_rejected"], true);
}

#[tokio::test]
async fn test_used_code_cannot_be_deleted() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let code = app
        .seed_discount_code("SAVE20", DiscountKind::Percentage, 20, None, None, 0)
        .await;
    let payload = charge_succeeded("evt_1", product.id, Some(code.id), "a@example.com", 800);
    assert_eq!(
        deliver_webhook(app.public(), &payload).await.status(),
        StatusCode::OK
    );

    let response = send(
        app.admin(),
        Method::DELETE,
        &format!("/admin/discount-codes/{}", code.id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unused_code_can_be_deleted() {
    let app = TestApp::new();
    let code = app
        .seed_discount_code("SPARE", DiscountKind::Fixed, 5, None, None, 0)
        .await;

    let uri = format!("/admin/discount-codes/{}", code.id);
    assert_eq!(
        send(app.admin(), Method::DELETE, &uri, None).await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        send(app.admin(), Method::DELETE, &uri, None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_product_availability_toggle() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;

    let response = send(
        app.admin(),
        Method::POST,
        &format!("/admin/products/{}/availability", product.id),
        Some(json!({ "available": false })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let public = json_body(send(app.public(), Method::GET, "/products", None).await).await;
    assert!(public.as_array().unwrap().is_empty());
    let admin = json_body(send(app.admin(), Method::GET, "/admin/products", None).await).await;
    assert_eq!(admin[0]["available"], false);
}

#[tokio::test]
async fn test_sold_product_cannot_be_deleted() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let payload = charge_succeeded("evt_1", product.id, None, "a@example.com", 1000);
    deliver_webhook(app.public(), &payload).await;

    let response = send(
        app.admin(),
        Method::DELETE,
        &format!("/admin/products/{}", product.id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unsold_product_delete_removes_file() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let file = app.storage_root.join(&product.file_path);
    assert!(file.exists());

    let response = send(
        app.admin(),
        Method::DELETE,
        &format!("/admin/products/{}", product.id),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!file.exists());
}

async fn place_file(app: &TestApp, relative: &str) {
    let full = app.storage_root.join(relative);
    tokio::fs::create_dir_all(full.parent().unwrap()).await.unwrap();
    tokio::fs::write(&full, b"zip").await.unwrap();
}

fn product_form(file_path: &str) -> serde_json::Value {
    json!({
        "name": "Synth Presets",
        "description": "Two hundred patches for analog synths",
        "price_in_cents": 1500,
        "file_path": file_path,
        "image_path": "/products/presets.png",
    })
}

#[tokio::test]
async fn test_created_product_starts_unavailable() {
    let app = TestApp::new();
    place_file(&app, "products/presets.zip").await;

    let response = send(
        app.admin(),
        Method::POST,
        "/admin/products",
        Some(product_form("products/presets.zip")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["available"], false);
    assert_eq!(created["price"], 1500);

    let public = json_body(send(app.public(), Method::GET, "/products", None).await).await;
    assert!(public.as_array().unwrap().is_empty());
    let admin = json_body(send(app.admin(), Method::GET, "/admin/products", None).await).await;
    assert_eq!(admin[0]["name"], "Synth Presets");
}

#[tokio::test]
async fn test_invalid_product_reports_every_field() {
    let app = TestApp::new();

    let response = send(
        app.admin(),
        Method::POST,
        "/admin/products",
        Some(json!({
            "name": "ab",
            "description": "short",
            "price_in_cents": 0,
            "file_path": "products/x.zip",
            "image_path": "/products/x.png",
        })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["fields"]["name"][0], "Name must be at least 3 characters");
    assert_eq!(
        body["fields"]["description"][0],
        "Description must be at least 10 characters"
    );
    assert_eq!(body["fields"]["price_in_cents"][0], "Price must be at least 1 cent");
}

#[tokio::test]
async fn test_product_without_stored_file_is_rejected() {
    let app = TestApp::new();

    let response = send(
        app.admin(),
        Method::POST,
        "/admin/products",
        Some(product_form("products/missing.zip")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        json_body(response).await["fields"]["file_path"][0],
        "File not found in product storage"
    );
}

#[tokio::test]
async fn test_product_edit_replaces_metadata_and_old_file() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let old_file = app.storage_root.join(&product.file_path);
    place_file(&app, "products/presets.zip").await;

    let response = send(
        app.admin(),
        Method::PUT,
        &format!("/admin/products/{}", product.id),
        Some(product_form("products/presets.zip")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["id"], product.id.to_string());
    assert_eq!(updated["name"], "Synth Presets");
    assert_eq!(updated["available"], true);
    assert!(!old_file.exists());
    assert!(app.storage_root.join("products/presets.zip").exists());
}

#[tokio::test]
async fn test_editing_unknown_product_is_not_found() {
    let app = TestApp::new();
    place_file(&app, "products/presets.zip").await;

    let response = send(
        app.admin(),
        Method::PUT,
        &format!("/admin/products/{}", ProductId::generate()),
        Some(product_form("products/presets.zip")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_an_order_allows_product_removal() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let payload = charge_succeeded("evt_1", product.id, None, "a@example.com", 1000);
    deliver_webhook(app.public(), &payload).await;

    let orders = json_body(send(app.admin(), Method::GET, "/admin/orders", None).await).await;
    assert_eq!(orders[0]["product_name"], "Guide");
    assert_eq!(orders[0]["email"], "a@example.com");
    assert_eq!(orders[0]["price_paid"], "$10");

    let uri = format!("/admin/orders/{}", orders[0]["id"].as_str().unwrap());
    assert_eq!(
        send(app.admin(), Method::DELETE, &uri, None).await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        send(app.admin(), Method::DELETE, &uri, None).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(app.store.order_count().await, 0);

    let response = send(
        app.admin(),
        Method::DELETE,
        &format!("/admin/products/{}", product.id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_deleting_a_user_removes_their_orders() {
    let app = TestApp::new();
    let guide = app.seed_product("Guide", 1000, b"pdf").await;
    let atlas = app.seed_product("Atlas", 2550, b"pdf").await;
    deliver_webhook(
        app.public(),
        &charge_succeeded("evt_1", guide.id, None, "a@example.com", 1000),
    )
    .await;
    deliver_webhook(
        app.public(),
        &charge_succeeded("evt_2", atlas.id, None, "a@example.com", 2550),
    )
    .await;

    let users = json_body(send(app.admin(), Method::GET, "/admin/users", None).await).await;
    assert_eq!(users[0]["email"], "a@example.com");
    assert_eq!(users[0]["order_count"], 2);
    assert_eq!(users[0]["total_spent"], "$35.50");

    let uri = format!("/admin/users/{}", users[0]["id"].as_str().unwrap());
    assert_eq!(
        send(app.admin(), Method::DELETE, &uri, None).await.status(),
        StatusCode::NO_CONTENT
    );
    assert_eq!(app.store.order_count().await, 0);
    let users = json_body(send(app.admin(), Method::GET, "/admin/users", None).await).await;
    assert!(users.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_routes_are_not_public() {
    let app = TestApp::new();
    let response = send(app.public(), Method::GET, "/admin/discount-codes", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
