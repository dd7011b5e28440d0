//! Download link redemption.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode, header};
use chrono::{Duration, Utc};

use digital_storefront::error::LINK_EXPIRED_PATH;
use digital_storefront_core::{DownloadVerification, DownloadVerificationId, ProductId, TokenError};
use digital_storefront_integration_tests::{TestApp, bytes_body, json_body, send};

async fn seed_token(app: &TestApp, product_id: ProductId, age: Duration) -> DownloadVerificationId {
    let token = DownloadVerification::issue(product_id, Utc::now() - age);
    app.store.put_download_verification(token.clone()).await;
    token.id
}

#[tokio::test]
async fn test_token_just_inside_window_serves_file() {
    let app = TestApp::new();
    let product = app.seed_product("Field Guide", 1000, b"%PDF-1.7 guide").await;
    let token = seed_token(&app, product.id, Duration::hours(23) + Duration::minutes(59)).await;

    let response = send(
        app.public(),
        Method::GET,
        &format!("/products/download/{token}"),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"Field Guide.pdf\""
    );
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "14");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(bytes_body(response).await, b"%PDF-1.7 guide");
}

#[tokio::test]
async fn test_control_chars_in_name_still_download() {
    let app = TestApp::new();
    let product = app.seed_product("Beat\u{1}Pack\t2", 1000, b"zip").await;
    let token = seed_token(&app, product.id, Duration::minutes(5)).await;

    let response = send(
        app.public(),
        Method::GET,
        &format!("/products/download/{token}"),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"Beat_Pack_2.pdf\""
    );
}

#[tokio::test]
async fn test_token_at_window_end_redirects() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let token = seed_token(&app, product.id, Duration::hours(24)).await;

    let response = send(
        app.public(),
        Method::GET,
        &format!("/products/download/{token}"),
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        LINK_EXPIRED_PATH
    );
}

#[tokio::test]
async fn test_unknown_and_garbage_tokens_redirect_the_same_way() {
    let app = TestApp::new();
    for token in [DownloadVerificationId::generate().to_string(), "garbage".to_owned()] {
        let response = send(
            app.public(),
            Method::GET,
            &format!("/products/download/{token}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            LINK_EXPIRED_PATH
        );
    }
}

#[tokio::test]
async fn test_token_can_be_redeemed_again_before_expiry() {
    let app = TestApp::new();
    let product = app.seed_product("Guide", 1000, b"pdf").await;
    let token = seed_token(&app, product.id, Duration::minutes(1)).await;
    let uri = format!("/products/download/{token}");

    for _ in 0..2 {
        let response = send(app.public(), Method::GET, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_expired_page_explains_how_to_recover() {
    let app = TestApp::new();
    let response = send(app.public(), Method::GET, LINK_EXPIRED_PATH, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["error"],
        TokenError::Expired.user_message()
    );
}
