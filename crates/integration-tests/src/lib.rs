//! Integration test harness for Digital Storefront.
//!
//! Builds the real public and admin routers over [`MemoryStore`], a scripted
//! payment processor and a mailer that records what it would have sent.
//! Requests go through `tower::ServiceExt::oneshot`, so no sockets or
//! external services are needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p digital-storefront-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;

use digital_storefront::config::{EmailConfig, PaymentConfig, StorefrontConfig};
use digital_storefront::db::{MemoryStore, ProductStore};
use digital_storefront::payments::webhook::{SIGNATURE_HEADER, sign_payload};
use digital_storefront::payments::{
    PaymentError, PaymentIntent, PaymentIntentRequest, PaymentIntentStatus, PaymentProcessor,
};
use digital_storefront::services::email::{EmailError, HistoryItem, Mailer, ReceiptEmail};
use digital_storefront::state::AppState;
use digital_storefront_core::{
    Cents, CurrencyCode, DiscountCode, DiscountCodeId, DiscountKind, Email, Applicability, Product,
    ProductId,
};

pub const WEBHOOK_SECRET: &str = "whsec_9fK2mQ7xLp4Rt8Vz1Nc6Yb3Hd5";
pub const BASE_URL: &str = "https://shop.test";

/// Payment processor double that records created intents and answers
/// lookups from a scripted table.
#[derive(Default)]
pub struct FakePayments {
    pub created: Mutex<Vec<PaymentIntentRequest>>,
    intents: Mutex<Vec<PaymentIntent>>,
    fail: AtomicBool,
}

impl FakePayments {
    /// Make the next lookup of `id` return an intent with `status`.
    pub async fn script_intent(&self, id: &str, product_id: ProductId, status: PaymentIntentStatus) {
        self.intents.lock().await.push(PaymentIntent {
            id: id.to_owned(),
            client_secret: None,
            amount: Cents::new(1000),
            status,
            product_id,
            discount_code_id: None,
        });
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProcessor for FakePayments {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Api {
                status: 500,
                message: "processor unavailable".to_owned(),
            });
        }
        let mut created = self.created.lock().await;
        created.push(request.clone());
        let id = format!("pi_test_{}", created.len());
        Ok(PaymentIntent {
            client_secret: Some(format!("{id}_secret_abc")),
            id,
            amount: request.amount,
            status: PaymentIntentStatus::RequiresPaymentMethod,
            product_id: request.product_id,
            discount_code_id: request.discount_code_id,
        })
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError> {
        self.intents
            .lock()
            .await
            .iter()
            .find(|intent| intent.id == id)
            .cloned()
            .ok_or_else(|| PaymentError::Api {
                status: 404,
                message: format!("No such payment_intent: '{id}'"),
            })
    }
}

/// Mailer double that keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    pub receipts: Mutex<Vec<(Email, ReceiptEmail)>>,
    pub histories: Mutex<Vec<(Email, Vec<HistoryItem>)>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), EmailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmailError::InvalidAddress("smtp down".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_purchase_receipt(
        &self,
        to: &Email,
        receipt: &ReceiptEmail,
    ) -> Result<(), EmailError> {
        self.check()?;
        self.receipts
            .lock()
            .await
            .push((to.clone(), receipt.clone()));
        Ok(())
    }

    async fn send_order_history(&self, to: &Email, items: &[HistoryItem]) -> Result<(), EmailError> {
        self.check()?;
        self.histories
            .lock()
            .await
            .push((to.clone(), items.to_vec()));
        Ok(())
    }
}

/// Configuration pointing at test collaborators.
#[must_use]
pub fn test_config(storage_root: PathBuf) -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 3000,
        admin_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        admin_port: 3001,
        base_url: BASE_URL.to_owned(),
        storage_root,
        payments: PaymentConfig {
            secret_key: SecretString::from("sk_test_unused"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            currency: CurrencyCode::USD,
            api_base: "http://127.0.0.1:9".to_owned(),
        },
        email: EmailConfig {
            smtp_host: "localhost".to_owned(),
            smtp_port: 25,
            smtp_username: String::new(),
            smtp_password: SecretString::from(""),
            from_address: "Shop <shop@shop.test>".to_owned(),
        },
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// A storefront wired to in-memory collaborators.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub payments: Arc<FakePayments>,
    pub mailer: Arc<RecordingMailer>,
    pub state: AppState,
    pub storage_root: PathBuf,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let storage_root =
            std::env::temp_dir().join(format!("digital-storefront-{}", uuid::Uuid::new_v4()));
        let store = Arc::new(MemoryStore::new());
        let payments = Arc::new(FakePayments::default());
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(
            test_config(storage_root.clone()),
            store.clone(),
            payments.clone(),
            mailer.clone(),
        );
        Self {
            store,
            payments,
            mailer,
            state,
            storage_root,
        }
    }

    #[must_use]
    pub fn public(&self) -> Router {
        digital_storefront::public_router(self.state.clone())
    }

    #[must_use]
    pub fn admin(&self) -> Router {
        digital_storefront::admin_router(self.state.clone())
    }

    /// Store an available product priced at `price` cents whose file holds
    /// `contents`.
    pub async fn seed_product(&self, name: &str, price: i64, contents: &[u8]) -> Product {
        let file_path = format!("products/{}.pdf", uuid::Uuid::new_v4());
        let full = self.storage_root.join(&file_path);
        tokio::fs::create_dir_all(full.parent().unwrap()).await.unwrap();
        tokio::fs::write(&full, contents).await.unwrap();

        let product = Product {
            id: ProductId::generate(),
            name: name.to_owned(),
            description: format!("{name} description"),
            price: Cents::new(price),
            available: true,
            file_path,
            image_path: "/products/cover.png".to_owned(),
            created_at: Utc::now(),
        };
        self.store.insert_product(&product).await.unwrap();
        product
    }

    /// Store a discount code directly, bypassing admin validation.
    pub async fn seed_discount_code(
        &self,
        code: &str,
        kind: DiscountKind,
        amount: u32,
        expires_at: Option<DateTime<Utc>>,
        limit: Option<u32>,
        uses: u32,
    ) -> DiscountCode {
        let discount = DiscountCode {
            id: DiscountCodeId::generate(),
            code: code.to_owned(),
            kind,
            amount,
            applicability: Applicability::AllProducts,
            active: true,
            expires_at,
            limit,
            uses,
            created_at: Utc::now(),
        };
        self.store.put_discount_code(discount.clone()).await;
        discount
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.storage_root);
    }
}

/// Send one request through `router`.
pub async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.oneshot(request).await.unwrap()
}

/// Read a response body as JSON.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as raw bytes.
pub async fn bytes_body(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// A `charge.succeeded` event body.
#[must_use]
pub fn charge_succeeded(
    event_id: &str,
    product_id: ProductId,
    discount_code_id: Option<DiscountCodeId>,
    email: &str,
    amount: i64,
) -> String {
    let mut metadata = json!({ "productId": product_id.to_string() });
    if let Some(id) = discount_code_id {
        metadata["discountCodeId"] = json!(id.to_string());
    }
    json!({
        "id": event_id,
        "type": "charge.succeeded",
        "data": {
            "object": {
                "id": format!("ch_{event_id}"),
                "amount": amount,
                "billing_details": { "email": email },
                "metadata": metadata,
            }
        }
    })
    .to_string()
}

/// Deliver a webhook body signed with the test secret.
pub async fn deliver_webhook(router: Router, payload: &str) -> Response<Body> {
    let signature = sign_payload(WEBHOOK_SECRET, payload.as_bytes(), Utc::now().timestamp());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(payload.to_owned()))
        .unwrap();
    router.oneshot(request).await.unwrap()
}

/// Convenience for asserting on status codes with a readable failure.
pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
