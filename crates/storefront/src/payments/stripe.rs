//! Stripe REST client.
//!
//! Requests are form-encoded and authenticated with the secret key as a
//! bearer token. Responses are decoded into [`PaymentIntent`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use digital_storefront_core::Cents;

use super::{
    METADATA_DISCOUNT_CODE_ID, METADATA_PRODUCT_ID, PaymentError, PaymentIntent,
    PaymentIntentRequest, PaymentIntentStatus, PaymentProcessor, ids_from_metadata,
};
use crate::config::PaymentConfig;

/// Client for the Stripe payment intents API.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct ApiPaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: i64,
    status: PaymentIntentStatus,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl TryFrom<ApiPaymentIntent> for PaymentIntent {
    type Error = PaymentError;

    fn try_from(api: ApiPaymentIntent) -> Result<Self, Self::Error> {
        let (product_id, discount_code_id) =
            ids_from_metadata(&api.metadata).map_err(PaymentError::InvalidResponse)?;

        Ok(Self {
            id: api.id,
            client_secret: api.client_secret,
            amount: Cents::new(api.amount),
            status: api.status,
            product_id,
            discount_code_id,
        })
    }
}

impl StripeClient {
    /// Create a new client from configuration.
    #[must_use]
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            inner: Arc::new(StripeClientInner {
                client: reqwest::Client::new(),
                api_base: config.api_base.clone(),
                secret_key: config.secret_key.clone(),
            }),
        }
    }

    /// Decode a payment intent response, turning error statuses into
    /// `PaymentError::Api`.
    async fn decode(response: reqwest::Response) -> Result<PaymentIntent, PaymentError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| body.chars().take(200).collect());
            tracing::error!(status = %status, message = %message, "Payment API returned non-success status");
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let intent: ApiPaymentIntent = serde_json::from_str(&body)?;
        intent.try_into()
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, request), fields(product_id = %request.product_id, amount = request.amount.as_i64()))]
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        let mut form = vec![
            ("amount".to_owned(), request.amount.as_i64().to_string()),
            ("currency".to_owned(), request.currency.code().to_owned()),
            ("receipt_email".to_owned(), request.receipt_email.to_string()),
            (
                format!("metadata[{METADATA_PRODUCT_ID}]"),
                request.product_id.to_string(),
            ),
        ];
        if let Some(discount_code_id) = request.discount_code_id {
            form.push((
                format!("metadata[{METADATA_DISCOUNT_CODE_ID}]"),
                discount_code_id.to_string(),
            ));
        }

        let response = self
            .inner
            .client
            .post(format!("{}/payment_intents", self.inner.api_base))
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(&form)
            .send()
            .await?;

        let intent = Self::decode(response).await?;
        debug!(payment_intent = %intent.id, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PaymentError::InvalidResponse(
                "malformed payment intent id".to_owned(),
            ));
        }

        let response = self
            .inner
            .client
            .get(format!("{}/payment_intents/{id}", self.inner.api_base))
            .bearer_auth(self.inner.secret_key.expose_secret())
            .send()
            .await?;

        Self::decode(response).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use digital_storefront_core::ProductId;

    use super::*;

    #[test]
    fn test_decode_payment_intent_json() {
        let product_id = ProductId::generate();
        let body = format!(
            r#"{{
                "id": "pi_3Nx",
                "object": "payment_intent",
                "client_secret": "pi_3Nx_secret_abc",
                "amount": 800,
                "currency": "usd",
                "status": "requires_payment_method",
                "metadata": {{ "productId": "{product_id}" }}
            }}"#
        );

        let api: ApiPaymentIntent = serde_json::from_str(&body).unwrap();
        let intent = PaymentIntent::try_from(api).unwrap();
        assert_eq!(intent.id, "pi_3Nx");
        assert_eq!(intent.amount, Cents::new(800));
        assert_eq!(intent.status, PaymentIntentStatus::RequiresPaymentMethod);
        assert_eq!(intent.product_id, product_id);
        assert_eq!(intent.discount_code_id, None);
        assert_eq!(intent.client_secret.as_deref(), Some("pi_3Nx_secret_abc"));
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let status: PaymentIntentStatus = serde_json::from_str(r#""some_future_state""#).unwrap();
        assert_eq!(status, PaymentIntentStatus::Unknown);
    }

    #[test]
    fn test_missing_metadata_is_invalid_response() {
        let api = ApiPaymentIntent {
            id: "pi_1".to_owned(),
            client_secret: None,
            amount: 100,
            status: PaymentIntentStatus::Succeeded,
            metadata: HashMap::new(),
        };
        assert!(matches!(
            PaymentIntent::try_from(api),
            Err(PaymentError::InvalidResponse(_))
        ));
    }
}
