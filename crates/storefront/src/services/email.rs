//! Transactional email: purchase receipts and order history.
//!
//! Uses SMTP via lettre for delivery with Askama HTML and plain text
//! templates. Failed sends are reported to the caller and never retried.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use digital_storefront_core::Email;

use crate::config::EmailConfig;

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Contents of a purchase receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptEmail {
    pub order_id: String,
    pub product_name: String,
    pub product_description: String,
    pub price_paid: String,
    pub purchased_on: String,
    pub download_url: String,
}

/// One line of the order history email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub order_id: String,
    pub product_name: String,
    pub price_paid: String,
    pub purchased_on: String,
    pub download_url: String,
}

#[derive(Template)]
#[template(path = "email/purchase_receipt.html")]
struct PurchaseReceiptHtml<'a> {
    order_id: &'a str,
    product_name: &'a str,
    product_description: &'a str,
    price_paid: &'a str,
    purchased_on: &'a str,
    download_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/purchase_receipt.txt")]
struct PurchaseReceiptText<'a> {
    order_id: &'a str,
    product_name: &'a str,
    price_paid: &'a str,
    purchased_on: &'a str,
    download_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/order_history.html")]
struct OrderHistoryHtml<'a> {
    items: &'a [HistoryItem],
}

#[derive(Template)]
#[template(path = "email/order_history.txt")]
struct OrderHistoryText<'a> {
    items: &'a [HistoryItem],
}

fn render_receipt(receipt: &ReceiptEmail) -> Result<(String, String), EmailError> {
    let html = PurchaseReceiptHtml {
        order_id: &receipt.order_id,
        product_name: &receipt.product_name,
        product_description: &receipt.product_description,
        price_paid: &receipt.price_paid,
        purchased_on: &receipt.purchased_on,
        download_url: &receipt.download_url,
    }
    .render()?;
    let text = PurchaseReceiptText {
        order_id: &receipt.order_id,
        product_name: &receipt.product_name,
        price_paid: &receipt.price_paid,
        purchased_on: &receipt.purchased_on,
        download_url: &receipt.download_url,
    }
    .render()?;
    Ok((text, html))
}

fn render_history(items: &[HistoryItem]) -> Result<(String, String), EmailError> {
    let html = OrderHistoryHtml { items }.render()?;
    let text = OrderHistoryText { items }.render()?;
    Ok((text, html))
}

/// Sends the storefront's transactional emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_purchase_receipt(
        &self,
        to: &Email,
        receipt: &ReceiptEmail,
    ) -> Result<(), EmailError>;

    async fn send_order_history(&self, to: &Email, items: &[HistoryItem])
    -> Result<(), EmailError>;
}

/// SMTP-backed [`Mailer`].
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// Create a new mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &Email,
        subject: &str,
        text_body: String,
        html_body: String,
    ) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .as_str()
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        self.transport.send(email).await?;

        tracing::info!(to_domain = %to.domain(), subject = %subject, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_purchase_receipt(
        &self,
        to: &Email,
        receipt: &ReceiptEmail,
    ) -> Result<(), EmailError> {
        let (text, html) = render_receipt(receipt)?;
        let subject = format!("Your purchase of {}", receipt.product_name);
        self.send_multipart_email(to, &subject, text, html).await
    }

    async fn send_order_history(
        &self,
        to: &Email,
        items: &[HistoryItem],
    ) -> Result<(), EmailError> {
        let (text, html) = render_history(items)?;
        self.send_multipart_email(to, "Your order history", text, html)
            .await
    }
}
