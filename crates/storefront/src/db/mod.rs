//! Storage for the storefront.
//!
//! # Database: `storefront` schema
//!
//! ## Tables
//!
//! - `user` - Purchasers, keyed by normalized email
//! - `product` - Downloadable products
//! - `discount_code` / `discount_code_product` - Codes and their product scope
//! - `order` - One row per (purchaser, product); deleted with the purchaser
//! - `download_verification` - Time-bounded download tokens
//! - `processed_webhook_event` - Fulfilled payment events
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p digital-storefront-cli -- migrate
//! ```
//!
//! Handlers never talk to `sqlx` directly. They go through the [`Storage`]
//! traits, implemented by [`PgStore`] for production and [`MemoryStore`] for
//! tests and local development.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use digital_storefront_core::{
    Cents, ChargeSucceeded, DiscountCode, DiscountCodeDraft, DiscountCodeId, DownloadVerification,
    DownloadVerificationId, Email, Order, OrderId, Product, ProductId, User, UserId,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is invalid or corrupted.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// Operation violates a uniqueness or reference constraint.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// A discount code together with the number of orders that used it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountCodeSummary {
    pub code: DiscountCode,
    pub order_count: i64,
}

/// An order joined with the product it bought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasedProduct {
    pub order: Order,
    pub product: Product,
}

/// An order with the names an administrator needs to recognise it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    pub order: Order,
    pub product_name: String,
    pub email: Email,
}

/// A purchaser with totals over their orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub user: User,
    pub order_count: i64,
    pub total_spent: Cents,
}

/// Result of persisting a settled charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeRecord {
    /// The event id was already fulfilled. Nothing was written.
    Duplicate,
    /// The purchaser already owns the product. No order, counter change or
    /// token was written; the event is marked processed.
    AlreadyPurchased { user: User },
    /// A new order was recorded.
    Recorded(FulfilledOrder),
}

/// Everything written for a newly recorded order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilledOrder {
    pub user: User,
    pub order: Order,
    pub download: DownloadVerification,
    /// The referenced discount code had already reached its limit, so its
    /// counter was left unchanged.
    pub discount_over_limit: bool,
    /// The referenced discount code was deleted before the charge settled.
    /// The order was stored without a discount reference.
    pub discount_missing: bool,
}

/// Product catalogue.
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, product: &Product) -> Result<(), RepositoryError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// All products ordered by name, optionally only available ones.
    async fn list_products(&self, available_only: bool) -> Result<Vec<Product>, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no product has this id.
    async fn set_product_available(
        &self,
        id: ProductId,
        available: bool,
    ) -> Result<(), RepositoryError>;

    /// Replace the metadata of an existing product.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no product has this id.
    async fn update_product(&self, product: &Product) -> Result<(), RepositoryError>;

    /// Delete a product and return the removed record.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no product has this id and
    /// `RepositoryError::Conflict` if any order references it.
    async fn delete_product(&self, id: ProductId) -> Result<Product, RepositoryError>;
}

/// Discount code persistence.
#[async_trait]
pub trait DiscountCodeStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the code string is taken.
    async fn insert_discount_code(
        &self,
        draft: &DiscountCodeDraft,
        now: DateTime<Utc>,
    ) -> Result<DiscountCode, RepositoryError>;

    async fn get_discount_code(
        &self,
        id: DiscountCodeId,
    ) -> Result<Option<DiscountCode>, RepositoryError>;

    /// Look up by the exact, case-sensitive code string.
    async fn find_discount_code(&self, code: &str)
    -> Result<Option<DiscountCode>, RepositoryError>;

    /// Every code, newest first, with its order count.
    async fn list_discount_codes(&self) -> Result<Vec<DiscountCodeSummary>, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no code has this id.
    async fn set_discount_code_active(
        &self,
        id: DiscountCodeId,
        active: bool,
    ) -> Result<(), RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no code has this id and
    /// `RepositoryError::Conflict` if any order references it.
    async fn delete_discount_code(&self, id: DiscountCodeId) -> Result<(), RepositoryError>;
}

/// Completed orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Whether `email` already owns `product_id`.
    async fn has_purchased(
        &self,
        email: &Email,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError>;

    /// Every order placed by `email`, newest first.
    async fn orders_for_email(
        &self,
        email: &Email,
    ) -> Result<Vec<PurchasedProduct>, RepositoryError>;

    /// Every order, newest first.
    async fn list_orders(&self) -> Result<Vec<OrderSummary>, RepositoryError>;

    /// Delete one order. Discount usage counters are left as they are.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no order has this id.
    async fn delete_order(&self, id: OrderId) -> Result<(), RepositoryError>;
}

/// Purchasers.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Every purchaser, newest first, with order totals.
    async fn list_users(&self) -> Result<Vec<UserSummary>, RepositoryError>;

    /// Delete a purchaser together with their orders.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no user has this id.
    async fn delete_user(&self, id: UserId) -> Result<(), RepositoryError>;
}

/// Download token persistence. Tokens are insert-only.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    async fn insert_download_verification(
        &self,
        verification: &DownloadVerification,
    ) -> Result<(), RepositoryError>;

    async fn get_download_verification(
        &self,
        id: DownloadVerificationId,
    ) -> Result<Option<DownloadVerification>, RepositoryError>;
}

/// Atomic fulfillment of settled charges.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Persist a settled charge in one transaction.
    ///
    /// Marks the event processed, upserts the purchaser, inserts the order,
    /// conditionally bumps the discount counter and mints a download token.
    /// Redelivery of a processed event id writes nothing. A discount code
    /// that no longer exists never fails the charge; the order is stored
    /// without it and `discount_missing` is set.
    async fn record_charge(
        &self,
        charge: &ChargeSucceeded,
        now: DateTime<Utc>,
    ) -> Result<ChargeRecord, RepositoryError>;
}

/// Every store the application needs, behind one object.
#[async_trait]
pub trait Storage:
    ProductStore + DiscountCodeStore + OrderStore + UserStore + DownloadStore + FulfillmentStore
{
    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> Result<(), RepositoryError>;
}
