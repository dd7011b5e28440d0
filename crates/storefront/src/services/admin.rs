//! Backoffice management of discount codes, products, orders and purchasers.

use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use digital_storefront_core::{
    Applicability, CurrencyCode, DiscountCode, DiscountCodeId, DiscountKind, DiscountStatus,
    Email, FieldErrors, NewDiscountCode, NewProduct, OrderId, Product, ProductId, UserId,
};

use crate::db::{RepositoryError, Storage};

/// Errors from discount code management.
#[derive(Debug, Error)]
pub enum DiscountCodeAdminError {
    #[error("invalid input: {0}")]
    Validation(FieldErrors),

    #[error("discount code not found")]
    NotFound,

    /// Orders reference the code, so it can only be deactivated.
    #[error("discount code has orders")]
    InUse,

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for DiscountCodeAdminError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Conflict(_) => Self::InUse,
            other => Self::Repository(other),
        }
    }
}

/// Errors from product management.
#[derive(Debug, Error)]
pub enum ProductAdminError {
    #[error("invalid input: {0}")]
    Validation(FieldErrors),

    #[error("product not found")]
    NotFound,

    /// Orders reference the product, so it can only be made unavailable.
    #[error("product has orders")]
    HasOrders,

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ProductAdminError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            RepositoryError::Conflict(_) => Self::HasOrders,
            other => Self::Repository(other),
        }
    }
}

/// Errors from order management.
#[derive(Debug, Error)]
pub enum OrderAdminError {
    #[error("order not found")]
    NotFound,

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for OrderAdminError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            other => Self::Repository(other),
        }
    }
}

/// Errors from purchaser management.
#[derive(Debug, Error)]
pub enum UserAdminError {
    #[error("user not found")]
    NotFound,

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for UserAdminError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            other => Self::Repository(other),
        }
    }
}

/// One row of the discount code listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountCodeListing {
    pub id: DiscountCodeId,
    pub code: String,
    pub kind: DiscountKind,
    /// e.g. `20%` or `$15`
    pub amount: String,
    pub status: DiscountStatus,
    pub uses: u32,
    pub limit: Option<u32>,
    pub order_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub all_products: bool,
    pub product_ids: Vec<ProductId>,
}

/// List every discount code with its status as of `now`.
///
/// # Errors
///
/// Returns `DiscountCodeAdminError::Repository` if storage fails.
#[instrument(skip(storage))]
pub async fn list_discount_codes(
    storage: &dyn Storage,
    currency: CurrencyCode,
    now: DateTime<Utc>,
) -> Result<Vec<DiscountCodeListing>, DiscountCodeAdminError> {
    let summaries = storage.list_discount_codes().await?;

    Ok(summaries
        .into_iter()
        .map(|summary| {
            let code = summary.code;
            let (all_products, product_ids) = match &code.applicability {
                Applicability::AllProducts => (true, Vec::new()),
                Applicability::Products(ids) => (false, ids.iter().copied().collect()),
            };
            DiscountCodeListing {
                id: code.id,
                amount: code.display_amount(currency),
                status: code.status(now),
                kind: code.kind,
                uses: code.uses,
                limit: code.limit,
                order_count: summary.order_count,
                expires_at: code.expires_at,
                all_products,
                product_ids,
                code: code.code,
            }
        })
        .collect())
}

/// Validate and store a new discount code.
///
/// # Errors
///
/// Returns `DiscountCodeAdminError::Validation` for invalid input, unknown
/// products or a code string that is already taken.
#[instrument(skip(storage, input), fields(code = %input.code))]
pub async fn create_discount_code(
    storage: &dyn Storage,
    input: NewDiscountCode,
    now: DateTime<Utc>,
) -> Result<DiscountCode, DiscountCodeAdminError> {
    let draft = input
        .validate(now)
        .map_err(DiscountCodeAdminError::Validation)?;

    if let Applicability::Products(ids) = &draft.applicability {
        for id in ids {
            if storage.get_product(*id).await?.is_none() {
                return Err(DiscountCodeAdminError::Validation(FieldErrors::single(
                    "product_ids",
                    format!("Unknown product {id}"),
                )));
            }
        }
    }

    let code = match storage.insert_discount_code(&draft, now).await {
        Ok(code) => code,
        Err(RepositoryError::Conflict(_)) => {
            return Err(DiscountCodeAdminError::Validation(FieldErrors::single(
                "code",
                "Code already exists",
            )));
        }
        Err(e) => return Err(e.into()),
    };

    info!(discount_code_id = %code.id, kind = %code.kind, amount = code.amount, "Discount code created");
    Ok(code)
}

/// Enable or disable a discount code.
///
/// # Errors
///
/// Returns `DiscountCodeAdminError::NotFound` if the code does not exist.
#[instrument(skip(storage))]
pub async fn set_discount_code_active(
    storage: &dyn Storage,
    id: DiscountCodeId,
    active: bool,
) -> Result<(), DiscountCodeAdminError> {
    storage.set_discount_code_active(id, active).await?;
    info!("Discount code active flag changed");
    Ok(())
}

/// Hard-delete a discount code no order references.
///
/// # Errors
///
/// Returns `DiscountCodeAdminError::InUse` if any order used the code.
#[instrument(skip(storage))]
pub async fn delete_discount_code(
    storage: &dyn Storage,
    id: DiscountCodeId,
) -> Result<(), DiscountCodeAdminError> {
    storage.delete_discount_code(id).await?;
    info!("Discount code deleted");
    Ok(())
}

/// Every product, including unavailable ones.
///
/// # Errors
///
/// Returns `ProductAdminError::Repository` if storage fails.
pub async fn list_products(storage: &dyn Storage) -> Result<Vec<Product>, ProductAdminError> {
    Ok(storage.list_products(false).await?)
}

/// Store a new product. The file must already be in product storage.
/// New products are unavailable until published.
///
/// # Errors
///
/// Returns `ProductAdminError::Validation` for invalid metadata or a file
/// that is not in storage.
#[instrument(skip(storage, storage_root, input), fields(name = %input.name))]
pub async fn create_product(
    storage: &dyn Storage,
    storage_root: &Path,
    input: NewProduct,
    now: DateTime<Utc>,
) -> Result<Product, ProductAdminError> {
    let draft = input.validate().map_err(ProductAdminError::Validation)?;
    ensure_stored(storage_root, &draft.file_path).await?;

    let product = draft.into_product(now);
    storage.insert_product(&product).await?;

    info!(product_id = %product.id, price = product.price.as_i64(), "Product created");
    Ok(product)
}

/// Replace a product's metadata. Availability and creation time are kept.
/// Files the product no longer points at are removed.
///
/// # Errors
///
/// Returns `ProductAdminError::NotFound` if the product does not exist and
/// `ProductAdminError::Validation` for invalid metadata.
#[instrument(skip(storage, storage_root, input))]
pub async fn update_product(
    storage: &dyn Storage,
    storage_root: &Path,
    id: ProductId,
    input: NewProduct,
) -> Result<Product, ProductAdminError> {
    let draft = input.validate().map_err(ProductAdminError::Validation)?;
    let existing = storage
        .get_product(id)
        .await?
        .ok_or(ProductAdminError::NotFound)?;
    ensure_stored(storage_root, &draft.file_path).await?;

    let previous_file = existing.file_path.clone();
    let previous_image = existing.image_path.clone();
    let product = draft.apply_to(existing);
    storage.update_product(&product).await?;

    if previous_file != product.file_path {
        remove_stored_file(&storage_root.join(&previous_file)).await;
    }
    if previous_image != product.image_path {
        remove_stored_file(&public_image_path(storage_root, &previous_image)).await;
    }

    info!(price = product.price.as_i64(), "Product updated");
    Ok(product)
}

async fn ensure_stored(storage_root: &Path, file_path: &str) -> Result<(), ProductAdminError> {
    let path = storage_root.join(file_path);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(ProductAdminError::Validation(FieldErrors::single(
            "file_path",
            "File not found in product storage",
        ))),
    }
}

/// Make a product purchasable or not.
///
/// # Errors
///
/// Returns `ProductAdminError::NotFound` if the product does not exist.
#[instrument(skip(storage))]
pub async fn set_product_available(
    storage: &dyn Storage,
    id: ProductId,
    available: bool,
) -> Result<(), ProductAdminError> {
    storage.set_product_available(id, available).await?;
    info!("Product availability changed");
    Ok(())
}

/// Delete a product no order references, along with its stored file and
/// image.
///
/// # Errors
///
/// Returns `ProductAdminError::HasOrders` if the product was ever sold.
#[instrument(skip(storage, storage_root))]
pub async fn delete_product(
    storage: &dyn Storage,
    storage_root: &Path,
    id: ProductId,
) -> Result<Product, ProductAdminError> {
    let product = storage.delete_product(id).await?;

    remove_stored_file(&storage_root.join(&product.file_path)).await;
    remove_stored_file(&public_image_path(storage_root, &product.image_path)).await;

    info!("Product deleted");
    Ok(product)
}

/// One row of the order listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderListing {
    pub id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub email: Email,
    /// e.g. `$19.99`
    pub price_paid: String,
    pub discount_code_id: Option<DiscountCodeId>,
    pub created_at: DateTime<Utc>,
}

/// One row of the purchaser listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserListing {
    pub id: UserId,
    pub email: Email,
    pub order_count: i64,
    pub total_spent: String,
    pub created_at: DateTime<Utc>,
}

/// Every order, newest first.
///
/// # Errors
///
/// Returns `OrderAdminError::Repository` if storage fails.
pub async fn list_orders(
    storage: &dyn Storage,
    currency: CurrencyCode,
) -> Result<Vec<OrderListing>, OrderAdminError> {
    let summaries = storage.list_orders().await?;
    Ok(summaries
        .into_iter()
        .map(|summary| OrderListing {
            id: summary.order.id,
            product_id: summary.order.product_id,
            product_name: summary.product_name,
            email: summary.email,
            price_paid: summary.order.price_paid.display(currency),
            discount_code_id: summary.order.discount_code_id,
            created_at: summary.order.created_at,
        })
        .collect())
}

/// Delete one order, e.g. after a refund. The purchaser may buy the product
/// again afterwards.
///
/// # Errors
///
/// Returns `OrderAdminError::NotFound` if the order does not exist.
#[instrument(skip(storage))]
pub async fn delete_order(storage: &dyn Storage, id: OrderId) -> Result<(), OrderAdminError> {
    storage.delete_order(id).await?;
    info!("Order deleted");
    Ok(())
}

/// Every purchaser with their order totals.
///
/// # Errors
///
/// Returns `UserAdminError::Repository` if storage fails.
pub async fn list_users(
    storage: &dyn Storage,
    currency: CurrencyCode,
) -> Result<Vec<UserListing>, UserAdminError> {
    let summaries = storage.list_users().await?;
    Ok(summaries
        .into_iter()
        .map(|summary| UserListing {
            id: summary.user.id,
            email: summary.user.email,
            order_count: summary.order_count,
            total_spent: summary.total_spent.display(currency),
            created_at: summary.user.created_at,
        })
        .collect())
}

/// Delete a purchaser and every order they placed.
///
/// # Errors
///
/// Returns `UserAdminError::NotFound` if the user does not exist.
#[instrument(skip(storage))]
pub async fn delete_user(storage: &dyn Storage, id: UserId) -> Result<(), UserAdminError> {
    storage.delete_user(id).await?;
    info!("User deleted");
    Ok(())
}

/// Images are served from `public/` under the storage root.
fn public_image_path(storage_root: &Path, image_path: &str) -> std::path::PathBuf {
    storage_root
        .join("public")
        .join(image_path.trim_start_matches('/'))
}

/// The row is already gone, so a leftover file is only logged.
async fn remove_stored_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove product file"),
    }
}
