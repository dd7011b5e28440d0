//! Issuing and redeeming download links.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, instrument};

use digital_storefront_core::{
    DownloadVerification, DownloadVerificationId, ProductId, TokenError, download,
};

use crate::db::{RepositoryError, Storage};

/// Errors that can occur while redeeming a download link.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What a valid token unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadGrant {
    pub product_id: ProductId,
    /// Location of the file in product storage.
    pub file_path: String,
    /// Filename offered to the browser.
    pub filename: String,
}

/// Public URL that redeems `id`.
#[must_use]
pub fn download_url(base_url: &str, id: DownloadVerificationId) -> String {
    format!("{}/products/download/{id}", base_url.trim_end_matches('/'))
}

/// Mint and store a fresh token for `product_id`.
///
/// # Errors
///
/// Returns `RepositoryError` if the token cannot be stored.
#[instrument(skip(storage))]
pub async fn issue(
    storage: &dyn Storage,
    product_id: ProductId,
    now: DateTime<Utc>,
) -> Result<DownloadVerification, RepositoryError> {
    let verification = DownloadVerification::issue(product_id, now);
    storage.insert_download_verification(&verification).await?;
    debug!(token = %verification.id, expires_at = %verification.expires_at, "Download token issued");
    Ok(verification)
}

/// Resolve a token string into the file it unlocks.
///
/// Unparsable identifiers are treated as unknown tokens. The token is not
/// consumed and keeps working until it expires.
///
/// # Errors
///
/// Returns `DownloadError::Token` when the token is unknown or expired and
/// `DownloadError::Repository` when storage fails.
#[instrument(skip(storage))]
pub async fn validate(
    storage: &dyn Storage,
    token: &str,
    now: DateTime<Utc>,
) -> Result<DownloadGrant, DownloadError> {
    let Ok(id) = token.parse::<DownloadVerificationId>() else {
        return Err(TokenError::NotFound.into());
    };

    let record = storage.get_download_verification(id).await?;
    let product_id = download::authorize(record.as_ref(), now)?;

    // Tokens are removed with their product, so a miss here means a race
    // with deletion. Report it like an unknown token.
    let product = storage
        .get_product(product_id)
        .await?
        .ok_or(TokenError::NotFound)?;

    Ok(DownloadGrant {
        product_id,
        filename: product.download_filename(),
        file_path: product.file_path,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use digital_storefront_core::{Cents, Product};

    use super::*;
    use crate::db::{MemoryStore, ProductStore};

    async fn store_with_product() -> (MemoryStore, Product) {
        let store = MemoryStore::new();
        let product = Product {
            id: ProductId::generate(),
            name: "Brush Pack".to_owned(),
            description: "Forty brushes".to_owned(),
            price: Cents::new(1500),
            available: true,
            file_path: "products/brushes.abr".to_owned(),
            image_path: "/products/brushes.png".to_owned(),
            created_at: Utc::now(),
        };
        store.insert_product(&product).await.unwrap();
        (store, product)
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let (store, product) = store_with_product().await;
        let now = Utc::now();

        let token = issue(&store, product.id, now).await.unwrap();
        let grant = validate(&store, &token.id.to_string(), now + Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(grant.product_id, product.id);
        assert_eq!(grant.file_path, "products/brushes.abr");
        assert_eq!(grant.filename, "Brush Pack.abr");
    }

    #[tokio::test]
    async fn test_validate_expired_token() {
        let (store, product) = store_with_product().await;
        let now = Utc::now();
        let token = issue(&store, product.id, now).await.unwrap();

        let result = validate(&store, &token.id.to_string(), now + Duration::hours(24)).await;
        assert!(matches!(
            result,
            Err(DownloadError::Token(TokenError::Expired))
        ));
    }

    #[tokio::test]
    async fn test_validate_garbage_token_is_not_found() {
        let (store, _) = store_with_product().await;
        let result = validate(&store, "not-a-token", Utc::now()).await;
        assert!(matches!(
            result,
            Err(DownloadError::Token(TokenError::NotFound))
        ));
    }

    #[test]
    fn test_download_url_trims_trailing_slash() {
        let id = DownloadVerificationId::generate();
        assert_eq!(
            download_url("https://shop.test/", id),
            format!("https://shop.test/products/download/{id}")
        );
    }
}
