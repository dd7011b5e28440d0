//! Download authorization tokens.
//!
//! A [`DownloadVerification`] authorizes retrieval of one product's file until
//! its expiry. Tokens are minted after every purchase and every order history
//! request, are never mutated and carry no "used" flag: a link keeps working
//! for anyone holding it until the validity window lapses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DownloadVerificationId, ProductId};

/// How long a freshly issued download link stays valid.
pub const VALIDITY_HOURS: i64 = 24;

/// Why a token cannot be redeemed.
///
/// The variants exist for logging. Callers must present both the same way to
/// the user so a probe cannot tell a never-issued token from a lapsed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token was ever issued with this identifier.
    #[error("download token not found")]
    NotFound,
    /// The token's validity window has passed.
    #[error("download token expired")]
    Expired,
}

impl TokenError {
    /// The message shown to the user for either failure.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        "This download link has expired. Request a new one from the orders page."
    }
}

/// A stored download authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadVerification {
    pub id: DownloadVerificationId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DownloadVerification {
    /// Mint a new token for `product_id` valid for [`VALIDITY_HOURS`] from `now`.
    #[must_use]
    pub fn issue(product_id: ProductId, now: DateTime<Utc>) -> Self {
        Self {
            id: DownloadVerificationId::generate(),
            product_id,
            created_at: now,
            expires_at: now + Duration::hours(VALIDITY_HOURS),
        }
    }

    /// Returns `true` while `now` is strictly before the expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Resolve a looked-up token into the product it unlocks.
///
/// # Errors
///
/// Returns [`TokenError::NotFound`] when `record` is `None` and
/// [`TokenError::Expired`] when `now` is at or past the expiry.
pub fn authorize(
    record: Option<&DownloadVerification>,
    now: DateTime<Utc>,
) -> Result<ProductId, TokenError> {
    let record = record.ok_or(TokenError::NotFound)?;
    if record.is_valid_at(now) {
        Ok(record.product_id)
    } else {
        Err(TokenError::Expired)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_issue_sets_window() {
        let product = ProductId::generate();
        let token = DownloadVerification::issue(product, issued_at());
        assert_eq!(token.product_id, product);
        assert_eq!(token.created_at, issued_at());
        assert_eq!(token.expires_at - token.created_at, Duration::hours(24));
    }

    #[test]
    fn test_issue_ids_unique() {
        let product = ProductId::generate();
        let a = DownloadVerification::issue(product, issued_at());
        let b = DownloadVerification::issue(product, issued_at());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_valid_just_before_expiry() {
        let token = DownloadVerification::issue(ProductId::generate(), issued_at());
        let almost = issued_at() + Duration::hours(23) + Duration::minutes(59);
        assert_eq!(authorize(Some(&token), almost), Ok(token.product_id));
    }

    #[test]
    fn test_expired_at_boundary() {
        let token = DownloadVerification::issue(ProductId::generate(), issued_at());
        let boundary = issued_at() + Duration::hours(24);
        assert_eq!(authorize(Some(&token), boundary), Err(TokenError::Expired));
        assert_eq!(
            authorize(Some(&token), boundary + Duration::days(3)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_reusable_within_window() {
        let token = DownloadVerification::issue(ProductId::generate(), issued_at());
        for minutes in [0, 1, 60, 600] {
            let at = issued_at() + Duration::minutes(minutes);
            assert!(authorize(Some(&token), at).is_ok());
        }
    }

    #[test]
    fn test_missing_record() {
        assert_eq!(authorize(None, issued_at()), Err(TokenError::NotFound));
    }

    #[test]
    fn test_errors_share_user_message() {
        assert_eq!(
            TokenError::NotFound.user_message(),
            TokenError::Expired.user_message()
        );
    }
}
