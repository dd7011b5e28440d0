//! Discount codes: eligibility and pricing.
//!
//! A [`DiscountCode`] is checked with [`DiscountCode::is_usable`] against the
//! product being bought and the current time, then
//! [`DiscountCode::discounted_amount`] computes what is actually charged.
//! Both are pure functions of their inputs; reading fresh state and bumping
//! the usage counter are the storage layer's job.
//!
//! Rounding always goes up to the next whole cent and a discounted item never
//! costs less than [`Cents::MIN_CHARGE`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Cents, CurrencyCode, DiscountCodeId, FieldErrors, ProductId};

/// Largest amount a percentage discount may carry.
pub const MAX_PERCENTAGE: u32 = 100;

/// How a discount code reduces the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    /// `amount` percent off the price.
    Percentage,
    /// `amount` whole currency units off the price.
    Fixed,
}

impl DiscountKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "PERCENTAGE",
            Self::Fixed => "FIXED",
        }
    }
}

impl std::fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiscountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERCENTAGE" => Ok(Self::Percentage),
            "FIXED" => Ok(Self::Fixed),
            _ => Err(format!("invalid discount kind: {s}")),
        }
    }
}

/// Which products a code may be applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "product_ids", rename_all = "snake_case")]
pub enum Applicability {
    /// Every product in the store.
    AllProducts,
    /// Only the listed products.
    Products(BTreeSet<ProductId>),
}

impl Applicability {
    /// Returns `true` if a purchase of `product_id` is in scope.
    #[must_use]
    pub fn covers(&self, product_id: ProductId) -> bool {
        match self {
            Self::AllProducts => true,
            Self::Products(ids) => ids.contains(&product_id),
        }
    }
}

/// Lifecycle status shown in the admin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountStatus {
    /// Enabled, not exhausted and not past its expiry.
    Active,
    /// Usage limit reached or expiry passed.
    Expired,
    /// Soft-disabled by an admin.
    Inactive,
}

/// A stored discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountCode {
    pub id: DiscountCodeId,
    /// The string customers type. Unique and case-sensitive.
    pub code: String,
    pub kind: DiscountKind,
    /// Percent for [`DiscountKind::Percentage`], whole currency units for
    /// [`DiscountKind::Fixed`].
    pub amount: u32,
    pub applicability: Applicability,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum number of completed orders that may use the code.
    pub limit: Option<u32>,
    /// Completed orders that used the code so far. Never decremented.
    pub uses: u32,
    pub created_at: DateTime<Utc>,
}

impl DiscountCode {
    /// Returns `true` if the usage limit has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.uses >= limit)
    }

    /// Returns `true` if the expiry is at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Decide whether the code may be applied to a purchase of `product_id`.
    ///
    /// A code is usable when it is active, covers the product, has uses left
    /// and has not expired. Exhaustion and expiry are inclusive: `uses ==
    /// limit` and `expires_at == now` both make the code unusable.
    #[must_use]
    pub fn is_usable(&self, product_id: ProductId, now: DateTime<Utc>) -> bool {
        self.active
            && self.applicability.covers(product_id)
            && !self.is_exhausted()
            && !self.is_expired_at(now)
    }

    /// Compute the price to charge after applying this code.
    ///
    /// The caller is responsible for having checked [`Self::is_usable`].
    ///
    /// - Percentage: `ceil(price - price * amount / 100)`
    /// - Fixed: `ceil(price - amount * 100)`
    ///
    /// The result is never below [`Cents::MIN_CHARGE`].
    #[must_use]
    pub fn discounted_amount(&self, price: Cents) -> Cents {
        let price = price.as_i64();
        let amount = i64::from(self.amount);

        let discounted = match self.kind {
            // ceil(p - x) == p - floor(x) for integer p
            DiscountKind::Percentage => {
                price.saturating_sub(price.saturating_mul(amount).div_euclid(100))
            }
            DiscountKind::Fixed => price.saturating_sub(amount.saturating_mul(100)),
        };

        Cents::new(discounted).max(Cents::MIN_CHARGE)
    }

    /// Status for the admin listing.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> DiscountStatus {
        if !self.active {
            DiscountStatus::Inactive
        } else if self.is_exhausted() || self.is_expired_at(now) {
            DiscountStatus::Expired
        } else {
            DiscountStatus::Active
        }
    }

    /// Human readable discount, e.g. `20%` or `$15`.
    #[must_use]
    pub fn display_amount(&self, currency: CurrencyCode) -> String {
        match self.kind {
            DiscountKind::Percentage => format!("{}%", self.amount),
            DiscountKind::Fixed => {
                Cents::new(i64::from(self.amount) * 100).display(currency)
            }
        }
    }
}

/// Admin input for creating a discount code, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDiscountCode {
    pub code: String,
    pub kind: DiscountKind,
    pub amount: i64,
    #[serde(default)]
    pub all_products: bool,
    #[serde(default)]
    pub product_ids: Option<Vec<ProductId>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// A validated discount code ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountCodeDraft {
    pub code: String,
    pub kind: DiscountKind,
    pub amount: u32,
    pub applicability: Applicability,
    pub expires_at: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl NewDiscountCode {
    /// Validate the input, collecting every problem by field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldErrors`] when:
    /// - `code` is blank
    /// - `amount` is below 1, or above 100 for a percentage
    /// - `expires_at` is not in the future
    /// - `limit` is below 1
    /// - products are listed together with `all_products`, or missing without it
    pub fn validate(self, now: DateTime<Utc>) -> Result<DiscountCodeDraft, FieldErrors> {
        let mut errors = FieldErrors::new();

        let code = self.code.trim().to_owned();
        if code.is_empty() {
            errors.add("code", "Code is required");
        }

        let amount = match u32::try_from(self.amount) {
            Ok(amount) if amount >= 1 => amount,
            _ => {
                errors.add("amount", "Amount must be at least 1");
                0
            }
        };
        if self.kind == DiscountKind::Percentage && amount > MAX_PERCENTAGE {
            errors.add(
                "amount",
                "Percentage discount must be less than or equal to 100",
            );
        }

        if let Some(expires_at) = self.expires_at
            && expires_at <= now
        {
            errors.add("expires_at", "Expiry date must be in the future");
        }

        let limit = match self.limit {
            None => None,
            Some(limit) => match u32::try_from(limit) {
                Ok(limit) if limit >= 1 => Some(limit),
                _ => {
                    errors.add("limit", "Limit must be at least 1");
                    None
                }
            },
        };

        let product_ids = self.product_ids.filter(|ids| !ids.is_empty());
        let applicability = match (self.all_products, product_ids) {
            (true, None) => Applicability::AllProducts,
            (true, Some(_)) => {
                errors.add(
                    "product_ids",
                    "Cannot select products when all products is selected",
                );
                Applicability::AllProducts
            }
            (false, Some(ids)) => Applicability::Products(ids.into_iter().collect()),
            (false, None) => {
                errors.add(
                    "product_ids",
                    "Must select products when All Products is not selected",
                );
                Applicability::Products(BTreeSet::new())
            }
        };

        errors.into_result(DiscountCodeDraft {
            code,
            kind: self.kind,
            amount,
            applicability,
            expires_at: self.expires_at,
            limit,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn code(kind: DiscountKind, amount: u32) -> DiscountCode {
        DiscountCode {
            id: DiscountCodeId::generate(),
            code: "SPRING".to_owned(),
            kind,
            amount,
            applicability: Applicability::AllProducts,
            active: true,
            expires_at: None,
            limit: None,
            uses: 0,
            created_at: now() - Duration::days(7),
        }
    }

    #[test]
    fn test_percentage_example() {
        let c = code(DiscountKind::Percentage, 20);
        assert_eq!(c.discounted_amount(Cents::new(1000)), Cents::new(800));
    }

    #[test]
    fn test_fixed_clamped_to_minimum() {
        let c = code(DiscountKind::Fixed, 15);
        assert_eq!(c.discounted_amount(Cents::new(1000)), Cents::MIN_CHARGE);
    }

    #[test]
    fn test_fixed_partial() {
        let c = code(DiscountKind::Fixed, 3);
        assert_eq!(c.discounted_amount(Cents::new(1999)), Cents::new(1699));
    }

    #[test]
    fn test_percentage_rounds_up() {
        // 999 * 15 / 100 = 149.85 off -> 849.15 -> 850
        let c = code(DiscountKind::Percentage, 15);
        assert_eq!(c.discounted_amount(Cents::new(999)), Cents::new(850));
        // 1 * 33 / 100 = 0.33 off -> 0.67 -> 1
        let c = code(DiscountKind::Percentage, 33);
        assert_eq!(c.discounted_amount(Cents::new(1)), Cents::new(1));
    }

    #[test]
    fn test_percentage_full_discount_clamped() {
        let c = code(DiscountKind::Percentage, 100);
        assert_eq!(c.discounted_amount(Cents::new(4999)), Cents::MIN_CHARGE);
    }

    #[test]
    fn test_percentage_result_within_bounds() {
        for price in [1_i64, 2, 7, 99, 100, 101, 1000, 4999, 123_457] {
            for amount in 1..=100 {
                let result = code(DiscountKind::Percentage, amount)
                    .discounted_amount(Cents::new(price))
                    .as_i64();
                assert!(
                    (1..=price).contains(&result),
                    "price {price} amount {amount} gave {result}"
                );
            }
        }
    }

    #[test]
    fn test_fixed_never_below_minimum() {
        for amount in [1_u32, 10, 1000, u32::MAX] {
            let result = code(DiscountKind::Fixed, amount).discounted_amount(Cents::new(500));
            assert!(result >= Cents::MIN_CHARGE);
        }
    }

    #[test]
    fn test_usable_when_all_conditions_hold() {
        let mut c = code(DiscountKind::Percentage, 10);
        c.limit = Some(5);
        c.uses = 4;
        c.expires_at = Some(now() + Duration::seconds(1));
        assert!(c.is_usable(ProductId::generate(), now()));
    }

    #[test]
    fn test_inactive_not_usable() {
        let mut c = code(DiscountKind::Percentage, 10);
        c.active = false;
        assert!(!c.is_usable(ProductId::generate(), now()));
    }

    #[test]
    fn test_exhausted_not_usable_regardless_of_other_fields() {
        let mut c = code(DiscountKind::Percentage, 10);
        c.limit = Some(5);
        c.uses = 5;
        assert!(!c.is_usable(ProductId::generate(), now()));

        c.expires_at = Some(now() + Duration::days(365));
        assert!(!c.is_usable(ProductId::generate(), now()));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let mut c = code(DiscountKind::Fixed, 1);
        c.expires_at = Some(now());
        assert!(!c.is_usable(ProductId::generate(), now()));
        assert!(c.is_usable(ProductId::generate(), now() - Duration::milliseconds(1)));
    }

    #[test]
    fn test_product_scope() {
        let included = ProductId::generate();
        let excluded = ProductId::generate();
        let mut c = code(DiscountKind::Percentage, 10);
        c.applicability = Applicability::Products(BTreeSet::from([included]));

        assert!(c.is_usable(included, now()));
        assert!(!c.is_usable(excluded, now()));
    }

    #[test]
    fn test_status() {
        let mut c = code(DiscountKind::Percentage, 10);
        assert_eq!(c.status(now()), DiscountStatus::Active);

        c.limit = Some(1);
        c.uses = 1;
        assert_eq!(c.status(now()), DiscountStatus::Expired);

        c.active = false;
        assert_eq!(c.status(now()), DiscountStatus::Inactive);
    }

    #[test]
    fn test_display_amount() {
        assert_eq!(
            code(DiscountKind::Percentage, 20).display_amount(CurrencyCode::USD),
            "20%"
        );
        assert_eq!(
            code(DiscountKind::Fixed, 15).display_amount(CurrencyCode::USD),
            "$15"
        );
    }

    #[test]
    fn test_kind_storage_roundtrip() {
        for kind in [DiscountKind::Percentage, DiscountKind::Fixed] {
            assert_eq!(kind.as_str().parse::<DiscountKind>(), Ok(kind));
        }
        assert!("BOGO".parse::<DiscountKind>().is_err());
    }

    fn new_code() -> NewDiscountCode {
        NewDiscountCode {
            code: "LAUNCH".to_owned(),
            kind: DiscountKind::Percentage,
            amount: 25,
            all_products: true,
            product_ids: None,
            expires_at: None,
            limit: None,
        }
    }

    #[test]
    fn test_validate_accepts_all_products() {
        let draft = new_code().validate(now()).unwrap();
        assert_eq!(draft.applicability, Applicability::AllProducts);
        assert_eq!(draft.amount, 25);
    }

    #[test]
    fn test_validate_accepts_product_list() {
        let product = ProductId::generate();
        let input = NewDiscountCode {
            all_products: false,
            product_ids: Some(vec![product, product]),
            limit: Some(3),
            expires_at: Some(now() + Duration::days(1)),
            ..new_code()
        };
        let draft = input.validate(now()).unwrap();
        assert_eq!(
            draft.applicability,
            Applicability::Products(BTreeSet::from([product]))
        );
        assert_eq!(draft.limit, Some(3));
    }

    #[test]
    fn test_validate_percentage_over_100() {
        let input = NewDiscountCode {
            amount: 101,
            ..new_code()
        };
        let errors = input.validate(now()).unwrap_err();
        assert_eq!(
            errors.get("amount"),
            ["Percentage discount must be less than or equal to 100"]
        );
    }

    #[test]
    fn test_validate_fixed_over_100_allowed() {
        let input = NewDiscountCode {
            kind: DiscountKind::Fixed,
            amount: 250,
            ..new_code()
        };
        assert!(input.validate(now()).is_ok());
    }

    #[test]
    fn test_validate_collects_every_error() {
        let input = NewDiscountCode {
            code: "  ".to_owned(),
            amount: 0,
            all_products: false,
            product_ids: Some(vec![]),
            expires_at: Some(now()),
            limit: Some(0),
            ..new_code()
        };
        let errors = input.validate(now()).unwrap_err();
        assert_eq!(errors.get("code").len(), 1);
        assert_eq!(errors.get("amount").len(), 1);
        assert_eq!(errors.get("expires_at").len(), 1);
        assert_eq!(errors.get("limit").len(), 1);
        assert_eq!(
            errors.get("product_ids"),
            ["Must select products when All Products is not selected"]
        );
    }

    #[test]
    fn test_validate_products_with_all_products() {
        let input = NewDiscountCode {
            product_ids: Some(vec![ProductId::generate()]),
            ..new_code()
        };
        let errors = input.validate(now()).unwrap_err();
        assert_eq!(
            errors.get("product_ids"),
            ["Cannot select products when all products is selected"]
        );
    }
}
