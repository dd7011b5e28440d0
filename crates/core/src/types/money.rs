//! Money in integer minor units.
//!
//! All arithmetic on prices happens on whole cents; decimals only appear when
//! formatting an amount for people.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An amount of money in the currency's minor unit (e.g. cents for USD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    /// The smallest amount that may ever be charged for an item.
    pub const MIN_CHARGE: Self = Self(1);

    /// Create an amount from a number of minor units.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Get the number of minor units.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// The amount in the currency's standard unit (e.g. dollars).
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Format for display in the given currency, e.g. `$10` or `$12.50`.
    ///
    /// Whole amounts drop their fraction digits.
    #[must_use]
    pub fn display(&self, currency: CurrencyCode) -> String {
        let amount = self.to_decimal();
        let sign = if amount.is_sign_negative() { "-" } else { "" };
        let amount = amount.abs();
        if amount.fract().is_zero() {
            format!("{sign}{}{}", currency.symbol(), amount.trunc())
        } else {
            format!("{sign}{}{:.2}", currency.symbol(), amount)
        }
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Cents {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}

/// ISO 4217 currency codes accepted by the payment processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Currency symbol used when formatting amounts.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }

    /// Lowercase ISO code, as sent to the payment processor.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::USD => "usd",
            Self::EUR => "eur",
            Self::GBP => "gbp",
            Self::CAD => "cad",
            Self::AUD => "aud",
        }
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(Self::USD),
            "eur" => Ok(Self::EUR),
            "gbp" => Ok(Self::GBP),
            "cad" => Ok(Self::CAD),
            "aud" => Ok(Self::AUD),
            _ => Err(format!("unsupported currency: {s}")),
        }
    }
}
