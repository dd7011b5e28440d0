//! Core types for Digital Storefront.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod money;
pub mod validation;

pub use email::{Email, EmailError};
pub use id::*;
pub use money::{Cents, CurrencyCode};
pub use validation::FieldErrors;
