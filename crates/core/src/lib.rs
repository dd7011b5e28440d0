//! Digital Storefront Core - Domain types and business rules.
//!
//! This crate provides the pieces shared by every Digital Storefront component:
//! - `storefront` - Public storefront, payment webhook and admin listeners
//! - `cli` - Command-line tools for migrations and catalogue management
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Every rule that decides money or access lives here
//! so it can be tested without infrastructure.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, emails, money and field errors
//! - [`discount`] - Discount code eligibility and price computation
//! - [`download`] - Time-limited download authorization tokens
//! - [`product`] - Product records as seen by checkout and downloads
//! - [`order`] - Orders, purchasers and payment confirmations

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod discount;
pub mod download;
pub mod order;
pub mod product;
pub mod types;

pub use discount::{
    Applicability, DiscountCode, DiscountCodeDraft, DiscountKind, DiscountStatus, NewDiscountCode,
};
pub use download::{DownloadVerification, TokenError};
pub use order::{ChargeSucceeded, Order, User};
pub use product::{NewProduct, Product, ProductDraft};
pub use types::*;
