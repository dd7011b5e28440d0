//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `checkout` - Price quotes and the pre-payment guards
//! - `fulfillment` - Orders from settled charges
//! - `downloads` - Issuing and redeeming download links
//! - `order_history` - Emailing fresh links for past orders
//! - `admin` - Discount code and product management
//! - `email` - Transactional email over SMTP
//!
//! Services take their collaborators as trait objects and the current time as
//! an argument so they run unchanged against [`crate::db::MemoryStore`].

pub mod admin;
pub mod checkout;
pub mod downloads;
pub mod email;
pub mod fulfillment;
pub mod order_history;
