//! In-memory storage for tests and local development.
//!
//! Every operation takes a single lock over the whole dataset, which gives the
//! same atomicity as one database transaction.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use digital_storefront_core::{
    Applicability, Cents, ChargeSucceeded, DiscountCode, DiscountCodeDraft, DiscountCodeId, DownloadVerification,
    DownloadVerificationId, Email, Order, OrderId, Product, ProductId, User, UserId,
};

use super::{
    ChargeRecord, DiscountCodeStore, DiscountCodeSummary, DownloadStore, FulfilledOrder,
    FulfillmentStore, OrderStore, OrderSummary, ProductStore, PurchasedProduct, RepositoryError,
    Storage, UserStore, UserSummary,
};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    products: HashMap<ProductId, Product>,
    discount_codes: HashMap<DiscountCodeId, DiscountCode>,
    orders: Vec<Order>,
    downloads: HashMap<DownloadVerificationId, DownloadVerification>,
    processed_events: HashSet<String>,
}

impl Tables {
    fn user_by_email(&self, email: &Email) -> Option<&User> {
        self.users.values().find(|u| &u.email == email)
    }
}

/// Storage that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_all: RwLock<bool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a database error.
    pub async fn set_fail_all(&self, fail: bool) {
        *self.fail_all.write().await = fail;
    }

    /// Number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Number of stored download tokens.
    pub async fn download_count(&self) -> usize {
        self.tables.read().await.downloads.len()
    }

    /// Insert a fully formed discount code, e.g. one that is already used up.
    pub async fn put_discount_code(&self, code: DiscountCode) {
        self.tables
            .write()
            .await
            .discount_codes
            .insert(code.id, code);
    }

    /// Insert a download token with arbitrary timestamps.
    pub async fn put_download_verification(&self, verification: DownloadVerification) {
        self.tables
            .write()
            .await
            .downloads
            .insert(verification.id, verification);
    }

    async fn check(&self) -> Result<(), RepositoryError> {
        if *self.fail_all.read().await {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        if tables.products.contains_key(&product.id) {
            return Err(RepositoryError::Conflict("product already exists".to_owned()));
        }
        tables.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        self.check().await?;
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn list_products(&self, available_only: bool) -> Result<Vec<Product>, RepositoryError> {
        self.check().await?;
        let tables = self.tables.read().await;
        let mut products: Vec<Product> = tables
            .products
            .values()
            .filter(|p| p.available || !available_only)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn set_product_available(
        &self,
        id: ProductId,
        available: bool,
    ) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        let product = tables
            .products
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        product.available = available;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        let stored = tables
            .products
            .get_mut(&product.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = product.clone();
        Ok(())
    }

    async fn delete_product(&self, id: ProductId) -> Result<Product, RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        if !tables.products.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.orders.iter().any(|o| o.product_id == id) {
            return Err(RepositoryError::Conflict("product has orders".to_owned()));
        }
        tables.downloads.retain(|_, d| d.product_id != id);
        for code in tables.discount_codes.values_mut() {
            if let Applicability::Products(ids) = &mut code.applicability {
                ids.remove(&id);
            }
        }
        tables.products.remove(&id).ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl DiscountCodeStore for MemoryStore {
    async fn insert_discount_code(
        &self,
        draft: &DiscountCodeDraft,
        now: DateTime<Utc>,
    ) -> Result<DiscountCode, RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        if tables.discount_codes.values().any(|c| c.code == draft.code) {
            return Err(RepositoryError::Conflict(
                "discount code already exists".to_owned(),
            ));
        }

        let code = DiscountCode {
            id: DiscountCodeId::generate(),
            code: draft.code.clone(),
            kind: draft.kind,
            amount: draft.amount,
            applicability: draft.applicability.clone(),
            active: true,
            expires_at: draft.expires_at,
            limit: draft.limit,
            uses: 0,
            created_at: now,
        };
        tables.discount_codes.insert(code.id, code.clone());
        Ok(code)
    }

    async fn get_discount_code(
        &self,
        id: DiscountCodeId,
    ) -> Result<Option<DiscountCode>, RepositoryError> {
        self.check().await?;
        Ok(self.tables.read().await.discount_codes.get(&id).cloned())
    }

    async fn find_discount_code(
        &self,
        code: &str,
    ) -> Result<Option<DiscountCode>, RepositoryError> {
        self.check().await?;
        Ok(self
            .tables
            .read()
            .await
            .discount_codes
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list_discount_codes(&self) -> Result<Vec<DiscountCodeSummary>, RepositoryError> {
        self.check().await?;
        let tables = self.tables.read().await;
        let mut summaries: Vec<DiscountCodeSummary> = tables
            .discount_codes
            .values()
            .map(|code| DiscountCodeSummary {
                code: code.clone(),
                order_count: tables
                    .orders
                    .iter()
                    .filter(|o| o.discount_code_id == Some(code.id))
                    .count()
                    .try_into()
                    .unwrap_or(i64::MAX),
            })
            .collect();
        summaries.sort_by(|a, b| b.code.created_at.cmp(&a.code.created_at));
        Ok(summaries)
    }

    async fn set_discount_code_active(
        &self,
        id: DiscountCodeId,
        active: bool,
    ) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        let code = tables
            .discount_codes
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        code.active = active;
        Ok(())
    }

    async fn delete_discount_code(&self, id: DiscountCodeId) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        if !tables.discount_codes.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.orders.iter().any(|o| o.discount_code_id == Some(id)) {
            return Err(RepositoryError::Conflict(
                "discount code has orders".to_owned(),
            ));
        }
        tables.discount_codes.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn has_purchased(
        &self,
        email: &Email,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError> {
        self.check().await?;
        let tables = self.tables.read().await;
        let Some(user) = tables.user_by_email(email) else {
            return Ok(false);
        };
        Ok(tables
            .orders
            .iter()
            .any(|o| o.user_id == user.id && o.product_id == product_id))
    }

    async fn orders_for_email(
        &self,
        email: &Email,
    ) -> Result<Vec<PurchasedProduct>, RepositoryError> {
        self.check().await?;
        let tables = self.tables.read().await;
        let Some(user) = tables.user_by_email(email) else {
            return Ok(Vec::new());
        };

        let mut purchases = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user.id)
            .map(|order| -> Result<PurchasedProduct, RepositoryError> {
                let product = tables.products.get(&order.product_id).cloned().ok_or_else(|| {
                    RepositoryError::DataCorruption(format!(
                        "order {} references missing product",
                        order.id
                    ))
                })?;
                Ok(PurchasedProduct {
                    order: order.clone(),
                    product,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        purchases.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
        Ok(purchases)
    }

    async fn list_orders(&self) -> Result<Vec<OrderSummary>, RepositoryError> {
        self.check().await?;
        let tables = self.tables.read().await;
        let mut summaries = tables
            .orders
            .iter()
            .map(|order| -> Result<OrderSummary, RepositoryError> {
                let product = tables.products.get(&order.product_id).ok_or_else(|| {
                    RepositoryError::DataCorruption(format!(
                        "order {} references missing product",
                        order.id
                    ))
                })?;
                let user = tables.users.get(&order.user_id).ok_or_else(|| {
                    RepositoryError::DataCorruption(format!(
                        "order {} references missing user",
                        order.id
                    ))
                })?;
                Ok(OrderSummary {
                    order: order.clone(),
                    product_name: product.name.clone(),
                    email: user.email.clone(),
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        summaries.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
        Ok(summaries)
    }

    async fn delete_order(&self, id: OrderId) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        let before = tables.orders.len();
        tables.orders.retain(|o| o.id != id);
        if tables.orders.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn list_users(&self) -> Result<Vec<UserSummary>, RepositoryError> {
        self.check().await?;
        let tables = self.tables.read().await;
        let mut summaries: Vec<UserSummary> = tables
            .users
            .values()
            .map(|user| {
                let orders = tables.orders.iter().filter(|o| o.user_id == user.id);
                let (count, spent) = orders.fold((0_i64, 0_i64), |(count, spent), o| {
                    (count + 1, spent + o.price_paid.as_i64())
                });
                UserSummary {
                    user: user.clone(),
                    order_count: count,
                    total_spent: Cents::new(spent),
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.user.created_at.cmp(&a.user.created_at));
        Ok(summaries)
    }

    async fn delete_user(&self, id: UserId) -> Result<(), RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;
        if tables.users.remove(&id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        tables.orders.retain(|o| o.user_id != id);
        Ok(())
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn insert_download_verification(
        &self,
        verification: &DownloadVerification,
    ) -> Result<(), RepositoryError> {
        self.check().await?;
        self.put_download_verification(verification.clone()).await;
        Ok(())
    }

    async fn get_download_verification(
        &self,
        id: DownloadVerificationId,
    ) -> Result<Option<DownloadVerification>, RepositoryError> {
        self.check().await?;
        Ok(self.tables.read().await.downloads.get(&id).cloned())
    }
}

#[async_trait]
impl FulfillmentStore for MemoryStore {
    async fn record_charge(
        &self,
        charge: &ChargeSucceeded,
        now: DateTime<Utc>,
    ) -> Result<ChargeRecord, RepositoryError> {
        self.check().await?;
        let mut tables = self.tables.write().await;

        if tables.processed_events.contains(&charge.event_id) {
            return Ok(ChargeRecord::Duplicate);
        }
        tables.processed_events.insert(charge.event_id.clone());

        let user = match tables.user_by_email(&charge.payer_email) {
            Some(user) => user.clone(),
            None => {
                let user = User {
                    id: UserId::generate(),
                    email: charge.payer_email.clone(),
                    created_at: now,
                };
                tables.users.insert(user.id, user.clone());
                user
            }
        };

        if tables
            .orders
            .iter()
            .any(|o| o.user_id == user.id && o.product_id == charge.product_id)
        {
            return Ok(ChargeRecord::AlreadyPurchased { user });
        }

        // A code deleted after checkout no longer exists to reference.
        let mut discount_over_limit = false;
        let mut discount_missing = false;
        let mut discount_code_id = None;
        if let Some(id) = charge.discount_code_id {
            match tables.discount_codes.get_mut(&id) {
                Some(code) => {
                    if code.is_exhausted() {
                        discount_over_limit = true;
                    } else {
                        code.uses += 1;
                    }
                    discount_code_id = Some(id);
                }
                None => discount_missing = true,
            }
        }

        let order = Order {
            id: OrderId::generate(),
            user_id: user.id,
            product_id: charge.product_id,
            price_paid: charge.amount_charged,
            discount_code_id,
            created_at: now,
        };
        tables.orders.push(order.clone());

        let download = DownloadVerification::issue(charge.product_id, now);
        tables.downloads.insert(download.id, download.clone());

        Ok(ChargeRecord::Recorded(FulfilledOrder {
            user,
            order,
            download,
            discount_over_limit,
            discount_missing,
        }))
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check().await
    }
}
