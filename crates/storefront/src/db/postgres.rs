//! `PostgreSQL` implementation of the storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use digital_storefront_core::{
    Applicability, Cents, ChargeSucceeded, DiscountCode, DiscountCodeDraft, DiscountCodeId,
    DiscountKind, DownloadVerification, DownloadVerificationId, Email, Order, OrderId, Product,
    ProductId, User, UserId,
};

use super::{
    ChargeRecord, DiscountCodeStore, DiscountCodeSummary, DownloadStore, FulfilledOrder,
    FulfillmentStore, OrderStore, OrderSummary, ProductStore, PurchasedProduct, RepositoryError,
    Storage, UserStore, UserSummary,
};

/// Column list shared by every discount code query. Expands to a literal so
/// it can be used with `concat!`.
macro_rules! discount_code_select {
    () => {
        r"
        SELECT dc.id, dc.code, dc.discount_type, dc.discount_amount, dc.all_products,
               dc.is_active, dc.expires_at, dc.usage_limit, dc.uses, dc.created_at,
               ARRAY(
                   SELECT dcp.product_id
                   FROM storefront.discount_code_product dcp
                   WHERE dcp.discount_code_id = dc.id
               ) AS product_ids
        FROM storefront.discount_code dc
        "
    };
}

const PRODUCT_COLUMNS: &str = "id, name, description, price_in_cents, is_available, file_path, image_path, created_at";

/// Storage backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    price_in_cents: i64,
    is_available: bool,
    file_path: String,
    image_path: String,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::new(row.id),
            name: row.name,
            description: row.description,
            price: Cents::new(row.price_in_cents),
            available: row.is_available,
            file_path: row.file_path,
            image_path: row.image_path,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DiscountCodeRow {
    id: Uuid,
    code: String,
    discount_type: String,
    discount_amount: i64,
    all_products: bool,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    usage_limit: Option<i64>,
    uses: i64,
    created_at: DateTime<Utc>,
    product_ids: Vec<Uuid>,
}

#[derive(sqlx::FromRow)]
struct DiscountCodeSummaryRow {
    #[sqlx(flatten)]
    code: DiscountCodeRow,
    order_count: i64,
}

fn corrupt(field: &str, detail: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::DataCorruption(format!("invalid {field} in database: {detail}"))
}

impl TryFrom<DiscountCodeRow> for DiscountCode {
    type Error = RepositoryError;

    fn try_from(row: DiscountCodeRow) -> Result<Self, Self::Error> {
        let kind = row
            .discount_type
            .parse::<DiscountKind>()
            .map_err(|e| corrupt("discount_type", e))?;
        let amount = u32::try_from(row.discount_amount)
            .map_err(|e| corrupt("discount_amount", e))?;
        let limit = row
            .usage_limit
            .map(u32::try_from)
            .transpose()
            .map_err(|e| corrupt("usage_limit", e))?;
        let uses = u32::try_from(row.uses).map_err(|e| corrupt("uses", e))?;
        let applicability = if row.all_products {
            Applicability::AllProducts
        } else {
            Applicability::Products(row.product_ids.into_iter().map(ProductId::new).collect())
        };

        Ok(Self {
            id: DiscountCodeId::new(row.id),
            code: row.code,
            kind,
            amount,
            applicability,
            active: row.is_active,
            expires_at: row.expires_at,
            limit,
            uses,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId::new(row.id),
            email: Email::parse(&row.email).map_err(|e| corrupt("email", e))?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    product_id: Uuid,
    price_paid_in_cents: i64,
    discount_code_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId::new(row.id),
            user_id: UserId::new(row.user_id),
            product_id: ProductId::new(row.product_id),
            price_paid: Cents::new(row.price_paid_in_cents),
            discount_code_id: row.discount_code_id.map(DiscountCodeId::new),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PurchasedProductRow {
    #[sqlx(flatten)]
    order: OrderRow,
    product_name: String,
    product_description: String,
    product_price_in_cents: i64,
    product_is_available: bool,
    product_file_path: String,
    product_image_path: String,
    product_created_at: DateTime<Utc>,
}

impl From<PurchasedProductRow> for PurchasedProduct {
    fn from(row: PurchasedProductRow) -> Self {
        let product = Product {
            id: ProductId::new(row.order.product_id),
            name: row.product_name,
            description: row.product_description,
            price: Cents::new(row.product_price_in_cents),
            available: row.product_is_available,
            file_path: row.product_file_path,
            image_path: row.product_image_path,
            created_at: row.product_created_at,
        };
        Self {
            order: row.order.into(),
            product,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderSummaryRow {
    #[sqlx(flatten)]
    order: OrderRow,
    product_name: String,
    email: String,
}

impl TryFrom<OrderSummaryRow> for OrderSummary {
    type Error = RepositoryError;

    fn try_from(row: OrderSummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            email: Email::parse(&row.email).map_err(|e| corrupt("email", e))?,
            product_name: row.product_name,
            order: row.order.into(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserSummaryRow {
    #[sqlx(flatten)]
    user: UserRow,
    order_count: i64,
    total_spent_in_cents: i64,
}

impl TryFrom<UserSummaryRow> for UserSummary {
    type Error = RepositoryError;

    fn try_from(row: UserSummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user: User::try_from(row.user)?,
            order_count: row.order_count,
            total_spent: Cents::new(row.total_spent_in_cents),
        })
    }
}

#[derive(sqlx::FromRow)]
struct DownloadVerificationRow {
    id: Uuid,
    product_id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<DownloadVerificationRow> for DownloadVerification {
    fn from(row: DownloadVerificationRow) -> Self {
        Self {
            id: DownloadVerificationId::new(row.id),
            product_id: ProductId::new(row.product_id),
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Map constraint violations to `RepositoryError::Conflict`.
fn map_constraint(err: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err
        && (db_err.is_unique_violation() || db_err.is_foreign_key_violation())
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(err)
}

// =============================================================================
// Trait implementations
// =============================================================================

#[async_trait]
impl ProductStore for PgStore {
    async fn insert_product(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.product
                (id, name, description, price_in_cents, is_available, file_path, image_path, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.as_i64())
        .bind(product.available)
        .bind(&product.file_path)
        .bind(&product.image_path)
        .bind(product.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "product already exists"))?;

        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront.product WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    async fn list_products(&self, available_only: bool) -> Result<Vec<Product>, RepositoryError> {
        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM storefront.product
             WHERE is_available OR NOT $1
             ORDER BY name"
        ))
        .bind(available_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn set_product_available(
        &self,
        id: ProductId,
        available: bool,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE storefront.product SET is_available = $2 WHERE id = $1")
            .bind(id)
            .bind(available)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.product
            SET name = $2, description = $3, price_in_cents = $4, file_path = $5, image_path = $6
            WHERE id = $1
            ",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.as_i64())
        .bind(&product.file_path)
        .bind(&product.image_path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_product(&self, id: ProductId) -> Result<Product, RepositoryError> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "DELETE FROM storefront.product WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_constraint(e, "product has orders"))?;

        row.map(Product::from).ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl DiscountCodeStore for PgStore {
    async fn insert_discount_code(
        &self,
        draft: &DiscountCodeDraft,
        now: DateTime<Utc>,
    ) -> Result<DiscountCode, RepositoryError> {
        let id = DiscountCodeId::generate();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO storefront.discount_code
                (id, code, discount_type, discount_amount, all_products, is_active,
                 expires_at, usage_limit, uses, created_at)
            VALUES ($1, $2, $3, $4, $5, true, $6, $7, 0, $8)
            ",
        )
        .bind(id)
        .bind(&draft.code)
        .bind(draft.kind.as_str())
        .bind(i64::from(draft.amount))
        .bind(matches!(draft.applicability, Applicability::AllProducts))
        .bind(draft.expires_at)
        .bind(draft.limit.map(i64::from))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_constraint(e, "discount code already exists"))?;

        if let Applicability::Products(product_ids) = &draft.applicability {
            for product_id in product_ids {
                sqlx::query(
                    r"
                    INSERT INTO storefront.discount_code_product (discount_code_id, product_id)
                    VALUES ($1, $2)
                    ",
                )
                .bind(id)
                .bind(*product_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_constraint(e, "unknown product"))?;
            }
        }

        tx.commit().await?;

        Ok(DiscountCode {
            id,
            code: draft.code.clone(),
            kind: draft.kind,
            amount: draft.amount,
            applicability: draft.applicability.clone(),
            active: true,
            expires_at: draft.expires_at,
            limit: draft.limit,
            uses: 0,
            created_at: now,
        })
    }

    async fn get_discount_code(
        &self,
        id: DiscountCodeId,
    ) -> Result<Option<DiscountCode>, RepositoryError> {
        let row: Option<DiscountCodeRow> =
            sqlx::query_as(concat!(discount_code_select!(), "WHERE dc.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(DiscountCode::try_from).transpose()
    }

    async fn find_discount_code(
        &self,
        code: &str,
    ) -> Result<Option<DiscountCode>, RepositoryError> {
        let row: Option<DiscountCodeRow> =
            sqlx::query_as(concat!(discount_code_select!(), "WHERE dc.code = $1"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        row.map(DiscountCode::try_from).transpose()
    }

    async fn list_discount_codes(&self) -> Result<Vec<DiscountCodeSummary>, RepositoryError> {
        let rows: Vec<DiscountCodeSummaryRow> = sqlx::query_as(
            r"
            SELECT dc.id, dc.code, dc.discount_type, dc.discount_amount, dc.all_products,
                   dc.is_active, dc.expires_at, dc.usage_limit, dc.uses, dc.created_at,
                   ARRAY(
                       SELECT dcp.product_id
                       FROM storefront.discount_code_product dcp
                       WHERE dcp.discount_code_id = dc.id
                   ) AS product_ids,
                   (
                       SELECT COUNT(*)
                       FROM storefront.order o
                       WHERE o.discount_code_id = dc.id
                   ) AS order_count
            FROM storefront.discount_code dc
            ORDER BY dc.created_at DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DiscountCodeSummary {
                    code: DiscountCode::try_from(row.code)?,
                    order_count: row.order_count,
                })
            })
            .collect()
    }

    async fn set_discount_code_active(
        &self,
        id: DiscountCodeId,
        active: bool,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE storefront.discount_code SET is_active = $2 WHERE id = $1")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_discount_code(&self, id: DiscountCodeId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.discount_code WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_constraint(e, "discount code has orders"))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn has_purchased(
        &self,
        email: &Email,
        product_id: ProductId,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1
                FROM storefront.order o
                JOIN storefront.user u ON u.id = o.user_id
                WHERE u.email = $1 AND o.product_id = $2
            )
            ",
        )
        .bind(email)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn orders_for_email(
        &self,
        email: &Email,
    ) -> Result<Vec<PurchasedProduct>, RepositoryError> {
        let rows: Vec<PurchasedProductRow> = sqlx::query_as(
            r"
            SELECT o.id, o.user_id, o.product_id, o.price_paid_in_cents,
                   o.discount_code_id, o.created_at,
                   p.name AS product_name,
                   p.description AS product_description,
                   p.price_in_cents AS product_price_in_cents,
                   p.is_available AS product_is_available,
                   p.file_path AS product_file_path,
                   p.image_path AS product_image_path,
                   p.created_at AS product_created_at
            FROM storefront.order o
            JOIN storefront.user u ON u.id = o.user_id
            JOIN storefront.product p ON p.id = o.product_id
            WHERE u.email = $1
            ORDER BY o.created_at DESC
            ",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PurchasedProduct::from).collect())
    }

    async fn list_orders(&self) -> Result<Vec<OrderSummary>, RepositoryError> {
        let rows: Vec<OrderSummaryRow> = sqlx::query_as(
            r"
            SELECT o.id, o.user_id, o.product_id, o.price_paid_in_cents,
                   o.discount_code_id, o.created_at,
                   p.name AS product_name,
                   u.email
            FROM storefront.order o
            JOIN storefront.user u ON u.id = o.user_id
            JOIN storefront.product p ON p.id = o.product_id
            ORDER BY o.created_at DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderSummary::try_from).collect()
    }

    async fn delete_order(&self, id: OrderId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM storefront.order WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn list_users(&self) -> Result<Vec<UserSummary>, RepositoryError> {
        let rows: Vec<UserSummaryRow> = sqlx::query_as(
            r"
            SELECT u.id, u.email, u.created_at,
                   COUNT(o.id) AS order_count,
                   COALESCE(SUM(o.price_paid_in_cents), 0)::BIGINT AS total_spent_in_cents
            FROM storefront.user u
            LEFT JOIN storefront.order o ON o.user_id = u.id
            GROUP BY u.id
            ORDER BY u.created_at DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserSummary::try_from).collect()
    }

    async fn delete_user(&self, id: UserId) -> Result<(), RepositoryError> {
        // Orders cascade with the user.
        let result = sqlx::query("DELETE FROM storefront.user WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl DownloadStore for PgStore {
    async fn insert_download_verification(
        &self,
        verification: &DownloadVerification,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO storefront.download_verification (id, product_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(verification.id)
        .bind(verification.product_id)
        .bind(verification.created_at)
        .bind(verification.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_download_verification(
        &self,
        id: DownloadVerificationId,
    ) -> Result<Option<DownloadVerification>, RepositoryError> {
        let row: Option<DownloadVerificationRow> = sqlx::query_as(
            r"
            SELECT id, product_id, created_at, expires_at
            FROM storefront.download_verification
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DownloadVerification::from))
    }
}

#[async_trait]
impl FulfillmentStore for PgStore {
    async fn record_charge(
        &self,
        charge: &ChargeSucceeded,
        now: DateTime<Utc>,
    ) -> Result<ChargeRecord, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r"
            INSERT INTO storefront.processed_webhook_event (event_id, processed_at)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(&charge.event_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ChargeRecord::Duplicate);
        }

        // No-op update so RETURNING yields the existing row on conflict.
        let user_row: UserRow = sqlx::query_as(
            r"
            INSERT INTO storefront.user (id, email, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, created_at
            ",
        )
        .bind(UserId::generate())
        .bind(&charge.payer_email)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let user = User::try_from(user_row)?;

        // Lock the code so an admin delete cannot slip in before the insert.
        let discount_code_id: Option<Uuid> = match charge.discount_code_id {
            Some(id) => {
                sqlx::query_scalar(
                    "SELECT id FROM storefront.discount_code WHERE id = $1 FOR UPDATE",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => None,
        };
        let discount_missing = charge.discount_code_id.is_some() && discount_code_id.is_none();

        let order_row: Option<OrderRow> = sqlx::query_as(
            r"
            INSERT INTO storefront.order
                (id, user_id, product_id, price_paid_in_cents, discount_code_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, product_id) DO NOTHING
            RETURNING id, user_id, product_id, price_paid_in_cents, discount_code_id, created_at
            ",
        )
        .bind(OrderId::generate())
        .bind(user.id)
        .bind(charge.product_id)
        .bind(charge.amount_charged.as_i64())
        .bind(discount_code_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order_row) = order_row else {
            tx.commit().await?;
            return Ok(ChargeRecord::AlreadyPurchased { user });
        };

        let mut discount_over_limit = false;
        if let Some(discount_code_id) = discount_code_id {
            let bumped = sqlx::query(
                r"
                UPDATE storefront.discount_code
                SET uses = uses + 1
                WHERE id = $1 AND (usage_limit IS NULL OR uses < usage_limit)
                ",
            )
            .bind(discount_code_id)
            .execute(&mut *tx)
            .await?;
            discount_over_limit = bumped.rows_affected() == 0;
        }

        let download = DownloadVerification::issue(charge.product_id, now);
        sqlx::query(
            r"
            INSERT INTO storefront.download_verification (id, product_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(download.id)
        .bind(download.product_id)
        .bind(download.created_at)
        .bind(download.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ChargeRecord::Recorded(FulfilledOrder {
            user,
            order: order_row.into(),
            download,
            discount_over_limit,
            discount_missing,
        }))
    }
}

#[async_trait]
impl Storage for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
