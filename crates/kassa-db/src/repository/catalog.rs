//! # Catalog Repository
//!
//! Categories, products, and every change to a product's stock.
//!
//! ## Stock Mutation Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PostSale    ─┐                                                         │
//! │  PostRefund  ─┼──► lock_product(tx)  ── write lock, fresh read ──┐     │
//! │  Restock     ─┘                                                   │     │
//! │                                                                   ▼     │
//! │                    adjust_stock(tx, delta)                              │
//! │                    UPDATE ... WHERE stock_quantity + delta >= 0         │
//! │                    RETURNING stock_quantity                             │
//! │                          │                                              │
//! │                          └── CHECK (stock_quantity >= 0) as backstop    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing else writes `stock_quantity`. Product edits (price, name,
//! activation) never touch it.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use kassa_core::{Category, Product, StockAdjustment, StockLevel};

#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Categories
    // =========================================================================

    pub async fn insert_category(&self, category: &Category) -> DbResult<()> {
        debug!(id = %category.id, name = %category.name, "Inserting category");

        sqlx::query("INSERT INTO categories (id, name, is_active) VALUES (?1, ?2, ?3)")
            .bind(&category.id)
            .bind(&category.name)
            .bind(category.is_active)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_categories(&self) -> DbResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, is_active FROM categories WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(categories)
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        debug!(
            id = %product.id,
            name = %product.name,
            location_id = %product.location_id,
            "Inserting product"
        );

        sqlx::query(
            r#"
            INSERT INTO products (
                id, category_id, location_id, name, unit,
                price_minor, stock_quantity, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.category_id)
        .bind(&product.location_id)
        .bind(&product.name)
        .bind(&product.unit)
        .bind(product.price_minor)
        .bind(product.stock_quantity)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a product on any executor (pool or open transaction).
    pub async fn fetch_product<'e, E>(executor: E, id: &str) -> DbResult<Option<Product>>
    where
        E: SqliteExecutor<'e>,
    {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, category_id, location_id, name, unit,
                   price_minor, stock_quantity, is_active, created_at, updated_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(product)
    }

    pub async fn get_product(&self, id: &str) -> DbResult<Option<Product>> {
        Self::fetch_product(&self.pool, id).await
    }

    /// Active products at a location, by name.
    pub async fn list_for_location(&self, location_id: &str) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, category_id, location_id, name, unit,
                   price_minor, stock_quantity, is_active, created_at, updated_at
            FROM products
            WHERE location_id = ?1 AND is_active = 1
            ORDER BY name, id
            "#,
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Changes the price for future sales. Past ledger rows keep their own
    /// frozen unit price.
    pub async fn update_price(&self, id: &str, price_minor: i64, now: DateTime<Utc>) -> DbResult<()> {
        debug!(id = %id, price_minor, "Updating product price");

        let result = sqlx::query("UPDATE products SET price_minor = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(price_minor)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    // =========================================================================
    // Locked Stock Operations
    // =========================================================================

    /// Takes the write lock for a product and returns its current row.
    ///
    /// Must be the first write of the transaction; see the module docs of
    /// [`crate::repository`] for the discipline.
    pub async fn lock_product(conn: &mut SqliteConnection, id: &str) -> DbResult<Product> {
        let touched = sqlx::query("UPDATE products SET stock_quantity = stock_quantity WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Self::fetch_product(&mut *conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Applies a signed stock delta and returns the new quantity.
    ///
    /// The statement itself refuses to go below zero, so even a caller that
    /// skipped the locked read cannot oversell.
    pub async fn adjust_stock(
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let new_quantity: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + ?2,
                updated_at = ?3
            WHERE id = ?1 AND stock_quantity + ?2 >= 0
            RETURNING stock_quantity
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        new_quantity.ok_or_else(|| DbError::CheckViolation {
            message: format!("stock of product {} cannot change by {}", id, delta),
        })
    }

    pub async fn insert_adjustment(
        conn: &mut SqliteConnection,
        adjustment: &StockAdjustment,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustments
                (id, product_id, operator_id, delta, reason, unit_cost_minor, supplier, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&adjustment.id)
        .bind(&adjustment.product_id)
        .bind(&adjustment.operator_id)
        .bind(adjustment.delta)
        .bind(&adjustment.reason)
        .bind(adjustment.unit_cost_minor)
        .bind(&adjustment.supplier)
        .bind(adjustment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Report Reads
    // =========================================================================

    /// Current stock for every product at a location, active or not.
    pub async fn stock_levels<'e, E>(executor: E, location_id: &str) -> DbResult<Vec<StockLevel>>
    where
        E: SqliteExecutor<'e>,
    {
        let levels = sqlx::query_as::<_, StockLevel>(
            r#"
            SELECT p.id AS product_id,
                   p.name AS product_name,
                   c.name AS category_name,
                   p.unit,
                   p.price_minor,
                   p.stock_quantity,
                   p.is_active
            FROM products p
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE p.location_id = ?1
            ORDER BY p.name, p.id
            "#,
        )
        .bind(location_id)
        .fetch_all(executor)
        .await?;

        Ok(levels)
    }

    /// Adjustments at a location in `[from, to)`.
    pub async fn adjustments_between<'e, E>(
        executor: E,
        location_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<StockAdjustment>>
    where
        E: SqliteExecutor<'e>,
    {
        let adjustments = sqlx::query_as::<_, StockAdjustment>(
            r#"
            SELECT a.id, a.product_id, a.operator_id, a.delta, a.reason,
                   a.unit_cost_minor, a.supplier, a.created_at
            FROM stock_adjustments a
            JOIN products p ON p.id = a.product_id
            WHERE p.location_id = ?1 AND a.created_at >= ?2 AND a.created_at < ?3
            ORDER BY a.created_at, a.rowid
            "#,
        )
        .bind(location_id)
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await?;

        Ok(adjustments)
    }

    /// Adjustment history for one product, oldest first.
    pub async fn adjustments_for_product(&self, product_id: &str) -> DbResult<Vec<StockAdjustment>> {
        let adjustments = sqlx::query_as::<_, StockAdjustment>(
            r#"
            SELECT id, product_id, operator_id, delta, reason,
                   unit_cost_minor, supplier, created_at
            FROM stock_adjustments
            WHERE product_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(adjustments)
    }
}
