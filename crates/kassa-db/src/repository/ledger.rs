//! # Ledger Repository
//!
//! The append-only transaction log and its payments.
//!
//! ## Write Path (inside one store transaction)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CatalogRepository::lock_product   ← write lock taken here             │
//! │  LedgerRepository::refunded_quantity (refunds only, under the lock)    │
//! │  CatalogRepository::adjust_stock                                       │
//! │  LedgerRepository::insert_transaction                                  │
//! │  LedgerRepository::insert_payment                                      │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no update or delete here, and triggers refuse both at the store.
//!
//! ## Read Path
//! Report reads return [`LedgerEntry`] rows ordered by `created_at`, ties
//! broken by insertion order (`rowid`).

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use kassa_core::{LedgerEntry, LedgerTransaction, Payment};

#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    pub async fn insert_transaction(
        conn: &mut SqliteConnection,
        tx: &LedgerTransaction,
    ) -> DbResult<()> {
        debug!(
            id = %tx.id,
            kind = tx.kind.as_str(),
            shift_id = %tx.shift_id,
            product_id = %tx.product_id,
            quantity = tx.quantity,
            "Inserting ledger transaction"
        );

        sqlx::query(
            r#"
            INSERT INTO ledger_transactions (
                id, shift_id, kind, operator_id, product_id, quantity,
                unit_price_minor, payment_method, total_minor, refund_of, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.shift_id)
        .bind(tx.kind)
        .bind(&tx.operator_id)
        .bind(&tx.product_id)
        .bind(tx.quantity)
        .bind(tx.unit_price_minor)
        .bind(tx.payment_method)
        .bind(tx.total_minor)
        .bind(&tx.refund_of)
        .bind(&tx.notes)
        .bind(tx.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, transaction_id, method, amount_minor, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.transaction_id)
        .bind(payment.method)
        .bind(payment.amount_minor)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn fetch_transaction<'e, E>(executor: E, id: &str) -> DbResult<Option<LedgerTransaction>>
    where
        E: SqliteExecutor<'e>,
    {
        let tx = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, shift_id, kind, operator_id, product_id, quantity,
                   unit_price_minor, payment_method, total_minor, refund_of, notes, created_at
            FROM ledger_transactions
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(tx)
    }

    pub async fn get_transaction(&self, id: &str) -> DbResult<Option<LedgerTransaction>> {
        Self::fetch_transaction(&self.pool, id).await
    }

    pub async fn get_payment(&self, transaction_id: &str) -> DbResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, transaction_id, method, amount_minor, created_at
            FROM payments
            WHERE transaction_id = ?1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    /// Quantity already refunded against a sale.
    ///
    /// Read this with the product lock held, otherwise two refunds can both
    /// see the same remainder.
    pub async fn refunded_quantity<'e, E>(executor: E, sale_id: &str) -> DbResult<i64>
    where
        E: SqliteExecutor<'e>,
    {
        let refunded: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM ledger_transactions
            WHERE refund_of = ?1 AND kind = 'refund'
            "#,
        )
        .bind(sale_id)
        .fetch_one(executor)
        .await?;

        Ok(refunded)
    }

    /// Raw rows of one shift, oldest first.
    pub async fn list_for_shift(&self, shift_id: &str) -> DbResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            SELECT id, shift_id, kind, operator_id, product_id, quantity,
                   unit_price_minor, payment_method, total_minor, refund_of, notes, created_at
            FROM ledger_transactions
            WHERE shift_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Report Reads
    // =========================================================================

    /// Joined entries of one shift, oldest first.
    pub async fn entries_for_shift<'e, E>(executor: E, shift_id: &str) -> DbResult<Vec<LedgerEntry>>
    where
        E: SqliteExecutor<'e>,
    {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT t.id, t.shift_id, s.location_id, l.name AS location_name, t.kind,
                   t.operator_id, st.display_name AS operator_name,
                   t.product_id, p.name AS product_name, c.name AS category_name,
                   t.quantity, t.unit_price_minor, t.total_minor, t.payment_method,
                   t.refund_of, t.notes, t.created_at
            FROM ledger_transactions t
            JOIN shifts s ON s.id = t.shift_id
            JOIN locations l ON l.id = s.location_id
            JOIN staff st ON st.id = t.operator_id
            JOIN products p ON p.id = t.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE t.shift_id = ?1
            ORDER BY t.created_at ASC, t.rowid ASC
            "#,
        )
        .bind(shift_id)
        .fetch_all(executor)
        .await?;

        Ok(entries)
    }

    /// Joined entries at a location in `[from, to)`, across shifts.
    pub async fn entries_between<'e, E>(
        executor: E,
        location_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<LedgerEntry>>
    where
        E: SqliteExecutor<'e>,
    {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT t.id, t.shift_id, s.location_id, l.name AS location_name, t.kind,
                   t.operator_id, st.display_name AS operator_name,
                   t.product_id, p.name AS product_name, c.name AS category_name,
                   t.quantity, t.unit_price_minor, t.total_minor, t.payment_method,
                   t.refund_of, t.notes, t.created_at
            FROM ledger_transactions t
            JOIN shifts s ON s.id = t.shift_id
            JOIN locations l ON l.id = s.location_id
            JOIN staff st ON st.id = t.operator_id
            JOIN products p ON p.id = t.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE s.location_id = ?1 AND t.created_at >= ?2 AND t.created_at < ?3
            ORDER BY t.created_at ASC, t.rowid ASC
            "#,
        )
        .bind(location_id)
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await?;

        Ok(entries)
    }

    /// One joined entry. Read inside the posting transaction so the event
    /// published after commit describes exactly what was committed.
    pub async fn fetch_entry<'e, E>(executor: E, id: &str) -> DbResult<Option<LedgerEntry>>
    where
        E: SqliteExecutor<'e>,
    {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT t.id, t.shift_id, s.location_id, l.name AS location_name, t.kind,
                   t.operator_id, st.display_name AS operator_name,
                   t.product_id, p.name AS product_name, c.name AS category_name,
                   t.quantity, t.unit_price_minor, t.total_minor, t.payment_method,
                   t.refund_of, t.notes, t.created_at
            FROM ledger_transactions t
            JOIN shifts s ON s.id = t.shift_id
            JOIN locations l ON l.id = s.location_id
            JOIN staff st ON st.id = t.operator_id
            JOIN products p ON p.id = t.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE t.id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::shift::ShiftRepository;
    use crate::repository::test_support::{fixture, Fixture};
    use kassa_core::{new_id, PaymentMethod, Shift, ShiftStatus, TransactionKind};

    async fn open_shift(fx: &Fixture) -> Shift {
        let shift = Shift {
            id: new_id(),
            location_id: fx.location.id.clone(),
            opened_by: fx.manager.id.clone(),
            opened_at: Utc::now(),
            closed_by: None,
            closed_at: None,
            status: ShiftStatus::Open,
            notes: None,
        };
        let mut tx = fx.db.begin().await.unwrap();
        ShiftRepository::insert_open(&mut tx, &shift).await.unwrap();
        tx.commit().await.unwrap();
        shift
    }

    fn row(fx: &Fixture, shift: &Shift, kind: TransactionKind, qty: i64, refund_of: Option<&str>) -> LedgerTransaction {
        LedgerTransaction {
            id: new_id(),
            shift_id: shift.id.clone(),
            kind,
            operator_id: fx.cashier.id.clone(),
            product_id: fx.product.id.clone(),
            quantity: qty,
            unit_price_minor: 500,
            payment_method: PaymentMethod::Cash,
            total_minor: qty * 500,
            refund_of: refund_of.map(str::to_string),
            notes: None,
            created_at: Utc::now(),
        }
    }

    async fn post(fx: &Fixture, tx_row: &LedgerTransaction) {
        let mut tx = fx.db.begin().await.unwrap();
        LedgerRepository::insert_transaction(&mut tx, tx_row).await.unwrap();
        LedgerRepository::insert_payment(
            &mut tx,
            &Payment {
                id: new_id(),
                transaction_id: tx_row.id.clone(),
                method: tx_row.payment_method,
                amount_minor: tx_row.total_minor,
                created_at: tx_row.created_at,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_refunded_quantity_sums_refunds() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;

        let sale = row(&fx, &shift, TransactionKind::Sale, 4, None);
        post(&fx, &sale).await;
        post(&fx, &row(&fx, &shift, TransactionKind::Refund, 1, Some(&sale.id))).await;
        post(&fx, &row(&fx, &shift, TransactionKind::Refund, 2, Some(&sale.id))).await;

        let refunded = LedgerRepository::refunded_quantity(fx.db.pool(), &sale.id)
            .await
            .unwrap();
        assert_eq!(refunded, 3);
    }

    #[tokio::test]
    async fn test_entries_are_joined_and_ordered() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;

        let mut first = row(&fx, &shift, TransactionKind::Sale, 1, None);
        let mut second = row(&fx, &shift, TransactionKind::Sale, 2, None);
        // Same timestamp: insertion order decides.
        second.created_at = first.created_at;
        first.notes = Some("first".to_string());
        post(&fx, &first).await;
        post(&fx, &second).await;

        let entries = LedgerRepository::entries_for_shift(fx.db.pool(), &shift.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[1].id, second.id);
        assert_eq!(entries[0].product_name, "Beer");
        assert_eq!(entries[0].operator_name, "Timur");
        assert_eq!(entries[0].location_name, "Central");
        assert_eq!(entries[0].category_name.as_deref(), Some("Drinks"));
    }

    #[tokio::test]
    async fn test_entry_visible_inside_posting_tx() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;
        let sale = row(&fx, &shift, TransactionKind::Sale, 3, None);

        let mut tx = fx.db.begin().await.unwrap();
        LedgerRepository::insert_transaction(&mut tx, &sale).await.unwrap();
        let entry = LedgerRepository::fetch_entry(&mut *tx, &sale.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.total_minor, 1500);
        drop(tx);

        // Rolled back with the transaction.
        assert!(fx.db.ledger().get_transaction(&sale.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;
        let sale = row(&fx, &shift, TransactionKind::Sale, 1, None);
        post(&fx, &sale).await;

        let hit = LedgerRepository::entries_between(
            fx.db.pool(),
            &fx.location.id,
            sale.created_at,
            sale.created_at + chrono::Duration::seconds(1),
        )
        .await
        .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = LedgerRepository::entries_between(
            fx.db.pool(),
            &fx.location.id,
            sale.created_at - chrono::Duration::seconds(1),
            sale.created_at,
        )
        .await
        .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_rows_are_immutable() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;
        let sale = row(&fx, &shift, TransactionKind::Sale, 2, None);
        post(&fx, &sale).await;

        let update: DbError = sqlx::query("UPDATE ledger_transactions SET quantity = 1 WHERE id = ?1")
            .bind(&sale.id)
            .execute(fx.db.pool())
            .await
            .unwrap_err()
            .into();
        assert!(matches!(update, DbError::AppendOnly { .. }));

        let delete: DbError = sqlx::query("DELETE FROM payments")
            .execute(fx.db.pool())
            .await
            .unwrap_err()
            .into();
        assert!(matches!(delete, DbError::AppendOnly { .. }));

        let stored = fx.db.ledger().get_transaction(&sale.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 2);
    }

    #[tokio::test]
    async fn test_one_payment_per_transaction() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;
        let sale = row(&fx, &shift, TransactionKind::Sale, 1, None);
        post(&fx, &sale).await;

        let mut tx = fx.db.begin().await.unwrap();
        let err = LedgerRepository::insert_payment(
            &mut tx,
            &Payment {
                id: new_id(),
                transaction_id: sale.id.clone(),
                method: PaymentMethod::Card,
                amount_minor: 500,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_unique_on("payments.transaction_id"));
    }

    #[tokio::test]
    async fn test_refund_requires_link() {
        let fx = fixture().await;
        let shift = open_shift(&fx).await;
        let orphan = row(&fx, &shift, TransactionKind::Refund, 1, None);

        let mut tx = fx.db.begin().await.unwrap();
        let err = LedgerRepository::insert_transaction(&mut tx, &orphan)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }
}
