//! # Snapshot Repository
//!
//! What a shift looked like when it closed: the closing report as JSON and
//! one stock row per product (system quantity next to the counted one).
//! Both are written in the same transaction that flips the shift to CLOSED
//! and are never updated afterwards.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use kassa_core::{ClosingReport, StockSnapshot};

#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SnapshotRepository { pool }
    }

    pub async fn insert_report(
        conn: &mut SqliteConnection,
        report: &ClosingReport,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let json = report.to_json()?;
        debug!(shift_id = %report.shift_id, bytes = json.len(), "Storing closing report");

        sqlx::query("INSERT INTO shift_reports (shift_id, report_json, created_at) VALUES (?1, ?2, ?3)")
            .bind(&report.shift_id)
            .bind(json)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    pub async fn insert_stock_snapshot(
        conn: &mut SqliteConnection,
        snapshot: &StockSnapshot,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_snapshots (shift_id, product_id, system_quantity, counted_quantity)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&snapshot.shift_id)
        .bind(&snapshot.product_id)
        .bind(snapshot.system_quantity)
        .bind(snapshot.counted_quantity)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// The stored closing report of a shift, `None` while it is still open.
    pub async fn get_report(&self, shift_id: &str) -> DbResult<Option<ClosingReport>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT report_json FROM shift_reports WHERE shift_id = ?1")
                .bind(shift_id)
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some(json) => Ok(Some(ClosingReport::from_json(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn stock_snapshots(&self, shift_id: &str) -> DbResult<Vec<StockSnapshot>> {
        let rows = sqlx::query_as::<_, StockSnapshot>(
            r#"
            SELECT shift_id, product_id, system_quantity, counted_quantity
            FROM stock_snapshots
            WHERE shift_id = ?1
            ORDER BY product_id
            "#,
        )
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
