//! # Shift Repository
//!
//! Shift rows: inserted OPEN, updated exactly once to CLOSED, never deleted.
//!
//! ## Invariant: One Open Shift per Location
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Till A: OpenShift(L)                 Till B: OpenShift(L)              │
//! │     │                                    │                              │
//! │     ▼                                    ▼                              │
//! │  LocationRepository::lock(L) ✓        LocationRepository::lock(L)      │
//! │     │                                    │ waits (busy_timeout)         │
//! │  current_in(L) → None                    │                              │
//! │  insert_open(...)                        │                              │
//! │  COMMIT ─────────────────────────────────┤                              │
//! │                                          ▼                              │
//! │                                     current_in(L) → Some → AlreadyOpen │
//! │                                                                         │
//! │  Backstop: UNIQUE INDEX ON shifts(location_id) WHERE status = 'open'   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use kassa_core::Shift;

/// The column named by SQLite when the open-shift index is violated.
pub const OPEN_SHIFT_UNIQUE_COLUMN: &str = "shifts.location_id";

#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
}

impl ShiftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository { pool }
    }

    pub async fn fetch<'e, E>(executor: E, id: &str) -> DbResult<Option<Shift>>
    where
        E: SqliteExecutor<'e>,
    {
        let shift = sqlx::query_as::<_, Shift>(
            r#"
            SELECT id, location_id, opened_by, opened_at, closed_by, closed_at, status, notes
            FROM shifts
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(shift)
    }

    /// The OPEN shift at a location, if any.
    pub async fn fetch_current<'e, E>(executor: E, location_id: &str) -> DbResult<Option<Shift>>
    where
        E: SqliteExecutor<'e>,
    {
        let shift = sqlx::query_as::<_, Shift>(
            r#"
            SELECT id, location_id, opened_by, opened_at, closed_by, closed_at, status, notes
            FROM shifts
            WHERE location_id = ?1 AND status = 'open'
            "#,
        )
        .bind(location_id)
        .fetch_optional(executor)
        .await?;

        Ok(shift)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Shift>> {
        Self::fetch(&self.pool, id).await
    }

    /// Read straight from the store; there is no cached "current shift".
    pub async fn current_for_location(&self, location_id: &str) -> DbResult<Option<Shift>> {
        Self::fetch_current(&self.pool, location_id).await
    }

    /// Most recent shifts at a location, newest first.
    pub async fn list_for_location(&self, location_id: &str, limit: u32) -> DbResult<Vec<Shift>> {
        let shifts = sqlx::query_as::<_, Shift>(
            r#"
            SELECT id, location_id, opened_by, opened_at, closed_by, closed_at, status, notes
            FROM shifts
            WHERE location_id = ?1
            ORDER BY opened_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(location_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(shifts)
    }

    /// Inserts a new OPEN shift. Call with the location lock held.
    pub async fn insert_open(conn: &mut SqliteConnection, shift: &Shift) -> DbResult<()> {
        debug!(id = %shift.id, location_id = %shift.location_id, "Inserting open shift");

        sqlx::query(
            r#"
            INSERT INTO shifts (id, location_id, opened_by, opened_at, status, notes)
            VALUES (?1, ?2, ?3, ?4, 'open', ?5)
            "#,
        )
        .bind(&shift.id)
        .bind(&shift.location_id)
        .bind(&shift.opened_by)
        .bind(shift.opened_at)
        .bind(&shift.notes)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Marks an OPEN shift CLOSED.
    ///
    /// ## Returns
    /// * `Ok(true)` - the shift was open and is now closed
    /// * `Ok(false)` - the shift exists but was already closed
    pub async fn close(
        conn: &mut SqliteConnection,
        id: &str,
        closed_by: &str,
        closed_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(id = %id, closed_by = %closed_by, "Closing shift");

        let result = sqlx::query(
            r#"
            UPDATE shifts
            SET status = 'closed', closed_by = ?2, closed_at = ?3
            WHERE id = ?1 AND status = 'open'
            "#,
        )
        .bind(id)
        .bind(closed_by)
        .bind(closed_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match Self::fetch(&mut *conn, id).await? {
            Some(_) => Ok(false),
            None => Err(DbError::not_found("Shift", id)),
        }
    }
}
