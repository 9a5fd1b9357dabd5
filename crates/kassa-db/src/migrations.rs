//! # Database Migrations
//!
//! Embedded SQL migrations for Kassa.
//!
//! ## Schema Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_initial_schema.sql                                                │
//! │  ├── locations, staff                      (identity)                  │
//! │  ├── categories, products                  (catalog, CHECK stock >= 0) │
//! │  ├── shifts + partial unique index         (one OPEN per location)     │
//! │  ├── ledger_transactions, payments         (the ledger)                │
//! │  ├── stock_adjustments                     (restock / write-off)       │
//! │  └── shift_reports, stock_snapshots        (close snapshots)           │
//! │                                                                         │
//! │  002_append_only_guards.sql                                            │
//! │  └── triggers refusing UPDATE/DELETE on ledger rows and closed shifts  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations, each in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!(count = MIGRATOR.migrations.len(), "All migrations applied successfully");
    Ok(())
}

/// Returns (total_migrations, applied_migrations), for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
