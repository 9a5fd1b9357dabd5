//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Categorized by constraint / lock / trigger    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerError (kassa-ledger)                                            │
//! │       ├── Busy, PoolExhausted   → ConcurrencyTimeout (retryable)       │
//! │       ├── UniqueViolation on open shift → AlreadyOpen                  │
//! │       └── everything else       → Persistence                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// SQLite primary result code for "database is locked".
const SQLITE_BUSY: &str = "5";
/// Extended codes that share the BUSY primary code.
const SQLITE_BUSY_EXTENDED: [&str; 3] = ["261", "517", "773"];

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Second OPEN shift for a location (partial unique index)
    /// - Duplicate chat id, product name per location, category name
    /// - Second payment for one transaction
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A CHECK constraint rejected the row (e.g. stock below zero).
    #[error("Check constraint failed: {message}")]
    CheckViolation { message: String },

    /// An append-only trigger refused an UPDATE or DELETE.
    #[error("Refused by append-only guard: {message}")]
    AppendOnly { message: String },

    /// The write lock could not be acquired within the busy timeout.
    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Stored JSON could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Pool exhausted (all connections in use past the acquire timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// True when waiting longer might succeed: lock contention or a
    /// saturated pool. Nothing was written in either case.
    pub fn is_contention(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    /// True for a unique violation on the given `table.column`.
    pub fn is_unique_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.contains(column))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound        → DbError::NotFound
/// sqlx::Error::Database
///   ├── code 5 / "database is locked"     → DbError::Busy
///   ├── "UNIQUE constraint failed: t.c"   → DbError::UniqueViolation { field: "t.c" }
///   ├── "FOREIGN KEY constraint failed"   → DbError::ForeignKeyViolation
///   ├── "CHECK constraint failed"         → DbError::CheckViolation
///   └── "append-only: ..."                → DbError::AppendOnly
/// sqlx::Error::PoolTimedOut       → DbError::PoolExhausted
/// Other                           → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                let code = db_err.code().map(|c| c.to_string());

                let busy_code = code
                    .as_deref()
                    .is_some_and(|c| c == SQLITE_BUSY || SQLITE_BUSY_EXTENDED.contains(&c));

                if busy_code || msg.contains("database is locked") {
                    DbError::Busy(msg)
                } else if let Some(field) = msg.strip_prefix("UNIQUE constraint failed: ") {
                    DbError::UniqueViolation {
                        field: field.to_string(),
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation { message: msg }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation { message: msg }
                } else if msg.contains("append-only:") {
                    DbError::AppendOnly { message: msg }
                } else {
                    DbError::QueryFailed(msg)
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_classification() {
        assert!(DbError::Busy("database is locked".to_string()).is_contention());
        assert!(DbError::PoolExhausted.is_contention());
        assert!(!DbError::not_found("Shift", "s-1").is_contention());
    }

    #[test]
    fn test_unique_on_column() {
        let err = DbError::duplicate("shifts.location_id", "unknown");
        assert!(err.is_unique_on("shifts.location_id"));
        assert!(!err.is_unique_on("staff.chat_id"));
    }

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::PoolExhausted
        ));
    }
}
