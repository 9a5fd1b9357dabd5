//! # Ledger Error Types
//!
//! Error types for shift, ledger and report operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Ledger Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │  Rejected           │  │ ConcurrencyTimeout│  │  Persistence     │  │
//! │  │  (CoreError)        │  │                  │  │  (DbError)       │  │
//! │  │                     │  │  lock wait or    │  │                  │  │
//! │  │  Unauthorized       │  │  pool wait ran   │  │  I/O, corrupt    │  │
//! │  │  AlreadyOpen/Closed │  │  out; nothing    │  │  rows, failed    │  │
//! │  │  NotFound           │  │  was written     │  │  commit          │  │
//! │  │  InsufficientStock  │  │                  │  │                  │  │
//! │  │  OverRefund ...     │  │                  │  │                  │  │
//! │  └─────────────────────┘  └──────────────────┘  └──────────────────┘  │
//! │        terminal                 retryable             retryable       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed operation never leaves a partial write behind: everything it
//! did lives in one store transaction that is rolled back on any error.

use kassa_core::CoreError;
use kassa_db::{DbError, OPEN_SHIFT_UNIQUE_COLUMN};
use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A business rule refused the operation. Surfaced verbatim.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    /// A lock or connection could not be obtained in time.
    #[error("Timed out waiting for the {operation} lock; nothing was written, try again")]
    ConcurrencyTimeout { operation: &'static str },

    /// The store failed underneath an otherwise valid operation.
    #[error("Storage failure: {0}")]
    Persistence(DbError),
}

impl LedgerError {
    /// Returns true if repeating the same request may succeed.
    ///
    /// ## Retryable Errors
    /// - Lock or pool timeouts
    /// - Store failures (the atomic commit guarantees no partial write)
    ///
    /// ## Non-Retryable Errors
    /// - Every business rejection
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyTimeout { .. } | LedgerError::Persistence(_)
        )
    }

    /// The business rejection, if that is what this is.
    pub fn rejection(&self) -> Option<&CoreError> {
        match self {
            LedgerError::Rejected(core) => Some(core),
            _ => None,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        if err.is_contention() {
            LedgerError::ConcurrencyTimeout {
                operation: "database",
            }
        } else {
            LedgerError::Persistence(err)
        }
    }
}

impl From<kassa_core::ValidationError> for LedgerError {
    fn from(err: kassa_core::ValidationError) -> Self {
        LedgerError::Rejected(CoreError::Validation(err))
    }
}

/// Maps a store "not found" to the business NotFound for `entity`.
///
/// ## Example
/// ```rust,ignore
/// let product = CatalogRepository::lock_product(&mut tx, id)
///     .await
///     .map_err(not_found_as("Product", id))?;
/// ```
pub(crate) fn not_found_as<'a>(
    entity: &'static str,
    id: &'a str,
) -> impl FnOnce(DbError) -> LedgerError + 'a {
    move |err| match err {
        DbError::NotFound { .. } => CoreError::not_found(entity, id).into(),
        other => other.into(),
    }
}

/// Maps the open-shift unique index backstop to `ShiftAlreadyOpen`.
pub(crate) fn open_shift_conflict<'a>(location_id: &'a str) -> impl FnOnce(DbError) -> LedgerError + 'a {
    move |err| {
        if err.is_unique_on(OPEN_SHIFT_UNIQUE_COLUMN) {
            CoreError::ShiftAlreadyOpen {
                location_id: location_id.to_string(),
            }
            .into()
        } else {
            err.into()
        }
    }
}
