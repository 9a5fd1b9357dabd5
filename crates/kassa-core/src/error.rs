//! # Error Types
//!
//! Domain-specific error types for kassa-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kassa-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations (terminal)            │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kassa-db errors                                                       │
//! │  └── DbError          - Store failures, lock contention                │
//! │                                                                         │
//! │  kassa-ledger errors                                                   │
//! │  ├── LedgerError      - Rejected / ConcurrencyTimeout / Persistence    │
//! │  └── ApiError         - What the chat front end sees (serialized)      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError → ApiError            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every rejection names the concrete reason, because the operator reads
//! the message verbatim in the chat.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
///
/// None of these are retryable: repeating the same request against the same
/// state produces the same rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Operator lacks the role, is inactive, or is assigned elsewhere.
    #[error("Not permitted: {reason}")]
    Unauthorized { reason: String },

    /// Another shift is already open at this location.
    #[error("A shift is already open at location {location_id}")]
    ShiftAlreadyOpen { location_id: String },

    /// The shift has been closed; nothing more may be posted to it.
    #[error("Shift {shift_id} is already closed")]
    ShiftAlreadyClosed { shift_id: String },

    /// An entity id does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// No shift is open at the location the operator is working at.
    #[error("No active shift at location {location_id}")]
    NoActiveShift { location_id: String },

    /// Not enough stock to complete the sale or write-off. No partial fill.
    ///
    /// ## User Workflow
    /// ```text
    /// Sell Beer × 5
    ///      │
    ///      ▼
    /// Lock product, read stock: 3
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Beer", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Chat shows: "only 3 of Beer in stock, requested 5"
    /// ```
    #[error("only {available} of {product} in stock, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Refund quantity exceeds what remains refundable on the original sale.
    #[error("only {refundable} left to refund on transaction {transaction_id}, requested {requested}")]
    OverRefund {
        transaction_id: String,
        refundable: i64,
        requested: i64,
    },

    /// The refund target is not something that can be refunded here.
    #[error("Invalid refund: {reason}")]
    InvalidRefund { reason: String },

    /// Product exists but cannot be sold in this context.
    #[error("{product} is not available: {reason}")]
    ProductUnavailable { product: String, reason: String },

    /// An amount calculation left the representable range.
    #[error("Amount out of range while computing {context}")]
    AmountOverflow { context: &'static str },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        CoreError::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_refund(reason: impl Into<String>) -> Self {
        CoreError::InvalidRefund {
            reason: reason.into(),
        }
    }

    /// True for the "something does not exist" family.
    ///
    /// A missing active shift is reported in that family too: the operator
    /// asked for a shift that isn't there.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. } | CoreError::NoActiveShift { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any store access, so they never cost a lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Same key supplied twice in one request (e.g. a product counted twice).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            product: "Beer".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(err.to_string(), "only 3 of Beer in stock, requested 5");
    }

    #[test]
    fn test_over_refund_message() {
        let err = CoreError::OverRefund {
            transaction_id: "t-1".to_string(),
            refundable: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "only 2 left to refund on transaction t-1, requested 3"
        );
    }

    #[test]
    fn test_not_found_family() {
        assert!(CoreError::not_found("Shift", "s-1").is_not_found());
        assert!(CoreError::NoActiveShift {
            location_id: "loc".to_string()
        }
        .is_not_found());
        assert!(!CoreError::unauthorized("cashier").is_not_found());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: quantity must be positive");
    }
}
