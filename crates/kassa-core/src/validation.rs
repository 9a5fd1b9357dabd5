//! # Validation Module
//!
//! Input validation for ledger actions.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Chat front end                                               │
//! │  └── Menu choices, numeric keyboard                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Action deserialization + THIS MODULE                          │
//! │  └── Shape checks, before any lock is taken                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Ledger under lock                                             │
//! │  └── Stock, refundable quantity, shift state                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite constraints                                           │
//! │  └── CHECK stock >= 0, open-shift unique index, immutability triggers  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::types::CountedStock;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of free-text notes and refund reasons.
pub const MAX_NOTES_LEN: usize = 500;

/// Maximum length of names (products, categories, locations, staff).
pub const MAX_NAME_LEN: usize = 200;

// =============================================================================
// String Validators
// =============================================================================

/// Validates and trims a required name field.
///
/// ## Example
/// ```rust
/// use kassa_core::validation::validate_name;
///
/// assert_eq!(validate_name("product name", "  Beer ").unwrap(), "Beer");
/// assert!(validate_name("product name", "   ").is_err());
/// ```
pub fn validate_name(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(value.to_string())
}

/// Normalizes optional notes: trimmed, blank becomes `None`.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if notes.chars().count() > MAX_NOTES_LEN {
        return Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        });
    }

    Ok(Some(notes.to_string()))
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity for a sale or refund.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed the configured per-line maximum
///
/// ```text
/// validate_quantity(5, 9999)
///      │
///      ├── qty <= 0?    → "quantity must be positive"
///      ├── qty > max?   → "quantity must be between 1 and max"
///      └── OK → proceed to lock the product
/// ```
pub fn validate_quantity(qty: i64, max: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > max {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max,
        });
    }

    Ok(())
}

/// Validates a unit price in minor units. Zero is allowed (free items).
pub fn validate_price_minor(minor: i64) -> ValidationResult<()> {
    if minor < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "price".to_string(),
        });
    }

    Ok(())
}

/// Validates a restock/write-off delta.
///
/// Zero is rejected: an adjustment that changes nothing is an operator
/// mistake, and it would leave a meaningless row in an append-only table.
pub fn validate_stock_delta(delta: i64, max: i64) -> ValidationResult<()> {
    if delta == 0 {
        return Err(ValidationError::InvalidFormat {
            field: "delta".to_string(),
            reason: "must not be zero".to_string(),
        });
    }

    if delta.checked_abs().map_or(true, |d| d > max) {
        return Err(ValidationError::OutOfRange {
            field: "delta".to_string(),
            min: -max,
            max,
        });
    }

    Ok(())
}

/// Purchase details of a restock, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PurchaseDetails {
    pub unit_cost_minor: Option<i64>,
    pub supplier: Option<String>,
}

/// Validates the optional purchase cost and supplier of a stock change.
///
/// ## Rules
/// - Unit cost is non-negative
/// - Supplier is trimmed; blank becomes `None`
/// - Write-offs (negative delta) carry neither
pub fn validate_purchase(
    delta: i64,
    unit_cost_minor: Option<i64>,
    supplier: Option<&str>,
) -> ValidationResult<PurchaseDetails> {
    if let Some(cost) = unit_cost_minor {
        validate_price_minor(cost).map_err(|_| ValidationError::MustNotBeNegative {
            field: "unit cost".to_string(),
        })?;
    }

    let supplier = match supplier.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => Some(validate_name("supplier", name)?),
        None => None,
    };

    if delta < 0 && (unit_cost_minor.is_some() || supplier.is_some()) {
        return Err(ValidationError::InvalidFormat {
            field: "delta".to_string(),
            reason: "a write-off has no purchase cost or supplier".to_string(),
        });
    }

    Ok(PurchaseDetails {
        unit_cost_minor,
        supplier,
    })
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the counted stock handed in at shift close.
///
/// ## Rules
/// - Quantities are non-negative
/// - Each product appears at most once
pub fn validate_counted_stock(counts: &[CountedStock]) -> ValidationResult<()> {
    let mut seen = HashSet::with_capacity(counts.len());

    for count in counts {
        if count.quantity < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: format!("counted quantity for {}", count.product_id),
            });
        }
        if !seen.insert(count.product_id.as_str()) {
            return Err(ValidationError::Duplicate {
                field: "counted product".to_string(),
                value: count.product_id.clone(),
            });
        }
    }

    Ok(())
}

/// Validates a report range: `from` must be strictly before `to`.
pub fn validate_date_range(from: DateTime<Utc>, to: DateTime<Utc>) -> ValidationResult<()> {
    if from >= to {
        return Err(ValidationError::InvalidFormat {
            field: "range".to_string(),
            reason: "start must be before end".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn count(product_id: &str, quantity: i64) -> CountedStock {
        CountedStock {
            product_id: product_id.to_string(),
            quantity,
        }
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("name", " Cola 0.5 ").unwrap(), "Cola 0.5");
        assert!(validate_name("name", "").is_err());
        assert!(validate_name("name", &"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_notes() {
        assert_eq!(validate_notes(None).unwrap(), None);
        assert_eq!(validate_notes(Some("   ")).unwrap(), None);
        assert_eq!(
            validate_notes(Some(" damaged box ")).unwrap(),
            Some("damaged box".to_string())
        );
        assert!(validate_notes(Some(&"n".repeat(MAX_NOTES_LEN + 1))).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1, 999).is_ok());
        assert!(validate_quantity(999, 999).is_ok());

        assert!(matches!(
            validate_quantity(0, 999),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(validate_quantity(-1, 999).is_err());
        assert!(matches!(
            validate_quantity(1000, 999),
            Err(ValidationError::OutOfRange { max: 999, .. })
        ));
    }

    #[test]
    fn test_validate_price_minor() {
        assert!(validate_price_minor(0).is_ok());
        assert!(validate_price_minor(500).is_ok());
        assert!(validate_price_minor(-1).is_err());
    }

    #[test]
    fn test_validate_stock_delta() {
        assert!(validate_stock_delta(10, 1000).is_ok());
        assert!(validate_stock_delta(-10, 1000).is_ok());
        assert!(validate_stock_delta(0, 1000).is_err());
        assert!(validate_stock_delta(1001, 1000).is_err());
        assert!(validate_stock_delta(i64::MIN, 1000).is_err());
    }

    #[test]
    fn test_validate_purchase() {
        let details = validate_purchase(12, Some(320), Some("  Baltika ")).unwrap();
        assert_eq!(details.unit_cost_minor, Some(320));
        assert_eq!(details.supplier.as_deref(), Some("Baltika"));

        assert_eq!(validate_purchase(-2, None, Some("   ")).unwrap(), PurchaseDetails::default());
        assert!(validate_purchase(5, Some(-1), None).is_err());
        assert!(validate_purchase(-2, Some(320), None).is_err());
        assert!(validate_purchase(-2, None, Some("Baltika")).is_err());
    }

    #[test]
    fn test_validate_counted_stock() {
        assert!(validate_counted_stock(&[]).is_ok());
        assert!(validate_counted_stock(&[count("a", 0), count("b", 4)]).is_ok());
        assert!(validate_counted_stock(&[count("a", -1)]).is_err());
        assert!(matches!(
            validate_counted_stock(&[count("a", 1), count("a", 2)]),
            Err(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_validate_date_range() {
        let now = Utc::now();
        assert!(validate_date_range(now, now + Duration::hours(1)).is_ok());
        assert!(validate_date_range(now, now).is_err());
        assert!(validate_date_range(now, now - Duration::hours(1)).is_err());
    }
}
