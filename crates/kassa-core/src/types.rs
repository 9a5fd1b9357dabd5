//! # Domain Types
//!
//! Core domain types used throughout Kassa.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Location     │◄──│  StaffProfile   │   │    Category     │       │
//! │  │  id, name       │   │  role, chat_id  │   │  id, name       │       │
//! │  └────────┬────────┘   └─────────────────┘   └────────┬────────┘       │
//! │           │                                           │                 │
//! │           ├──────────────────────┐                    │                 │
//! │           ▼                      ▼                    ▼                 │
//! │  ┌─────────────────┐   ┌─────────────────────────────────────┐         │
//! │  │     Shift       │   │              Product                │         │
//! │  │  OPEN → CLOSED  │   │  price_minor, stock_quantity >= 0   │         │
//! │  └────────┬────────┘   └──────────────────┬──────────────────┘         │
//! │           │ owns                          │ referenced                  │
//! │           ▼                               ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────┐       │
//! │  │  LedgerTransaction (SALE | REFUND)  ── 1:1 ──►  Payment     │       │
//! │  │  append-only, refund_of → original SALE                     │       │
//! │  └─────────────────────────────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every entity id is a UUID v4 string. Timestamps are UTC and supplied by
//! the caller; nothing in this crate reads a clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::Money;

/// Generates a fresh entity id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Role
// =============================================================================

/// Staff role. Drives the permission table in [`crate::permissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Cashier,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Cashier => "cashier",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "cashier" => Ok(Role::Cashier),
            other => Err(ValidationError::InvalidFormat {
                field: "role".to_string(),
                reason: format!("unknown role '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Enumerations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Sale,
    Refund,
}

impl TransactionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Sale => "sale",
            TransactionKind::Refund => "refund",
        }
    }
}

/// How the customer settled. Ordered so reports list methods consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] =
        [PaymentMethod::Cash, PaymentMethod::Card, PaymentMethod::Transfer];

    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Identity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Location {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An operator known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StaffProfile {
    pub id: String,
    pub display_name: String,
    pub role: Role,
    /// External chat identity (unique).
    pub chat_id: i64,
    /// Home location. Admins usually have none.
    pub location_id: Option<String>,
    /// Deactivated instead of deleted once referenced by the ledger.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

/// A product stocked at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: String,
    pub category_id: Option<String>,
    pub location_id: String,
    pub name: String,
    /// Unit label shown next to quantities ("pcs", "kg", "bottle").
    pub unit: String,
    pub price_minor: i64,
    /// Never negative; also enforced by a CHECK constraint.
    pub stock_quantity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_minor(self.price_minor)
    }
}

/// Append-only record of a restock (+) or write-off (-).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockAdjustment {
    pub id: String,
    pub product_id: String,
    pub operator_id: String,
    pub delta: i64,
    pub reason: String,
    /// Purchase cost per unit, for restocks bought from a supplier.
    pub unit_cost_minor: Option<i64>,
    pub supplier: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Shift
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Shift {
    pub id: String,
    pub location_id: String,
    pub opened_by: String,
    pub opened_at: DateTime<Utc>,
    pub closed_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: ShiftStatus,
    pub notes: Option<String>,
}

impl Shift {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }
}

/// A physically counted quantity supplied when closing a shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedStock {
    pub product_id: String,
    pub quantity: i64,
}

/// System vs counted stock for one product at shift close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockSnapshot {
    pub shift_id: String,
    pub product_id: String,
    pub system_quantity: i64,
    pub counted_quantity: Option<i64>,
}

impl StockSnapshot {
    /// Counted minus system quantity, when a count was supplied.
    pub fn discrepancy(&self) -> Option<i64> {
        self.counted_quantity.map(|c| c - self.system_quantity)
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// One immutable ledger row.
///
/// ## Snapshot Pattern
/// `unit_price_minor` is frozen at posting time. Later price edits never
/// change what a past sale cost, and refunds reuse the original's price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerTransaction {
    pub id: String,
    pub shift_id: String,
    pub kind: TransactionKind,
    pub operator_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_minor: i64,
    pub payment_method: PaymentMethod,
    pub total_minor: i64,
    /// For refunds: the SALE being corrected.
    pub refund_of: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_minor(self.total_minor)
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_minor(self.unit_price_minor)
    }
}

/// Settlement of a transaction. Exactly one per transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub transaction_id: String,
    pub method: PaymentMethod,
    pub amount_minor: i64,
    pub created_at: DateTime<Utc>,
}

/// A ledger row joined with the names reports and exports need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerEntry {
    pub id: String,
    pub shift_id: String,
    pub location_id: String,
    pub location_name: String,
    pub kind: TransactionKind,
    pub operator_id: String,
    pub operator_name: String,
    pub product_id: String,
    pub product_name: String,
    pub category_name: Option<String>,
    pub quantity: i64,
    pub unit_price_minor: i64,
    pub total_minor: i64,
    pub payment_method: PaymentMethod,
    pub refund_of: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Current stock of one product, as read for the inventory report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockLevel {
    pub product_id: String,
    pub product_name: String,
    pub category_name: Option<String>,
    pub unit: String,
    pub price_minor: i64,
    pub stock_quantity: i64,
    pub is_active: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================
