//! # kassa-core: Pure Business Logic for the Kassa Shift Ledger
//!
//! This crate holds the domain of a chat-operated point of sale: who may do
//! what, what a shift and a ledger row look like, how money is counted, and
//! how reports fold out of the ledger. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kassa Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                Chat front end (out of process)                  │   │
//! │  │    /open_shift ──► /sell ──► /refund ──► /report ──► /close     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ JSON actions                           │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   kassa-ledger: ShiftManager, TransactionLedger, Reports        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kassa-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌─────────────┐  ┌──────────┐  │   │
//! │  │   │   types   │  │   money   │  │ permissions │  │  report  │  │   │
//! │  │   │  Shift    │  │   Money   │  │ role table  │  │  folding │  │   │
//! │  │   │  Ledger   │  │ checked × │  │ ShiftPolicy │  │  5 views │  │   │
//! │  │   └───────────┘  └───────────┘  └─────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    kassa-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Shift, LedgerTransaction, Product, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//! - [`permissions`] - Static role table and location scoping
//! - [`report`] - Report shapes and pure aggregation
//!
//! ## Example Usage
//!
//! ```rust
//! use kassa_core::money::Money;
//!
//! let price = Money::from_minor(500);
//! let total = price.checked_mul_quantity(4).unwrap();
//! assert_eq!(total.to_string(), "20.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod permissions;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use permissions::{Action, ShiftPolicy};
pub use report::{ClosingReport, Report, ReportKind, ReportScope};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default upper bound on a single sale or refund line.
///
/// Catches a mistyped quantity (1000 instead of 10) before it locks a
/// product. Deployments override it through configuration.
pub const DEFAULT_MAX_LINE_QUANTITY: i64 = 9_999;

/// Upper bound on a single restock or write-off.
pub const MAX_STOCK_DELTA: i64 = 1_000_000;
