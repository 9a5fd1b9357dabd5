//! # Repository Module
//!
//! Database repository implementations for Kassa.
//!
//! ## Two Ways In
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Plain reads / admin writes               Atomic ledger work           │
//! │  ─────────────────────────                ──────────────────           │
//! │  db.shifts().get_by_id(id)                let mut tx = db.begin()?;    │
//! │       │                                   ShiftRepository::lock_...    │
//! │       ▼                                   CatalogRepository::lock_...  │
//! │  &self.pool (any connection)              LedgerRepository::insert_... │
//! │                                           tx.commit()                  │
//! │                                                │                        │
//! │                                                ▼                        │
//! │                                     &mut SqliteConnection (one tx)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Functions taking `&mut SqliteConnection` are associated functions so the
//! caller decides the transaction boundary. Functions generic over
//! `SqliteExecutor` work with either a pool or an open transaction.
//!
//! ## Locking Discipline
//! SQLite has no row locks. A `lock_*` function issues a no-op UPDATE on the
//! row it protects as the FIRST statement of the transaction. That takes the
//! database write lock before anything is read, so the read-validate-write
//! sequence that follows cannot interleave with another writer. The lock is
//! held until commit or rollback.
//!
//! ## Available Repositories
//!
//! - [`LocationRepository`](location::LocationRepository) - locations
//! - [`StaffRepository`](staff::StaffRepository) - staff profiles and roles
//! - [`CatalogRepository`](catalog::CatalogRepository) - categories, products, stock
//! - [`ShiftRepository`](shift::ShiftRepository) - shift lifecycle rows
//! - [`LedgerRepository`](ledger::LedgerRepository) - transactions, payments, report reads
//! - [`SnapshotRepository`](snapshot::SnapshotRepository) - closing reports and stock counts

pub mod catalog;
pub mod ledger;
pub mod location;
pub mod shift;
pub mod snapshot;
pub mod staff;
