//! # Shift Manager
//!
//! Opens and closes shifts, the gate every ledger posting passes through.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   open_shift(location, operator)                                       │
//! │        │  authorize ──► lock location ──► no OPEN shift? ──► insert    │
//! │        ▼                                                                │
//! │   ┌─────────┐   post_sale / post_refund only while OPEN                │
//! │   │  OPEN   │                                                          │
//! │   └────┬────┘                                                          │
//! │        │  close_shift(shift, operator, counted)                        │
//! │        │  lock location ──► mark CLOSED ──► build report               │
//! │        │  ──► store report + stock snapshots ──► commit (one unit)     │
//! │        ▼                                                                │
//! │   ┌─────────┐                                                          │
//! │   │ CLOSED  │   terminal; the store refuses any further update         │
//! │   └─────────┘                                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Open and close both take the location's write lock before checking
//! anything, so two racing opens serialize and the second sees the first's
//! shift. The partial unique index on open shifts backs this up.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use kassa_core::permissions::authorize;
use kassa_core::report::{self, ClosingReport};
use kassa_core::validation::{validate_counted_stock, validate_notes};
use kassa_core::{
    new_id, Action, CoreError, CountedStock, Shift, ShiftStatus, StaffProfile, StockSnapshot,
};
use kassa_db::{
    CatalogRepository, Database, DbError, LedgerRepository, LocationRepository, ShiftRepository,
    SnapshotRepository,
};

use crate::config::ServiceSettings;
use crate::error::{not_found_as, open_shift_conflict, LedgerError, LedgerResult};
use crate::lock::bounded;
use crate::sink::{EventPublisher, LedgerEvent};

/// Upper bound for [`ShiftManager::list_shifts`].
pub const MAX_SHIFT_LIST: u32 = 100;

/// A closed shift together with the snapshot stored alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedShift {
    pub shift: Shift,
    pub report: ClosingReport,
}

#[derive(Debug, Clone)]
pub struct ShiftManager {
    db: Database,
    settings: Arc<ServiceSettings>,
    events: EventPublisher,
}

impl ShiftManager {
    pub fn new(db: Database, settings: Arc<ServiceSettings>, events: EventPublisher) -> Self {
        ShiftManager {
            db,
            settings,
            events,
        }
    }

    /// Opens a shift at `location_id`.
    ///
    /// ## Errors
    /// - `Unauthorized` - role or policy forbids it, or wrong location
    /// - `NotFound` - no such location
    /// - `ShiftAlreadyOpen` - the location already has an OPEN shift
    pub async fn open_shift(
        &self,
        location_id: &str,
        operator: &StaffProfile,
        notes: Option<&str>,
    ) -> LedgerResult<Shift> {
        authorize(operator, Action::OpenShift, Some(location_id), &self.settings.policy)?;
        let notes = validate_notes(notes)?;

        let (mut tx, location) = bounded(self.settings.lock_timeout, "location", async {
            let mut tx = self.db.begin().await?;
            let location = LocationRepository::lock(&mut tx, location_id)
                .await
                .map_err(not_found_as("Location", location_id))?;
            Ok::<_, LedgerError>((tx, location))
        })
        .await?;

        if !location.is_active {
            return Err(CoreError::unauthorized(format!("location {} is inactive", location.name)).into());
        }

        if let Some(existing) = ShiftRepository::fetch_current(&mut *tx, location_id).await? {
            debug!(shift_id = %existing.id, location_id = %location_id, "Open shift already present");
            return Err(CoreError::ShiftAlreadyOpen {
                location_id: location_id.to_string(),
            }
            .into());
        }

        let shift = Shift {
            id: new_id(),
            location_id: location_id.to_string(),
            opened_by: operator.id.clone(),
            opened_at: Utc::now(),
            closed_by: None,
            closed_at: None,
            status: ShiftStatus::Open,
            notes,
        };

        ShiftRepository::insert_open(&mut tx, &shift)
            .await
            .map_err(open_shift_conflict(location_id))?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            shift_id = %shift.id,
            location = %location.name,
            operator = %operator.display_name,
            "Shift opened"
        );

        self.events.publish(LedgerEvent::ShiftOpened {
            shift: shift.clone(),
            location_name: location.name,
            operator_name: operator.display_name.clone(),
        });

        Ok(shift)
    }

    /// Closes a shift and stores its closing snapshot in the same unit.
    ///
    /// `counted` carries physically counted stock; products left out are
    /// snapshotted with their system quantity only.
    ///
    /// ## Errors
    /// - `NotFound` - no such shift, or a counted product is not stocked here
    /// - `ShiftAlreadyClosed` - someone closed it first
    /// - `Unauthorized` - role or policy forbids it, or wrong location
    pub async fn close_shift(
        &self,
        shift_id: &str,
        operator: &StaffProfile,
        counted: &[CountedStock],
    ) -> LedgerResult<ClosedShift> {
        validate_counted_stock(counted)?;

        let current = self.get_shift(shift_id).await?;
        ensure_open(&current)?;
        authorize(
            operator,
            Action::CloseShift,
            Some(&current.location_id),
            &self.settings.policy,
        )?;

        let (mut tx, location) = bounded(self.settings.lock_timeout, "location", async {
            let mut tx = self.db.begin().await?;
            let location = LocationRepository::lock(&mut tx, &current.location_id)
                .await
                .map_err(not_found_as("Location", &current.location_id))?;
            Ok::<_, LedgerError>((tx, location))
        })
        .await?;

        // Re-read under the lock; a racing close may have won.
        let shift = ShiftRepository::fetch(&mut *tx, shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;
        ensure_open(&shift)?;

        let stock_levels = CatalogRepository::stock_levels(&mut *tx, &shift.location_id).await?;
        if let Some(unknown) = counted
            .iter()
            .find(|c| !stock_levels.iter().any(|l| l.product_id == c.product_id))
        {
            return Err(CoreError::not_found("Product", &unknown.product_id).into());
        }

        let closed_at = Utc::now();
        if !ShiftRepository::close(&mut tx, shift_id, &operator.id, closed_at).await? {
            return Err(CoreError::ShiftAlreadyClosed {
                shift_id: shift_id.to_string(),
            }
            .into());
        }

        let entries = LedgerRepository::entries_for_shift(&mut *tx, shift_id).await?;
        let adjustments = CatalogRepository::adjustments_between(
            &mut *tx,
            &shift.location_id,
            shift.opened_at,
            closed_at,
        )
        .await?;

        let stock_counts: Vec<StockSnapshot> = stock_levels
            .iter()
            .map(|level| StockSnapshot {
                shift_id: shift_id.to_string(),
                product_id: level.product_id.clone(),
                system_quantity: level.stock_quantity,
                counted_quantity: counted
                    .iter()
                    .find(|c| c.product_id == level.product_id)
                    .map(|c| c.quantity),
            })
            .collect();

        let closing = ClosingReport {
            shift_id: shift_id.to_string(),
            location_id: shift.location_id.clone(),
            opened_by: shift.opened_by.clone(),
            opened_at: shift.opened_at,
            closed_by: operator.id.clone(),
            closed_at,
            general: report::general(&entries)?,
            financial: report::financial(&entries)?,
            inventory: report::inventory(&stock_levels, &entries, &adjustments)?,
            stock_counts,
        };

        SnapshotRepository::insert_report(&mut tx, &closing, closed_at).await?;
        for snapshot in &closing.stock_counts {
            SnapshotRepository::insert_stock_snapshot(&mut tx, snapshot).await?;
        }
        tx.commit().await.map_err(DbError::from)?;

        let closed = Shift {
            closed_by: Some(operator.id.clone()),
            closed_at: Some(closed_at),
            status: ShiftStatus::Closed,
            ..shift
        };

        info!(
            shift_id = %closed.id,
            location = %location.name,
            operator = %operator.display_name,
            transactions = entries.len(),
            net = %closing.financial.net,
            "Shift closed"
        );

        self.events.publish(LedgerEvent::ShiftClosed {
            shift: closed.clone(),
            location_name: location.name,
            operator_name: operator.display_name.clone(),
            report: Box::new(closing.clone()),
        });

        Ok(ClosedShift {
            shift: closed,
            report: closing,
        })
    }

    /// The OPEN shift at a location, read straight from the store.
    pub async fn current_shift(&self, location_id: &str) -> LedgerResult<Option<Shift>> {
        Ok(self.db.shifts().current_for_location(location_id).await?)
    }

    /// Like [`Self::current_shift`], but a missing shift is `NoActiveShift`.
    pub async fn require_current(&self, location_id: &str) -> LedgerResult<Shift> {
        self.current_shift(location_id).await?.ok_or_else(|| {
            CoreError::NoActiveShift {
                location_id: location_id.to_string(),
            }
            .into()
        })
    }

    pub async fn get_shift(&self, shift_id: &str) -> LedgerResult<Shift> {
        self.db
            .shifts()
            .get_by_id(shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", shift_id).into())
    }

    /// Most recent shifts at a location, newest first.
    pub async fn list_shifts(&self, location_id: &str, limit: u32) -> LedgerResult<Vec<Shift>> {
        let limit = limit.clamp(1, MAX_SHIFT_LIST);
        Ok(self.db.shifts().list_for_location(location_id, limit).await?)
    }

    /// The snapshot stored when the shift closed.
    pub async fn closing_report(&self, shift_id: &str) -> LedgerResult<ClosingReport> {
        self.db
            .snapshots()
            .get_report(shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ClosingReport", shift_id).into())
    }
}

pub(crate) fn ensure_open(shift: &Shift) -> LedgerResult<()> {
    if shift.is_open() {
        Ok(())
    } else {
        Err(CoreError::ShiftAlreadyClosed {
            shift_id: shift.id.clone(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_fixture, fixture, memory_events, settings, Fixture};
    use kassa_core::{PaymentMethod, ShiftPolicy};

    fn manager(db: &Database) -> ShiftManager {
        ShiftManager::new(db.clone(), settings(), EventPublisher::disabled())
    }

    #[tokio::test]
    async fn test_open_then_second_open_is_rejected() {
        let Fixture {
            db,
            location,
            manager: malika,
            cashier,
            ..
        } = fixture().await;
        let shifts = manager(&db);

        let shift = shifts.open_shift(&location.id, &cashier, Some("morning")).await.unwrap();
        assert!(shift.is_open());
        assert_eq!(shift.notes.as_deref(), Some("morning"));

        let err = shifts.open_shift(&location.id, &malika, None).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::ShiftAlreadyOpen { .. })));

        let current = shifts.current_shift(&location.id).await.unwrap().unwrap();
        assert_eq!(current.id, shift.id);
    }

    #[tokio::test]
    async fn test_cashier_open_and_close_follow_policy() {
        let Fixture {
            db,
            location,
            cashier,
            ..
        } = fixture().await;

        let strict = ServiceSettings {
            policy: ShiftPolicy {
                cashier_can_open_shift: false,
                cashier_can_close_shift: false,
            },
            ..ServiceSettings::default()
        };
        let shifts = ShiftManager::new(db.clone(), Arc::new(strict), EventPublisher::disabled());
        let err = shifts.open_shift(&location.id, &cashier, None).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::Unauthorized { .. })));

        // Default policy: cashier opens, but may not close.
        let shifts = manager(&db);
        let shift = shifts.open_shift(&location.id, &cashier, None).await.unwrap();
        let err = shifts.close_shift(&shift.id, &cashier, &[]).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::Unauthorized { .. })));
        assert!(shifts.get_shift(&shift.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_staff_of_another_location_is_rejected() {
        let Fixture { db, manager: malika, .. } = fixture().await;

        let other = crate::testing::location("Riverside");
        db.locations().insert(&other).await.unwrap();

        let err = manager(&db)
            .open_shift(&other.id, &malika, None)
            .await
            .unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_close_empty_shift_stores_snapshot() {
        let Fixture {
            db,
            location,
            manager: malika,
            product,
            ..
        } = fixture().await;
        let (events, workers, sink) = memory_events();
        let shifts = ShiftManager::new(db.clone(), settings(), events);

        let shift = shifts.open_shift(&location.id, &malika, None).await.unwrap();
        let counted = [CountedStock {
            product_id: product.id.clone(),
            quantity: 9,
        }];
        let closed = shifts.close_shift(&shift.id, &malika, &counted).await.unwrap();

        assert_eq!(closed.shift.status, ShiftStatus::Closed);
        assert_eq!(closed.shift.closed_by.as_deref(), Some(malika.id.as_str()));
        assert_eq!(closed.report.general.sale_count, 0);
        assert_eq!(closed.report.financial.net.minor(), 0);
        assert_eq!(closed.report.stock_counts.len(), 1);
        assert_eq!(closed.report.stock_counts[0].system_quantity, 10);
        assert_eq!(closed.report.stock_counts[0].counted_quantity, Some(9));

        let stored = shifts.closing_report(&shift.id).await.unwrap();
        assert_eq!(stored, closed.report);
        let snapshots = db.snapshots().stock_snapshots(&shift.id).await.unwrap();
        assert_eq!(snapshots, closed.report.stock_counts);

        let err = shifts.close_shift(&shift.id, &malika, &[]).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::ShiftAlreadyClosed { .. })));

        drop(shifts);
        workers.join().await;
        let kinds: Vec<_> = sink.events().iter().map(LedgerEvent::kind).collect();
        assert_eq!(kinds, vec!["shift_opened", "shift_closed"]);
    }

    #[tokio::test]
    async fn test_close_rejects_unknown_counted_product() {
        let Fixture {
            db,
            location,
            manager: malika,
            ..
        } = fixture().await;
        let shifts = manager(&db);
        let shift = shifts.open_shift(&location.id, &malika, None).await.unwrap();

        let counted = [CountedStock {
            product_id: "missing".to_string(),
            quantity: 1,
        }];
        let err = shifts.close_shift(&shift.id, &malika, &counted).await.unwrap_err();
        assert!(err.rejection().is_some_and(CoreError::is_not_found));

        // Nothing was written: the shift is still open.
        assert!(shifts.get_shift(&shift.id).await.unwrap().is_open());
        let err = shifts.closing_report(&shift.id).await.unwrap_err();
        assert!(err.rejection().is_some_and(CoreError::is_not_found));
    }

    #[tokio::test]
    async fn test_missing_shift_and_no_active_shift() {
        let Fixture {
            db,
            location,
            manager: malika,
            ..
        } = fixture().await;
        let shifts = manager(&db);

        let err = shifts.close_shift("nope", &malika, &[]).await.unwrap_err();
        assert_eq!(err.rejection(), Some(&CoreError::not_found("Shift", "nope")));

        let err = shifts.require_current(&location.id).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::NoActiveShift { .. })));
    }

    #[tokio::test]
    async fn test_list_shifts_newest_first() {
        let Fixture {
            db,
            location,
            manager: malika,
            ..
        } = fixture().await;
        let shifts = manager(&db);

        let first = shifts.open_shift(&location.id, &malika, None).await.unwrap();
        shifts.close_shift(&first.id, &malika, &[]).await.unwrap();
        let second = shifts.open_shift(&location.id, &malika, None).await.unwrap();

        let listed = shifts.list_shifts(&location.id, 10).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_yield_one_shift() {
        let Fixture {
            db,
            location,
            manager: malika,
            cashier,
            ..
        } = file_fixture().await;
        let shifts = manager(&db);

        let a = {
            let shifts = shifts.clone();
            let location_id = location.id.clone();
            tokio::spawn(async move { shifts.open_shift(&location_id, &malika, None).await })
        };
        let b = {
            let shifts = shifts.clone();
            let location_id = location.id.clone();
            tokio::spawn(async move { shifts.open_shift(&location_id, &cashier, None).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let opened = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(opened, 1);

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser,
            LedgerError::Rejected(CoreError::ShiftAlreadyOpen { .. })
        ));

        assert!(shifts.current_shift(&location.id).await.unwrap().is_some());
        assert_eq!(shifts.list_shifts(&location.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_includes_shift_totals() {
        let Fixture {
            db,
            location,
            manager: malika,
            product,
            ..
        } = fixture().await;
        let shifts = manager(&db);
        let ledger = crate::ledger::TransactionLedger::new(db.clone(), settings(), EventPublisher::disabled());

        let shift = shifts.open_shift(&location.id, &malika, None).await.unwrap();
        ledger
            .post_sale(
                crate::ledger::SaleRequest {
                    shift_id: shift.id.clone(),
                    product_id: product.id.clone(),
                    quantity: 3,
                    payment_method: PaymentMethod::Cash,
                    notes: None,
                },
                &malika,
            )
            .await
            .unwrap();

        let closed = shifts.close_shift(&shift.id, &malika, &[]).await.unwrap();
        assert_eq!(closed.report.general.sale_count, 1);
        assert_eq!(closed.report.financial.total_revenue.to_string(), "15.00");
        assert_eq!(closed.report.stock_counts[0].system_quantity, 7);
        assert_eq!(closed.report.stock_counts[0].counted_quantity, None);
    }
}
