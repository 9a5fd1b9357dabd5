//! # Report Aggregator
//!
//! Builds the five report views for a shift or a date range. All reads for
//! one report happen inside a single read transaction, so the entries and
//! the stock they are shown against come from the same committed state.
//! Nothing here takes a write lock.

use chrono::Utc;
use tracing::debug;

use kassa_core::permissions::authorize;
use kassa_core::report::ReportInput;
use kassa_core::validation::validate_date_range;
use kassa_core::{Action, CoreError, Report, ReportKind, ReportScope, ShiftPolicy, StaffProfile};
use kassa_db::{CatalogRepository, Database, DbError, LedgerRepository, ShiftRepository};

use crate::error::LedgerResult;

#[derive(Debug, Clone)]
pub struct ReportAggregator {
    db: Database,
    policy: ShiftPolicy,
}

impl ReportAggregator {
    pub fn new(db: Database, policy: ShiftPolicy) -> Self {
        ReportAggregator { db, policy }
    }

    /// Builds one report view.
    ///
    /// A shift scope covers the shift's transactions; adjustments are taken
    /// from its open window (up to now while it is still open). A range
    /// scope is half-open, `from <= t < to`.
    pub async fn report(
        &self,
        operator: &StaffProfile,
        kind: ReportKind,
        scope: &ReportScope,
    ) -> LedgerResult<Report> {
        let input = self.gather(operator, scope).await?;
        let report = input.build(kind)?;

        debug!(
            kind = ?kind,
            entries = input.entries.len(),
            products = input.stock_levels.len(),
            "Report built"
        );
        Ok(report)
    }

    /// Reads everything a report over `scope` needs in one snapshot.
    pub async fn gather(&self, operator: &StaffProfile, scope: &ReportScope) -> LedgerResult<ReportInput> {
        match scope {
            ReportScope::Shift { shift_id } => {
                let shift = self
                    .db
                    .shifts()
                    .get_by_id(shift_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;
                authorize(operator, Action::ViewReport, Some(&shift.location_id), &self.policy)?;

                let mut tx = self.db.begin().await?;
                // Re-read inside the snapshot; the shift may have closed since.
                let shift = ShiftRepository::fetch(&mut *tx, shift_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;
                let entries = LedgerRepository::entries_for_shift(&mut *tx, shift_id).await?;
                let stock_levels = CatalogRepository::stock_levels(&mut *tx, &shift.location_id).await?;
                let until = shift.closed_at.unwrap_or_else(Utc::now);
                let adjustments = CatalogRepository::adjustments_between(
                    &mut *tx,
                    &shift.location_id,
                    shift.opened_at,
                    until,
                )
                .await?;
                tx.commit().await.map_err(DbError::from)?;

                Ok(ReportInput {
                    entries,
                    stock_levels,
                    adjustments,
                })
            }
            ReportScope::Range {
                location_id,
                from,
                to,
            } => {
                validate_date_range(*from, *to)?;
                authorize(operator, Action::ViewReport, Some(location_id), &self.policy)?;

                let mut tx = self.db.begin().await?;
                let entries = LedgerRepository::entries_between(&mut *tx, location_id, *from, *to).await?;
                let stock_levels = CatalogRepository::stock_levels(&mut *tx, location_id).await?;
                let adjustments =
                    CatalogRepository::adjustments_between(&mut *tx, location_id, *from, *to).await?;
                tx.commit().await.map_err(DbError::from)?;

                Ok(ReportInput {
                    entries,
                    stock_levels,
                    adjustments,
                })
            }
        }
    }
}
