//! # kassa-ledger: Shift, Ledger and Report Services for Kassa
//!
//! The business workflows of the shift ledger, on top of `kassa-db`.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Kassa Service Layer                             │
//! │                                                                         │
//! │   JSON action (chat front end)                                         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  api::dispatch                                                   │  │
//! │  │  chat id ──► IdentityRegistry ──► StaffProfile                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ ShiftManager   │  │ Transaction    │  │  ReportAggregator      │    │
//! │  │                │  │ Ledger         │  │                        │    │
//! │  │ open / close   │  │ sale / refund  │  │ general, financial,    │    │
//! │  │ closing report │  │ restock        │  │ sales, refunds,        │    │
//! │  │ + snapshots    │  │ product lock   │  │ inventory              │    │
//! │  └───────┬────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │          │ after commit      │ after commit                             │
//! │          ▼                   ▼                                          │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  EventPublisher ──► audit lane  ──► FileAuditSink                │  │
//! │  │                 └─► export lane ──► JsonLinesExportSink          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`api`] - Inbound `Action` enum, responses, `ApiError`, dispatch
//! - [`config`] - TOML + environment configuration
//! - [`error`] - `LedgerError` taxonomy
//! - [`identity`] - Chat identity to staff profile
//! - [`ledger`] - Sales, refunds, restocks
//! - [`report`] - Report views over a shift or range
//! - [`shift`] - Shift lifecycle and closing snapshots
//! - [`sink`] - Audit and export sinks with background dispatch
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kassa_ledger::{spawn_sinks, Kassa, LedgerConfig};
//! use kassa_db::Database;
//!
//! let config = LedgerConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let (events, workers) = spawn_sinks(&config);
//!
//! let kassa = Kassa::new(db, config.service_settings(), events);
//! let shift = kassa.shifts().open_shift(&location_id, &manager, None).await?;
//!
//! // On shutdown: drop every handle, then let the sinks drain.
//! drop(kassa);
//! workers.join().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
mod lock;
pub mod report;
pub mod shift;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{dispatch, Action, ActionResponse, ApiError, ErrorCode, Outcome};
pub use config::{ConfigError, LedgerConfig, ServiceSettings};
pub use error::{LedgerError, LedgerResult};
pub use identity::IdentityRegistry;
pub use ledger::{RefundRequest, RestockRequest, Restocked, SaleRequest, TransactionLedger};
pub use report::ReportAggregator;
pub use shift::{ClosedShift, ShiftManager};
pub use sink::{
    EventPublisher, FileAuditSink, JsonLinesExportSink, LedgerEvent, LedgerSink, MemorySink,
    SinkError, SinkWorkers,
};

use std::sync::Arc;

use kassa_db::Database;
use tracing::info;

// =============================================================================
// Service Facade
// =============================================================================

/// Every service, sharing one store, one settings value and one publisher.
///
/// Cheap to clone; hand a clone to each request handler.
#[derive(Debug, Clone)]
pub struct Kassa {
    db: Database,
    settings: Arc<ServiceSettings>,
    shifts: ShiftManager,
    ledger: TransactionLedger,
    reports: ReportAggregator,
    identity: IdentityRegistry,
}

impl Kassa {
    pub fn new(db: Database, settings: ServiceSettings, events: EventPublisher) -> Self {
        let settings = Arc::new(settings);
        Kassa {
            shifts: ShiftManager::new(db.clone(), Arc::clone(&settings), events.clone()),
            ledger: TransactionLedger::new(db.clone(), Arc::clone(&settings), events),
            reports: ReportAggregator::new(db.clone(), settings.policy),
            identity: IdentityRegistry::new(db.clone()),
            settings,
            db,
        }
    }

    pub fn shifts(&self) -> &ShiftManager {
        &self.shifts
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn reports(&self) -> &ReportAggregator {
        &self.reports
    }

    pub fn identity(&self) -> &IdentityRegistry {
        &self.identity
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Spawns the sinks enabled in `config`. Must run inside a tokio runtime.
pub fn spawn_sinks(config: &LedgerConfig) -> (EventPublisher, SinkWorkers) {
    let mut builder = EventPublisher::builder();

    if let Some(dir) = config.audit_dir() {
        info!(dir = %dir.display(), "Shift audit log enabled");
        builder = builder.audit(Arc::new(FileAuditSink::new(dir)));
    }
    if let Some(path) = config.export_path() {
        info!(path = %path.display(), "Transaction export enabled");
        builder = builder.export(
            Arc::new(JsonLinesExportSink::new(path)),
            config.export.queue_capacity,
        );
    }

    builder.spawn()
}
