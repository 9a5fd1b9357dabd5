//! # Event Sinks
//!
//! Fan-out of committed ledger events to the audit log and the export sink.
//!
//! ## Dispatch Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  TransactionLedger / ShiftManager                                      │
//! │       │  tx.commit() ✓                                                  │
//! │       ▼                                                                 │
//! │  EventPublisher::publish(event)      ← never awaits, never fails       │
//! │       │                                                                 │
//! │       ├── try_send ──► [audit queue ]  ──► worker ──► FileAuditSink    │
//! │       │                                                                 │
//! │       └── try_send ──► [export queue]  ──► worker ──► JsonLinesExport  │
//! │                                                                         │
//! │  Queue full or worker gone → event dropped, warn! logged               │
//! │  Sink returns Err          → warn! logged, never retried               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are published only after the store transaction commits, so a
//! sink never sees something that was rolled back. Each lane has its own
//! worker: a slow export never delays the audit log. Within a lane events
//! are delivered in publish order.
//!
//! ## Shutdown
//! Workers exit once every [`EventPublisher`] clone is dropped and their
//! queue is drained. Await [`SinkWorkers::join`] to flush before exit.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use kassa_core::{ClosingReport, LedgerEntry, Money, Shift, TransactionKind};

/// Audit events are small and rare compared to a human's typing speed;
/// this only fills if the disk stalls.
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SinkResult<T> = Result<T, SinkError>;

// =============================================================================
// Events
// =============================================================================

/// Something that has been committed to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    TransactionCommitted {
        entry: LedgerEntry,
        /// Opening time of the entry's shift, which names its audit log.
        shift_opened_at: DateTime<Utc>,
    },
    ShiftOpened {
        shift: Shift,
        location_name: String,
        operator_name: String,
    },
    ShiftClosed {
        shift: Shift,
        location_name: String,
        operator_name: String,
        report: Box<ClosingReport>,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::TransactionCommitted { .. } => "transaction_committed",
            LedgerEvent::ShiftOpened { .. } => "shift_opened",
            LedgerEvent::ShiftClosed { .. } => "shift_closed",
        }
    }

    pub fn shift_id(&self) -> &str {
        match self {
            LedgerEvent::TransactionCommitted { entry, .. } => &entry.shift_id,
            LedgerEvent::ShiftOpened { shift, .. } | LedgerEvent::ShiftClosed { shift, .. } => {
                &shift.id
            }
        }
    }
}

// =============================================================================
// Sink Trait
// =============================================================================

/// A receiver of committed ledger events.
///
/// Methods run on a blocking worker thread, never on the posting path.
/// An error is logged and the event is dropped.
pub trait LedgerSink: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn on_transaction_committed(
        &self,
        entry: &LedgerEntry,
        shift_opened_at: DateTime<Utc>,
    ) -> SinkResult<()>;

    fn on_shift_opened(
        &self,
        _shift: &Shift,
        _location_name: &str,
        _operator_name: &str,
    ) -> SinkResult<()> {
        Ok(())
    }

    fn on_shift_closed(
        &self,
        _shift: &Shift,
        _location_name: &str,
        _operator_name: &str,
        _report: &ClosingReport,
    ) -> SinkResult<()> {
        Ok(())
    }
}

fn deliver(sink: &dyn LedgerSink, event: &LedgerEvent) -> SinkResult<()> {
    match event {
        LedgerEvent::TransactionCommitted {
            entry,
            shift_opened_at,
        } => sink.on_transaction_committed(entry, *shift_opened_at),
        LedgerEvent::ShiftOpened {
            shift,
            location_name,
            operator_name,
        } => sink.on_shift_opened(shift, location_name, operator_name),
        LedgerEvent::ShiftClosed {
            shift,
            location_name,
            operator_name,
            report,
        } => sink.on_shift_closed(shift, location_name, operator_name, report),
    }
}

// =============================================================================
// Publisher
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Audit,
    Export,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Audit => write!(f, "audit"),
            Lane::Export => write!(f, "export"),
        }
    }
}

#[derive(Debug, Clone)]
struct LaneSender {
    lane: Lane,
    sink_name: &'static str,
    tx: mpsc::Sender<Arc<LedgerEvent>>,
}

/// Cheap-to-clone handle the services publish through.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    lanes: Arc<Vec<LaneSender>>,
}

impl EventPublisher {
    /// A publisher with no sinks; every event is discarded.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn builder() -> EventPublisherBuilder {
        EventPublisherBuilder::default()
    }

    /// Hands an event to every lane without waiting.
    pub fn publish(&self, event: LedgerEvent) {
        if self.lanes.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for lane in self.lanes.iter() {
            match lane.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => warn!(
                    lane = %lane.lane,
                    sink = lane.sink_name,
                    event = event.kind(),
                    shift_id = %event.shift_id(),
                    "Sink queue full, dropping event"
                ),
                Err(mpsc::error::TrySendError::Closed(_)) => warn!(
                    lane = %lane.lane,
                    sink = lane.sink_name,
                    event = event.kind(),
                    "Sink worker stopped, dropping event"
                ),
            }
        }
    }
}

#[derive(Default)]
pub struct EventPublisherBuilder {
    lanes: Vec<(Lane, Arc<dyn LedgerSink>, usize)>,
}

impl EventPublisherBuilder {
    pub fn audit(mut self, sink: Arc<dyn LedgerSink>) -> Self {
        self.lanes.push((Lane::Audit, sink, AUDIT_QUEUE_CAPACITY));
        self
    }

    pub fn export(mut self, sink: Arc<dyn LedgerSink>, queue_capacity: usize) -> Self {
        self.lanes.push((Lane::Export, sink, queue_capacity.max(1)));
        self
    }

    /// Spawns one worker per lane. Must be called inside a tokio runtime.
    pub fn spawn(self) -> (EventPublisher, SinkWorkers) {
        let mut senders = Vec::with_capacity(self.lanes.len());
        let mut handles = Vec::with_capacity(self.lanes.len());

        for (lane, sink, capacity) in self.lanes {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(LaneSender {
                lane,
                sink_name: sink.name(),
                tx,
            });
            handles.push(tokio::spawn(run_lane(lane, sink, rx)));
        }

        (
            EventPublisher {
                lanes: Arc::new(senders),
            },
            SinkWorkers { handles },
        )
    }
}

/// Handles of the spawned lane workers.
pub struct SinkWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl SinkWorkers {
    /// Waits for every worker to drain its queue.
    ///
    /// Returns only after all publishers are dropped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(?e, "Sink worker ended abnormally");
            }
        }
    }
}

async fn run_lane(lane: Lane, sink: Arc<dyn LedgerSink>, mut rx: mpsc::Receiver<Arc<LedgerEvent>>) {
    info!(lane = %lane, sink = sink.name(), "Sink worker starting");

    while let Some(event) = rx.recv().await {
        let worker_sink = Arc::clone(&sink);
        let worker_event = Arc::clone(&event);
        let outcome =
            tokio::task::spawn_blocking(move || deliver(worker_sink.as_ref(), &worker_event)).await;

        match outcome {
            Ok(Ok(())) => debug!(
                lane = %lane,
                sink = sink.name(),
                event = event.kind(),
                "Event delivered"
            ),
            Ok(Err(e)) => warn!(
                lane = %lane,
                sink = sink.name(),
                event = event.kind(),
                shift_id = %event.shift_id(),
                error = %e,
                "Sink delivery failed, event dropped"
            ),
            Err(e) => error!(
                lane = %lane,
                sink = sink.name(),
                ?e,
                "Sink panicked while delivering"
            ),
        }
    }

    info!(lane = %lane, sink = sink.name(), "Sink worker stopped");
}

// =============================================================================
// File Audit Sink
// =============================================================================

/// One human-readable log file per shift.
///
/// Files are named `shift_<Location>_<YYYYMMDD_HHMMSS>.log` after the
/// location and the shift's opening time, and only ever appended to.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    dir: PathBuf,
}

const RULE: &str = "============================================================";
const THIN_RULE: &str = "------------------------------------------------------------";

impl FileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileAuditSink { dir: dir.into() }
    }

    pub fn log_path(&self, location_name: &str, opened_at: DateTime<Utc>) -> PathBuf {
        let location: String = location_name
            .trim()
            .chars()
            .map(|c| {
                if c.is_whitespace() || c == '/' || c == '\\' {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        self.dir.join(format!(
            "shift_{}_{}.log",
            location,
            opened_at.format("%Y%m%d_%H%M%S")
        ))
    }

    fn append(&self, path: &Path, text: &str) -> SinkResult<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%d.%m.%Y %H:%M:%S").to_string()
}

impl LedgerSink for FileAuditSink {
    fn name(&self) -> &'static str {
        "file_audit"
    }

    fn on_transaction_committed(
        &self,
        entry: &LedgerEntry,
        shift_opened_at: DateTime<Utc>,
    ) -> SinkResult<()> {
        let heading = match entry.kind {
            TransactionKind::Sale => "SALE".to_string(),
            TransactionKind::Refund => format!(
                "REFUND of {}",
                entry.refund_of.as_deref().unwrap_or("?")
            ),
        };

        let mut text = format!("[{}] {}\n", stamp(entry.created_at), heading);
        text.push_str(&format!("  Transaction: {}\n", entry.id));
        text.push_str(&format!("  Operator: {}\n", entry.operator_name));
        text.push_str(&format!("  Product: {}\n", entry.product_name));
        text.push_str(&format!("  Quantity: {}\n", entry.quantity));
        text.push_str(&format!(
            "  Amount: {}\n",
            Money::from_minor(entry.total_minor)
        ));
        text.push_str(&format!("  Payment: {}\n", entry.payment_method));
        if let Some(notes) = &entry.notes {
            text.push_str(&format!("  Notes: {}\n", notes));
        }
        text.push_str(THIN_RULE);
        text.push_str("\n\n");

        self.append(&self.log_path(&entry.location_name, shift_opened_at), &text)
    }

    fn on_shift_opened(
        &self,
        shift: &Shift,
        location_name: &str,
        operator_name: &str,
    ) -> SinkResult<()> {
        let mut text = format!("{}\nSHIFT OPENED\n{}\n", RULE, RULE);
        text.push_str(&format!("Shift: {}\n", shift.id));
        text.push_str(&format!("Opened at: {}\n", stamp(shift.opened_at)));
        text.push_str(&format!("Operator: {}\n", operator_name));
        text.push_str(&format!("Location: {}\n", location_name));
        if let Some(notes) = &shift.notes {
            text.push_str(&format!("Notes: {}\n", notes));
        }
        text.push_str(RULE);
        text.push_str("\n\n");

        self.append(&self.log_path(location_name, shift.opened_at), &text)
    }

    fn on_shift_closed(
        &self,
        shift: &Shift,
        location_name: &str,
        operator_name: &str,
        report: &ClosingReport,
    ) -> SinkResult<()> {
        let general = &report.general;
        let financial = &report.financial;

        let mut text = format!("\n{}\nSHIFT CLOSED\n{}\n", RULE, RULE);
        text.push_str(&format!("Closed at: {}\n", stamp(report.closed_at)));
        text.push_str(&format!("Closed by: {}\n", operator_name));
        text.push_str(&format!(
            "Duration: {} min\n\n",
            (report.closed_at - report.opened_at).num_minutes()
        ));

        text.push_str("TOTALS:\n");
        text.push_str(&format!(
            "  Sales: {} ({} transactions)\n",
            financial.total_revenue, general.sale_count
        ));
        text.push_str(&format!(
            "  Refunds: {} ({} transactions)\n",
            financial.total_refunded, general.refund_count
        ));
        text.push_str(&format!("  Net: {}\n\n", financial.net));

        text.push_str("BY PAYMENT METHOD:\n");
        for method in &financial.by_method {
            text.push_str(&format!("  {}: {}\n", method.method, method.net));
        }

        let discrepancies: Vec<_> = report
            .stock_counts
            .iter()
            .filter_map(|s| s.discrepancy().filter(|d| *d != 0).map(|d| (s, d)))
            .collect();
        if !discrepancies.is_empty() {
            text.push_str("\nSTOCK COUNT DISCREPANCIES:\n");
            for (snapshot, delta) in discrepancies {
                text.push_str(&format!(
                    "  {}: system {}, counted {} ({:+})\n",
                    report.product_name(&snapshot.product_id),
                    snapshot.system_quantity,
                    snapshot.counted_quantity.unwrap_or_default(),
                    delta
                ));
            }
        }
        text.push_str(RULE);
        text.push('\n');

        self.append(&self.log_path(location_name, shift.opened_at), &text)
    }
}

// =============================================================================
// JSON Lines Export Sink
// =============================================================================

/// One exported row per committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub id: String,
    pub timestamp: String,
    pub shift: String,
    pub operator: String,
    pub location: String,
    pub product: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub quantity: i64,
    pub amount: String,
    pub method: String,
    pub notes: String,
}

impl From<&LedgerEntry> for ExportRow {
    fn from(entry: &LedgerEntry) -> Self {
        ExportRow {
            id: entry.id.clone(),
            timestamp: entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            shift: entry.shift_id.clone(),
            operator: entry.operator_name.clone(),
            location: entry.location_name.clone(),
            product: entry.product_name.clone(),
            category: entry.category_name.clone().unwrap_or_default(),
            kind: entry.kind,
            quantity: entry.quantity,
            amount: Money::from_minor(entry.total_minor).to_string(),
            method: entry.payment_method.to_string(),
            notes: entry.notes.clone().unwrap_or_default(),
        }
    }
}

/// Appends [`ExportRow`]s as JSON lines to one file.
#[derive(Debug)]
pub struct JsonLinesExportSink {
    path: PathBuf,
    // Serializes appends from overlapping blocking tasks.
    write_lock: Mutex<()>,
}

impl JsonLinesExportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonLinesExportSink {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl LedgerSink for JsonLinesExportSink {
    fn name(&self) -> &'static str {
        "jsonl_export"
    }

    fn on_transaction_committed(
        &self,
        entry: &LedgerEntry,
        _shift_opened_at: DateTime<Utc>,
    ) -> SinkResult<()> {
        let mut line = serde_json::to_string(&ExportRow::from(entry))?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

// =============================================================================
// Memory Sink
// =============================================================================

/// Keeps every event in memory. For embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn push(&self, event: LedgerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

impl LedgerSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn on_transaction_committed(
        &self,
        entry: &LedgerEntry,
        shift_opened_at: DateTime<Utc>,
    ) -> SinkResult<()> {
        self.push(LedgerEvent::TransactionCommitted {
            entry: entry.clone(),
            shift_opened_at,
        });
        Ok(())
    }

    fn on_shift_opened(
        &self,
        shift: &Shift,
        location_name: &str,
        operator_name: &str,
    ) -> SinkResult<()> {
        self.push(LedgerEvent::ShiftOpened {
            shift: shift.clone(),
            location_name: location_name.to_string(),
            operator_name: operator_name.to_string(),
        });
        Ok(())
    }

    fn on_shift_closed(
        &self,
        shift: &Shift,
        location_name: &str,
        operator_name: &str,
        report: &ClosingReport,
    ) -> SinkResult<()> {
        self.push(LedgerEvent::ShiftClosed {
            shift: shift.clone(),
            location_name: location_name.to_string(),
            operator_name: operator_name.to_string(),
            report: Box::new(report.clone()),
        });
        Ok(())
    }
}
