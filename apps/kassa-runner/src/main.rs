//! # Kassa Action Server
//!
//! Serves the inbound action interface as JSON lines.
//!
//! ## Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  stdin   {"id":7,"action":"open_shift","chat_id":1001}                 │
//! │  stdout  {"id":7,"ok":{"response":"shift_opened","shift":{…}}}         │
//! │                                                                         │
//! │  stdin   {"id":8,"action":"post_sale","chat_id":1002,…}                │
//! │  stdout  {"id":8,"error":{"code":"INSUFFICIENT_STOCK",…}}              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Actions run concurrently, so replies may come back out of order; the
//! optional `id` is echoed to pair them up.
//!
//! ## Usage
//! ```text
//! kassa [path/to/kassa.toml]
//! RUST_LOG=debug kassa
//! ```

use std::path::PathBuf;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use kassa_db::Database;
use kassa_ledger::{dispatch, spawn_sinks, Action, ApiError, Kassa, LedgerConfig, Outcome};

/// Replies waiting for stdout.
const OUTPUT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = LedgerConfig::load(config_path)?;
    info!(
        db = %config.database_path().display(),
        lock_timeout_ms = config.concurrency.lock_timeout_ms,
        "Starting kassa"
    );

    let db = Database::new(config.db_config()).await?;
    let (events, workers) = spawn_sinks(&config);
    let kassa = Kassa::new(db.clone(), config.service_settings(), events);

    let (out_tx, out_rx) = mpsc::channel::<String>(OUTPUT_QUEUE);
    let writer = tokio::spawn(write_lines(out_rx));

    let mut handlers = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let kassa = kassa.clone();
                    let out = out_tx.clone();
                    handlers.spawn(async move {
                        let reply = handle_line(&kassa, &line).await;
                        if out.send(reply).await.is_err() {
                            warn!("Output closed, dropping reply");
                        }
                    });
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read input");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }

        while let Some(finished) = handlers.try_join_next() {
            if let Err(e) = finished {
                error!(?e, "Action handler panicked");
            }
        }
    }

    // Let in-flight actions finish; each either commits or rolls back.
    while let Some(finished) = handlers.join_next().await {
        if let Err(e) = finished {
            error!(?e, "Action handler panicked");
        }
    }

    drop(out_tx);
    drop(kassa);
    writer.await??;
    workers.join().await;
    db.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber on stderr; stdout carries replies.
///
/// ## Log Levels
/// - Default: INFO for everything, DEBUG for kassa crates, WARN for sqlx
/// - Override with `RUST_LOG`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kassa=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parses and runs one line, returning the reply line.
async fn handle_line(kassa: &Kassa, line: &str) -> String {
    let (id, outcome) = match serde_json::from_str::<Value>(line) {
        Err(e) => (
            Value::Null,
            Outcome::Error(ApiError::invalid_request(format!("malformed JSON: {}", e))),
        ),
        Ok(value) => {
            let id = value.get("id").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<Action>(value) {
                Ok(action) => (id, Outcome::from(dispatch(kassa, action).await)),
                Err(e) => {
                    debug!(error = %e, "Rejecting unparseable action");
                    (
                        id,
                        Outcome::Error(ApiError::invalid_request(format!("unrecognized action: {}", e))),
                    )
                }
            }
        }
    };

    render(id, &outcome)
}

fn render(id: Value, outcome: &Outcome) -> String {
    let mut reply = serde_json::to_value(outcome).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize reply");
        json!({ "error": { "code": "PERSISTENCE", "message": "reply could not be encoded", "retryable": false } })
    });

    if !id.is_null() {
        if let Some(fields) = reply.as_object_mut() {
            fields.insert("id".to_string(), id);
        }
    }
    reply.to_string()
}

async fn write_lines(mut replies: mpsc::Receiver<String>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = replies.recv().await {
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
