//! Bounded lock acquisition.
//!
//! SQLite's `busy_timeout` already bounds the wait inside the store; this
//! adds a service-side ceiling so a stalled pool or a slow disk cannot hold
//! a handler forever. Only the begin-and-lock phase is wrapped. Once the
//! lock is held, the rest of the operation never waits on another writer,
//! and cutting it short around `commit` could misreport a committed write.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};

/// Runs `acquire` with a deadline of `limit`.
///
/// Expiry and store contention both surface as
/// [`LedgerError::ConcurrencyTimeout`] tagged with `operation`. Anything
/// `acquire` opened is dropped on expiry, which rolls it back.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &'static str, acquire: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    match timeout(limit, acquire).await {
        Ok(Err(LedgerError::ConcurrencyTimeout { .. })) => {
            warn!(operation, "Store reported lock contention");
            Err(LedgerError::ConcurrencyTimeout { operation })
        }
        Ok(result) => result,
        Err(_) => {
            warn!(operation, limit_ms = limit.as_millis() as u64, "Lock wait timed out");
            Err(LedgerError::ConcurrencyTimeout { operation })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassa_core::CoreError;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_concurrency_timeout() {
        let result: LedgerResult<()> =
            bounded(Duration::from_millis(50), "product", std::future::pending()).await;

        assert!(matches!(
            result,
            Err(LedgerError::ConcurrencyTimeout { operation: "product" })
        ));
    }

    #[tokio::test]
    async fn test_contention_is_retagged() {
        let result: LedgerResult<()> = bounded(Duration::from_secs(1), "location", async {
            Err(LedgerError::ConcurrencyTimeout {
                operation: "database",
            })
        })
        .await;

        assert!(matches!(
            result,
            Err(LedgerError::ConcurrencyTimeout { operation: "location" })
        ));
    }

    #[tokio::test]
    async fn test_other_results_pass_through() {
        let ok = bounded(Duration::from_secs(1), "product", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let rejected: LedgerResult<()> = bounded(Duration::from_secs(1), "product", async {
            Err(CoreError::not_found("Product", "p-1").into())
        })
        .await;
        assert!(rejected.unwrap_err().rejection().is_some());
    }
}
