//! # Inbound Action Interface
//!
//! The surface the chat front end talks to. Each [`Action`] names the chat
//! identity that sent it; [`dispatch`] resolves that identity through the
//! registry before any service sees the request.
//!
//! ## Wire Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  → {"action":"post_sale","chat_id":1002,"product_id":"…",              │
//! │     "quantity":4,"payment_method":"card"}                              │
//! │                                                                         │
//! │  ← {"ok":{"response":"transaction_posted","transaction":{…}}}          │
//! │                                                                         │
//! │  ← {"error":{"code":"INSUFFICIENT_STOCK",                              │
//! │              "message":"only 3 of Beer in stock, requested 4",         │
//! │              "retryable":false}}                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shift and location ids may be left out; they then default to the
//! operator's home location and its open shift.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use kassa_core::report::ClosingReport;
use kassa_core::{
    CoreError, CountedStock, LedgerTransaction, PaymentMethod, Report, ReportKind, ReportScope,
    Shift, StaffProfile, StockAdjustment, ValidationError,
};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{RefundRequest, RestockRequest, SaleRequest};
use crate::Kassa;

// =============================================================================
// Requests and Responses
// =============================================================================

/// One inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    OpenShift {
        chat_id: i64,
        #[serde(default)]
        location_id: Option<String>,
        #[serde(default)]
        notes: Option<String>,
    },
    CloseShift {
        chat_id: i64,
        #[serde(default)]
        shift_id: Option<String>,
        #[serde(default)]
        counted: Vec<CountedStock>,
    },
    PostSale {
        chat_id: i64,
        #[serde(default)]
        shift_id: Option<String>,
        product_id: String,
        quantity: i64,
        payment_method: PaymentMethod,
        #[serde(default)]
        notes: Option<String>,
    },
    PostRefund {
        chat_id: i64,
        #[serde(default)]
        shift_id: Option<String>,
        original_transaction_id: String,
        quantity: i64,
        #[serde(default)]
        reason: Option<String>,
    },
    GetReport {
        chat_id: i64,
        kind: ReportKind,
        /// Defaults to the open shift at the operator's location.
        #[serde(default)]
        scope: Option<ReportScope>,
    },
    CurrentShift {
        chat_id: i64,
        #[serde(default)]
        location_id: Option<String>,
    },
    Restock {
        chat_id: i64,
        product_id: String,
        delta: i64,
        reason: String,
        #[serde(default)]
        unit_cost_minor: Option<i64>,
        #[serde(default)]
        supplier: Option<String>,
    },
}

impl Action {
    pub fn chat_id(&self) -> i64 {
        match self {
            Action::OpenShift { chat_id, .. }
            | Action::CloseShift { chat_id, .. }
            | Action::PostSale { chat_id, .. }
            | Action::PostRefund { chat_id, .. }
            | Action::GetReport { chat_id, .. }
            | Action::CurrentShift { chat_id, .. }
            | Action::Restock { chat_id, .. } => *chat_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::OpenShift { .. } => "open_shift",
            Action::CloseShift { .. } => "close_shift",
            Action::PostSale { .. } => "post_sale",
            Action::PostRefund { .. } => "post_refund",
            Action::GetReport { .. } => "get_report",
            Action::CurrentShift { .. } => "current_shift",
            Action::Restock { .. } => "restock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum ActionResponse {
    ShiftOpened {
        shift: Shift,
    },
    ShiftClosed {
        shift: Shift,
        report: Box<ClosingReport>,
    },
    TransactionPosted {
        transaction: LedgerTransaction,
    },
    Report {
        report: Report,
    },
    CurrentShift {
        shift: Option<Shift>,
    },
    Restocked {
        adjustment: StockAdjustment,
        stock_quantity: i64,
    },
}

/// What goes back over the wire for each action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(ActionResponse),
    Error(ApiError),
}

impl From<Result<ActionResponse, ApiError>> for Outcome {
    fn from(result: Result<ActionResponse, ApiError>) -> Self {
        match result {
            Ok(response) => Outcome::Ok(response),
            Err(err) => Outcome::Error(err),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error returned over the inbound interface.
///
/// ```json
/// { "code": "OVER_REFUND", "message": "only 2 left to refund ...", "retryable": false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    AlreadyOpen,
    AlreadyClosed,
    NotFound,
    InsufficientStock,
    OverRefund,
    InvalidRefund,
    ProductUnavailable,
    ValidationError,
    /// The request could not be parsed at all.
    InvalidRequest,
    ConcurrencyTimeout,
    Persistence,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::InvalidRequest, message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::Unauthorized { .. } => ErrorCode::Unauthorized,
            CoreError::ShiftAlreadyOpen { .. } => ErrorCode::AlreadyOpen,
            CoreError::ShiftAlreadyClosed { .. } => ErrorCode::AlreadyClosed,
            CoreError::NotFound { .. } | CoreError::NoActiveShift { .. } => ErrorCode::NotFound,
            CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CoreError::OverRefund { .. } => ErrorCode::OverRefund,
            CoreError::InvalidRefund { .. } => ErrorCode::InvalidRefund,
            CoreError::ProductUnavailable { .. } => ErrorCode::ProductUnavailable,
            CoreError::AmountOverflow { .. } | CoreError::Validation(_) => {
                ErrorCode::ValidationError
            }
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::Rejected(core) => core.into(),
            LedgerError::ConcurrencyTimeout { .. } => ApiError {
                code: ErrorCode::ConcurrencyTimeout,
                message,
                retryable: true,
            },
            LedgerError::Persistence(db) => {
                // The detail stays in the log; the operator only needs to retry.
                error!(error = %db, "Storage failure while handling action");
                ApiError {
                    code: ErrorCode::Persistence,
                    message: "Storage failure; nothing was saved, try again".to_string(),
                    retryable: true,
                }
            }
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Resolves the operator and runs one action.
pub async fn dispatch(kassa: &Kassa, action: Action) -> Result<ActionResponse, ApiError> {
    debug!(action = action.name(), chat_id = action.chat_id(), "Dispatching action");

    let operator = kassa.identity().resolve_chat(action.chat_id()).await?;
    Ok(run(kassa, &operator, action).await?)
}

async fn run(kassa: &Kassa, operator: &StaffProfile, action: Action) -> LedgerResult<ActionResponse> {
    match action {
        Action::OpenShift {
            location_id, notes, ..
        } => {
            let location_id = home_location(operator, location_id)?;
            let shift = kassa
                .shifts()
                .open_shift(&location_id, operator, notes.as_deref())
                .await?;
            Ok(ActionResponse::ShiftOpened { shift })
        }
        Action::CloseShift {
            shift_id, counted, ..
        } => {
            let shift_id = target_shift(kassa, operator, shift_id).await?;
            let closed = kassa.shifts().close_shift(&shift_id, operator, &counted).await?;
            Ok(ActionResponse::ShiftClosed {
                shift: closed.shift,
                report: Box::new(closed.report),
            })
        }
        Action::PostSale {
            shift_id,
            product_id,
            quantity,
            payment_method,
            notes,
            ..
        } => {
            let request = SaleRequest {
                shift_id: target_shift(kassa, operator, shift_id).await?,
                product_id,
                quantity,
                payment_method,
                notes,
            };
            let transaction = kassa.ledger().post_sale(request, operator).await?;
            Ok(ActionResponse::TransactionPosted { transaction })
        }
        Action::PostRefund {
            shift_id,
            original_transaction_id,
            quantity,
            reason,
            ..
        } => {
            let request = RefundRequest {
                shift_id: target_shift(kassa, operator, shift_id).await?,
                original_transaction_id,
                quantity,
                reason,
            };
            let transaction = kassa.ledger().post_refund(request, operator).await?;
            Ok(ActionResponse::TransactionPosted { transaction })
        }
        Action::GetReport { kind, scope, .. } => {
            let scope = match scope {
                Some(scope) => scope,
                None => ReportScope::Shift {
                    shift_id: target_shift(kassa, operator, None).await?,
                },
            };
            let report = kassa.reports().report(operator, kind, &scope).await?;
            Ok(ActionResponse::Report { report })
        }
        Action::CurrentShift { location_id, .. } => {
            let location_id = home_location(operator, location_id)?;
            let shift = kassa.shifts().current_shift(&location_id).await?;
            Ok(ActionResponse::CurrentShift { shift })
        }
        Action::Restock {
            product_id,
            delta,
            reason,
            unit_cost_minor,
            supplier,
            ..
        } => {
            let request = RestockRequest {
                product_id,
                delta,
                reason,
                unit_cost_minor,
                supplier,
            };
            let done = kassa.ledger().restock(request, operator).await?;
            Ok(ActionResponse::Restocked {
                adjustment: done.adjustment,
                stock_quantity: done.stock_quantity,
            })
        }
    }
}

fn home_location(operator: &StaffProfile, explicit: Option<String>) -> LedgerResult<String> {
    explicit
        .or_else(|| operator.location_id.clone())
        .ok_or_else(|| {
            ValidationError::Required {
                field: "location_id".to_string(),
            }
            .into()
        })
}

async fn target_shift(
    kassa: &Kassa,
    operator: &StaffProfile,
    explicit: Option<String>,
) -> LedgerResult<String> {
    match explicit {
        Some(shift_id) => Ok(shift_id),
        None => {
            let location_id = home_location(operator, None)?;
            Ok(kassa.shifts().require_current(&location_id).await?.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kassa_db::DbError;
    use serde_json::json;

    use crate::config::ServiceSettings;
    use crate::sink::EventPublisher;
    use crate::testing::{fixture, Fixture};

    async fn kassa() -> (Kassa, Fixture) {
        let fx = fixture().await;
        let kassa = Kassa::new(fx.db.clone(), ServiceSettings::default(), EventPublisher::disabled());
        (kassa, fx)
    }

    async fn send(kassa: &Kassa, value: serde_json::Value) -> serde_json::Value {
        let action: Action = serde_json::from_value(value).unwrap();
        serde_json::to_value(Outcome::from(dispatch(kassa, action).await)).unwrap()
    }

    #[tokio::test]
    async fn test_sale_needs_an_open_shift() {
        let (kassa, fx) = kassa().await;
        let sale = json!({
            "action": "post_sale",
            "chat_id": 1002,
            "product_id": fx.product.id,
            "quantity": 4,
            "payment_method": "card",
        });

        let reply = send(&kassa, sale.clone()).await;
        assert_eq!(reply["error"]["code"], "NOT_FOUND");
        assert_eq!(reply["error"]["retryable"], false);

        let reply = send(&kassa, json!({"action": "open_shift", "chat_id": 1001})).await;
        assert_eq!(reply["ok"]["response"], "shift_opened");
        assert_eq!(reply["ok"]["shift"]["location_id"], fx.location.id);

        let reply = send(&kassa, sale).await;
        assert_eq!(reply["ok"]["response"], "transaction_posted");
        assert_eq!(reply["ok"]["transaction"]["total_minor"], 2000);
        assert_eq!(reply["ok"]["transaction"]["kind"], "sale");
    }

    #[tokio::test]
    async fn test_rejections_carry_code_and_reason() {
        let (kassa, fx) = kassa().await;
        send(&kassa, json!({"action": "open_shift", "chat_id": 1001})).await;

        let reply = send(
            &kassa,
            json!({
                "action": "post_sale",
                "chat_id": 1002,
                "product_id": fx.product.id,
                "quantity": 11,
                "payment_method": "cash",
            }),
        )
        .await;
        assert_eq!(
            reply["error"],
            json!({
                "code": "INSUFFICIENT_STOCK",
                "message": "only 10 of Beer in stock, requested 11",
                "retryable": false,
            })
        );

        let reply = send(&kassa, json!({"action": "open_shift", "chat_id": 1001})).await;
        assert_eq!(reply["error"]["code"], "ALREADY_OPEN");

        let reply = send(&kassa, json!({"action": "close_shift", "chat_id": 1002})).await;
        assert_eq!(reply["error"]["code"], "UNAUTHORIZED");

        let reply = send(&kassa, json!({"action": "current_shift", "chat_id": 999})).await;
        assert_eq!(reply["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_close_and_report_through_actions() {
        let (kassa, fx) = kassa().await;
        send(&kassa, json!({"action": "open_shift", "chat_id": 1001, "notes": "evening"})).await;
        send(
            &kassa,
            json!({
                "action": "post_sale",
                "chat_id": 1002,
                "product_id": fx.product.id,
                "quantity": 2,
                "payment_method": "cash",
            }),
        )
        .await;

        let reply = send(&kassa, json!({"action": "get_report", "chat_id": 1002, "kind": "financial"})).await;
        assert_eq!(reply["ok"]["report"]["report"], "financial");

        let reply = send(
            &kassa,
            json!({
                "action": "close_shift",
                "chat_id": 1001,
                "counted": [{"product_id": fx.product.id, "quantity": 8}],
            }),
        )
        .await;
        assert_eq!(reply["ok"]["response"], "shift_closed");
        assert_eq!(reply["ok"]["shift"]["status"], "closed");
        assert_eq!(reply["ok"]["report"]["general"]["sale_count"], 1);

        let reply = send(&kassa, json!({"action": "current_shift", "chat_id": 1002})).await;
        assert_eq!(reply["ok"]["shift"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_restock_through_actions() {
        let (kassa, fx) = kassa().await;
        let delivery = |chat_id: i64| {
            json!({
                "action": "restock",
                "chat_id": chat_id,
                "product_id": fx.product.id,
                "delta": 12,
                "reason": "delivery",
                "unit_cost_minor": 320,
                "supplier": "Baltika",
            })
        };

        let reply = send(&kassa, delivery(1002)).await;
        assert_eq!(reply["error"]["code"], "UNAUTHORIZED");

        let reply = send(&kassa, delivery(1001)).await;
        assert_eq!(reply["ok"]["response"], "restocked");
        assert_eq!(reply["ok"]["stock_quantity"], 22);
        assert_eq!(reply["ok"]["adjustment"]["unit_cost_minor"], 320);
        assert_eq!(reply["ok"]["adjustment"]["supplier"], "Baltika");
    }

    #[test]
    fn test_retryable_mapping() {
        let timeout = ApiError::from(LedgerError::ConcurrencyTimeout { operation: "product" });
        assert_eq!(timeout.code, ErrorCode::ConcurrencyTimeout);
        assert!(timeout.retryable);

        let storage = ApiError::from(LedgerError::Persistence(DbError::QueryFailed("disk I/O error".into())));
        assert_eq!(storage.code, ErrorCode::Persistence);
        assert!(storage.retryable);
        assert!(!storage.message.contains("disk"));
    }

    #[test]
    fn test_unknown_action_fails_to_parse() {
        let parsed: Result<Action, _> = serde_json::from_value(json!({"action": "delete_sale", "chat_id": 1}));
        assert!(parsed.is_err());
    }
}
