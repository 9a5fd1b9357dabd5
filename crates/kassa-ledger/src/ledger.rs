//! # Transaction Ledger
//!
//! Posts sales, refunds and restocks. Every posting is one store transaction
//! that locks the product row first, validates against what it reads under
//! that lock, and writes stock, transaction and payment together.
//!
//! ## Sale Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  validate quantity ──► shift exists & OPEN ──► authorize (location)    │
//! │                                                     │                   │
//! │  ┌──────────────────────── one store tx ────────────▼────────────────┐  │
//! │  │ lock product (first write)                                        │  │
//! │  │ re-check shift OPEN                                               │  │
//! │  │ product active & stocked here?      no → ProductUnavailable       │  │
//! │  │ quantity <= stock?                  no → InsufficientStock        │  │
//! │  │ total = quantity × price (checked)                                │  │
//! │  │ stock -= quantity; insert SALE; insert payment                    │  │
//! │  └──────────────────────────────── commit ───────────────────────────┘  │
//! │                                                     │                   │
//! │                                  publish TransactionCommitted          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Refunds follow the same shape, but the already-refunded quantity is read
//! under the lock of the original sale's product, so two racing refunds of
//! one sale cannot both pass the remaining-quantity check.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kassa_core::permissions::authorize;
use kassa_core::validation::{
    validate_name, validate_notes, validate_purchase, validate_quantity, validate_stock_delta,
};
use kassa_core::{
    new_id, Action, CoreError, LedgerEntry, LedgerTransaction, Payment, PaymentMethod, Product,
    Shift, StaffProfile, StockAdjustment, TransactionKind, MAX_STOCK_DELTA,
};
use kassa_db::{CatalogRepository, Database, DbError, DbTransaction, LedgerRepository, ShiftRepository};

use crate::config::ServiceSettings;
use crate::error::{not_found_as, LedgerError, LedgerResult};
use crate::lock::bounded;
use crate::shift::ensure_open;
use crate::sink::{EventPublisher, LedgerEvent};

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub shift_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub shift_id: String,
    pub original_transaction_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A signed stock change: positive restocks, negative writes off.
///
/// A restock bought from a supplier may carry the unit cost and supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockRequest {
    pub product_id: String,
    pub delta: i64,
    pub reason: String,
    #[serde(default)]
    pub unit_cost_minor: Option<i64>,
    #[serde(default)]
    pub supplier: Option<String>,
}

/// Outcome of a restock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restocked {
    pub adjustment: StockAdjustment,
    pub stock_quantity: i64,
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransactionLedger {
    db: Database,
    settings: Arc<ServiceSettings>,
    events: EventPublisher,
}

impl TransactionLedger {
    pub fn new(db: Database, settings: Arc<ServiceSettings>, events: EventPublisher) -> Self {
        TransactionLedger {
            db,
            settings,
            events,
        }
    }

    /// Posts a sale and returns the committed transaction.
    ///
    /// ## Errors
    /// - `Validation` - quantity out of range
    /// - `NotFound` - shift or product missing
    /// - `ShiftAlreadyClosed` - the shift is no longer open
    /// - `Unauthorized` - operator may not sell at the shift's location
    /// - `ProductUnavailable` - inactive, or stocked at another location
    /// - `InsufficientStock` - quantity exceeds stock; nothing is sold
    pub async fn post_sale(
        &self,
        request: SaleRequest,
        operator: &StaffProfile,
    ) -> LedgerResult<LedgerTransaction> {
        validate_quantity(request.quantity, self.settings.max_line_quantity)?;
        let notes = validate_notes(request.notes.as_deref())?;

        let shift = self.open_shift(&request.shift_id).await?;
        authorize(operator, Action::PostSale, Some(&shift.location_id), &self.settings.policy)?;

        let (mut tx, product) = self.lock_product(&request.product_id).await?;
        let shift = Self::recheck_shift(&mut tx, &request.shift_id).await?;

        ensure_sellable(&product, &shift)?;
        if request.quantity > product.stock_quantity {
            return Err(CoreError::InsufficientStock {
                product: product.name.clone(),
                available: product.stock_quantity,
                requested: request.quantity,
            }
            .into());
        }

        let total = product
            .price()
            .checked_mul_quantity(request.quantity)
            .ok_or(CoreError::AmountOverflow {
                context: "sale total",
            })?;

        let now = Utc::now();
        let remaining =
            CatalogRepository::adjust_stock(&mut tx, &product.id, -request.quantity, now).await?;

        let sale = LedgerTransaction {
            id: new_id(),
            shift_id: shift.id.clone(),
            kind: TransactionKind::Sale,
            operator_id: operator.id.clone(),
            product_id: product.id.clone(),
            quantity: request.quantity,
            unit_price_minor: product.price_minor,
            payment_method: request.payment_method,
            total_minor: total.minor(),
            refund_of: None,
            notes,
            created_at: now,
        };

        let entry = Self::record(&mut tx, &sale).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            transaction_id = %sale.id,
            shift_id = %sale.shift_id,
            product = %product.name,
            quantity = sale.quantity,
            total = %total,
            method = %sale.payment_method,
            stock_left = remaining,
            "Sale posted"
        );

        self.publish(entry, &shift);
        Ok(sale)
    }

    /// Posts a refund against an earlier sale.
    ///
    /// The refund may sit in a later shift than the sale, but never at
    /// another location. It is priced at the original unit price and settled
    /// with the original payment method.
    ///
    /// ## Errors
    /// - `NotFound` - shift or original transaction missing
    /// - `InvalidRefund` - original is not a sale, or from another location
    /// - `OverRefund` - quantity exceeds what is left to refund
    pub async fn post_refund(
        &self,
        request: RefundRequest,
        operator: &StaffProfile,
    ) -> LedgerResult<LedgerTransaction> {
        validate_quantity(request.quantity, self.settings.max_line_quantity)?;
        let reason = validate_notes(request.reason.as_deref())?;

        let shift = self.open_shift(&request.shift_id).await?;
        authorize(operator, Action::PostRefund, Some(&shift.location_id), &self.settings.policy)?;

        let original = self
            .db
            .ledger()
            .get_transaction(&request.original_transaction_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Transaction", &request.original_transaction_id))?;

        if original.kind != TransactionKind::Sale {
            return Err(CoreError::invalid_refund(format!(
                "transaction {} is a {}, only sales can be refunded",
                original.id,
                original.kind.as_str()
            ))
            .into());
        }

        let original_shift = self
            .db
            .shifts()
            .get_by_id(&original.shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", &original.shift_id))?;
        if original_shift.location_id != shift.location_id {
            return Err(CoreError::invalid_refund(format!(
                "transaction {} was sold at another location",
                original.id
            ))
            .into());
        }

        let (mut tx, product) = self.lock_product(&original.product_id).await?;
        let shift = Self::recheck_shift(&mut tx, &request.shift_id).await?;

        let refunded = LedgerRepository::refunded_quantity(&mut *tx, &original.id).await?;
        let refundable = original.quantity - refunded;
        if request.quantity > refundable {
            debug!(
                transaction_id = %original.id,
                refunded,
                requested = request.quantity,
                "Refund exceeds remaining quantity"
            );
            return Err(CoreError::OverRefund {
                transaction_id: original.id.clone(),
                refundable,
                requested: request.quantity,
            }
            .into());
        }

        let total = original
            .unit_price()
            .checked_mul_quantity(request.quantity)
            .ok_or(CoreError::AmountOverflow {
                context: "refund total",
            })?;

        let now = Utc::now();
        let stock =
            CatalogRepository::adjust_stock(&mut tx, &product.id, request.quantity, now).await?;

        let refund = LedgerTransaction {
            id: new_id(),
            shift_id: shift.id.clone(),
            kind: TransactionKind::Refund,
            operator_id: operator.id.clone(),
            product_id: product.id.clone(),
            quantity: request.quantity,
            unit_price_minor: original.unit_price_minor,
            payment_method: original.payment_method,
            total_minor: total.minor(),
            refund_of: Some(original.id.clone()),
            notes: reason,
            created_at: now,
        };

        let entry = Self::record(&mut tx, &refund).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            transaction_id = %refund.id,
            refund_of = %original.id,
            shift_id = %refund.shift_id,
            product = %product.name,
            quantity = refund.quantity,
            total = %total,
            stock = stock,
            "Refund posted"
        );

        self.publish(entry, &shift);
        Ok(refund)
    }

    /// Restocks (positive delta) or writes off (negative delta) a product.
    ///
    /// Not tied to a shift. Recorded as an append-only adjustment.
    pub async fn restock(
        &self,
        request: RestockRequest,
        operator: &StaffProfile,
    ) -> LedgerResult<Restocked> {
        validate_stock_delta(request.delta, MAX_STOCK_DELTA)?;
        let reason = validate_name("reason", &request.reason)?;
        let purchase = validate_purchase(
            request.delta,
            request.unit_cost_minor,
            request.supplier.as_deref(),
        )?;

        let product = self
            .db
            .catalog()
            .get_product(&request.product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", &request.product_id))?;
        authorize(
            operator,
            Action::AdjustStock,
            Some(&product.location_id),
            &self.settings.policy,
        )?;

        let (mut tx, product) = self.lock_product(&request.product_id).await?;

        let would_be = product.stock_quantity.checked_add(request.delta).ok_or(
            CoreError::AmountOverflow {
                context: "stock quantity",
            },
        )?;
        if would_be < 0 {
            return Err(CoreError::InsufficientStock {
                product: product.name.clone(),
                available: product.stock_quantity,
                requested: -request.delta,
            }
            .into());
        }

        let now = Utc::now();
        let stock_quantity =
            CatalogRepository::adjust_stock(&mut tx, &product.id, request.delta, now).await?;

        let adjustment = StockAdjustment {
            id: new_id(),
            product_id: product.id.clone(),
            operator_id: operator.id.clone(),
            delta: request.delta,
            reason,
            unit_cost_minor: purchase.unit_cost_minor,
            supplier: purchase.supplier,
            created_at: now,
        };
        CatalogRepository::insert_adjustment(&mut tx, &adjustment).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            product = %product.name,
            delta = adjustment.delta,
            stock = stock_quantity,
            operator = %operator.display_name,
            "Stock adjusted"
        );

        Ok(Restocked {
            adjustment,
            stock_quantity,
        })
    }

    pub async fn get_transaction(&self, id: &str) -> LedgerResult<LedgerTransaction> {
        self.db
            .ledger()
            .get_transaction(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Transaction", id).into())
    }

    /// How much of a sale is still refundable. Advisory: the refund itself
    /// re-reads this under lock.
    pub async fn refundable_quantity(&self, sale_id: &str) -> LedgerResult<i64> {
        let sale = self.get_transaction(sale_id).await?;
        if sale.kind != TransactionKind::Sale {
            return Err(CoreError::invalid_refund(format!(
                "transaction {} is not a sale",
                sale.id
            ))
            .into());
        }

        let refunded = LedgerRepository::refunded_quantity(self.db.pool(), sale_id).await?;
        Ok(sale.quantity - refunded)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Pre-lock read of the target shift.
    async fn open_shift(&self, shift_id: &str) -> LedgerResult<Shift> {
        let shift = self
            .db
            .shifts()
            .get_by_id(shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;
        ensure_open(&shift)?;
        Ok(shift)
    }

    async fn lock_product(
        &self,
        product_id: &str,
    ) -> LedgerResult<(DbTransaction, Product)> {
        bounded(self.settings.lock_timeout, "product", async {
            let mut tx = self.db.begin().await?;
            let product = CatalogRepository::lock_product(&mut tx, product_id)
                .await
                .map_err(not_found_as("Product", product_id))?;
            Ok::<_, LedgerError>((tx, product))
        })
        .await
    }

    /// Re-reads the shift under the lock; a close may have committed since
    /// the pre-lock read.
    async fn recheck_shift(tx: &mut DbTransaction, shift_id: &str) -> LedgerResult<Shift> {
        let shift = ShiftRepository::fetch(&mut **tx, shift_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Shift", shift_id))?;
        ensure_open(&shift)?;
        Ok(shift)
    }

    /// Inserts the transaction and its payment, then reads back the joined
    /// entry the sinks receive.
    async fn record(
        tx: &mut DbTransaction,
        transaction: &LedgerTransaction,
    ) -> LedgerResult<LedgerEntry> {
        LedgerRepository::insert_transaction(tx, transaction).await?;
        LedgerRepository::insert_payment(
            tx,
            &Payment {
                id: new_id(),
                transaction_id: transaction.id.clone(),
                method: transaction.payment_method,
                amount_minor: transaction.total_minor,
                created_at: transaction.created_at,
            },
        )
        .await?;

        LedgerRepository::fetch_entry(&mut **tx, &transaction.id)
            .await?
            .ok_or_else(|| DbError::not_found("Transaction", &transaction.id).into())
    }

    fn publish(&self, entry: LedgerEntry, shift: &Shift) {
        self.events.publish(LedgerEvent::TransactionCommitted {
            entry,
            shift_opened_at: shift.opened_at,
        });
    }
}

fn ensure_sellable(product: &Product, shift: &Shift) -> LedgerResult<()> {
    if product.location_id != shift.location_id {
        return Err(CoreError::ProductUnavailable {
            product: product.name.clone(),
            reason: "stocked at another location".to_string(),
        }
        .into());
    }
    if !product.is_active {
        return Err(CoreError::ProductUnavailable {
            product: product.name.clone(),
            reason: "no longer sold".to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use kassa_core::{Report, ReportKind, ReportScope, ShiftPolicy};

    use crate::report::ReportAggregator;
    use crate::shift::ShiftManager;
    use crate::testing::{
        file_db_config, file_fixture, fixture, fixture_with, memory_events, settings, Fixture,
    };

    struct Harness {
        fx: Fixture,
        ledger: TransactionLedger,
        shift: Shift,
    }

    async fn open(fx: Fixture, events: EventPublisher) -> Harness {
        let shift = ShiftManager::new(fx.db.clone(), settings(), EventPublisher::disabled())
            .open_shift(&fx.location.id, &fx.manager, None)
            .await
            .unwrap();
        let ledger = TransactionLedger::new(fx.db.clone(), settings(), events);
        Harness { fx, ledger, shift }
    }

    fn sale(h: &Harness, quantity: i64) -> SaleRequest {
        SaleRequest {
            shift_id: h.shift.id.clone(),
            product_id: h.fx.product.id.clone(),
            quantity,
            payment_method: PaymentMethod::Card,
            notes: None,
        }
    }

    fn refund(h: &Harness, original: &str, quantity: i64) -> RefundRequest {
        RefundRequest {
            shift_id: h.shift.id.clone(),
            original_transaction_id: original.to_string(),
            quantity,
            reason: Some("damaged".to_string()),
        }
    }

    async fn stock(h: &Harness) -> i64 {
        h.fx.db
            .catalog()
            .get_product(&h.fx.product.id)
            .await
            .unwrap()
            .unwrap()
            .stock_quantity
    }

    #[tokio::test]
    async fn test_sale_then_partial_refunds() {
        let h = open(fixture().await, EventPublisher::disabled()).await;
        let cashier = h.fx.cashier.clone();

        let sold = h.ledger.post_sale(sale(&h, 4), &cashier).await.unwrap();
        assert_eq!(sold.total().to_string(), "20.00");
        assert_eq!(stock(&h).await, 6);

        let back = h.ledger.post_refund(refund(&h, &sold.id, 2), &cashier).await.unwrap();
        assert_eq!(back.kind, TransactionKind::Refund);
        assert_eq!(back.total().to_string(), "10.00");
        assert_eq!(back.refund_of.as_deref(), Some(sold.id.as_str()));
        assert_eq!(back.payment_method, PaymentMethod::Card);
        assert_eq!(stock(&h).await, 8);

        let err = h.ledger.post_refund(refund(&h, &sold.id, 3), &cashier).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&CoreError::OverRefund {
                transaction_id: sold.id.clone(),
                refundable: 2,
                requested: 3,
            })
        );
        assert_eq!(stock(&h).await, 8);
        assert_eq!(h.ledger.refundable_quantity(&sold.id).await.unwrap(), 2);

        let payment = h.fx.db.ledger().get_payment(&back.id).await.unwrap().unwrap();
        assert_eq!(payment.amount_minor, 1000);
    }

    #[tokio::test]
    async fn test_oversell_is_rejected_without_effect() {
        let h = open(fixture().await, EventPublisher::disabled()).await;

        let err = h.ledger.post_sale(sale(&h, 11), &h.fx.cashier).await.unwrap_err();
        assert_eq!(err.to_string(), "only 10 of Beer in stock, requested 11");
        assert!(!err.is_retryable());
        assert_eq!(stock(&h).await, 10);
        assert!(h.fx.db.ledger().list_for_shift(&h.shift.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quantity_is_validated_before_anything_else() {
        let h = open(fixture().await, EventPublisher::disabled()).await;

        for quantity in [0, -1, DEFAULT_MAX + 1] {
            let err = h.ledger.post_sale(sale(&h, quantity), &h.fx.cashier).await.unwrap_err();
            assert!(matches!(err.rejection(), Some(CoreError::Validation(_))));
        }
    }

    const DEFAULT_MAX: i64 = kassa_core::DEFAULT_MAX_LINE_QUANTITY;

    #[tokio::test]
    async fn test_no_sale_on_missing_or_closed_shift() {
        let fx = fixture().await;
        let shifts = ShiftManager::new(fx.db.clone(), settings(), EventPublisher::disabled());
        let ledger = TransactionLedger::new(fx.db.clone(), settings(), EventPublisher::disabled());

        let mut request = SaleRequest {
            shift_id: "none".to_string(),
            product_id: fx.product.id.clone(),
            quantity: 1,
            payment_method: PaymentMethod::Cash,
            notes: None,
        };
        let err = ledger.post_sale(request.clone(), &fx.manager).await.unwrap_err();
        assert!(err.rejection().is_some_and(CoreError::is_not_found));

        let shift = shifts.open_shift(&fx.location.id, &fx.manager, None).await.unwrap();
        request.shift_id = shift.id.clone();
        ledger.post_sale(request.clone(), &fx.manager).await.unwrap();

        shifts.close_shift(&shift.id, &fx.manager, &[]).await.unwrap();
        let err = ledger.post_sale(request, &fx.manager).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::ShiftAlreadyClosed { .. })));
    }

    #[tokio::test]
    async fn test_product_of_another_location_is_unavailable() {
        let h = open(fixture().await, EventPublisher::disabled()).await;

        let elsewhere = crate::testing::location("Riverside");
        h.fx.db.locations().insert(&elsewhere).await.unwrap();
        let foreign = crate::testing::product("Wine", &elsewhere.id, None);
        h.fx.db.catalog().insert_product(&foreign).await.unwrap();

        let mut request = sale(&h, 1);
        request.product_id = foreign.id.clone();
        let err = h.ledger.post_sale(request, &h.fx.cashier).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::ProductUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_refund_targets_must_be_sales() {
        let h = open(fixture().await, EventPublisher::disabled()).await;
        let cashier = h.fx.cashier.clone();

        let sold = h.ledger.post_sale(sale(&h, 2), &cashier).await.unwrap();
        let back = h.ledger.post_refund(refund(&h, &sold.id, 1), &cashier).await.unwrap();

        let err = h.ledger.post_refund(refund(&h, &back.id, 1), &cashier).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::InvalidRefund { .. })));

        let err = h.ledger.post_refund(refund(&h, "missing", 1), &cashier).await.unwrap_err();
        assert_eq!(
            err.rejection(),
            Some(&CoreError::not_found("Transaction", "missing"))
        );
    }

    #[tokio::test]
    async fn test_refund_in_a_later_shift() {
        let h = open(fixture().await, EventPublisher::disabled()).await;
        let shifts = ShiftManager::new(h.fx.db.clone(), settings(), EventPublisher::disabled());
        let manager = h.fx.manager.clone();

        let sold = h.ledger.post_sale(sale(&h, 3), &manager).await.unwrap();
        shifts.close_shift(&h.shift.id, &manager, &[]).await.unwrap();
        let next = shifts.open_shift(&h.fx.location.id, &manager, None).await.unwrap();

        let request = RefundRequest {
            shift_id: next.id.clone(),
            original_transaction_id: sold.id.clone(),
            quantity: 3,
            reason: None,
        };
        let back = h.ledger.post_refund(request, &manager).await.unwrap();
        assert_eq!(back.shift_id, next.id);
        assert_eq!(stock(&h).await, 10);
    }

    #[tokio::test]
    async fn test_restock_and_write_off() {
        let h = open(fixture().await, EventPublisher::disabled()).await;
        let product_id = h.fx.product.id.clone();

        let request = |delta: i64| RestockRequest {
            product_id: product_id.clone(),
            delta,
            reason: "delivery".to_string(),
            unit_cost_minor: None,
            supplier: None,
        };

        let err = h.ledger.restock(request(5), &h.fx.cashier).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::Unauthorized { .. })));

        let done = h.ledger.restock(request(5), &h.fx.manager).await.unwrap();
        assert_eq!(done.stock_quantity, 15);
        assert_eq!(done.adjustment.delta, 5);

        let err = h.ledger.restock(request(-16), &h.fx.manager).await.unwrap_err();
        assert_eq!(err.to_string(), "only 15 of Beer in stock, requested 16");

        let done = h.ledger.restock(request(-15), &h.fx.manager).await.unwrap();
        assert_eq!(done.stock_quantity, 0);

        let history = h.fx.db.catalog().adjustments_for_product(&product_id).await.unwrap();
        let deltas: Vec<_> = history.iter().map(|a| a.delta).collect();
        assert_eq!(deltas, vec![5, -15]);
    }

    #[tokio::test]
    async fn test_restock_records_purchase_details() {
        let h = open(fixture().await, EventPublisher::disabled()).await;
        let product_id = h.fx.product.id.clone();

        let delivery = RestockRequest {
            product_id: product_id.clone(),
            delta: 24,
            reason: "delivery".to_string(),
            unit_cost_minor: Some(320),
            supplier: Some(" Baltika ".to_string()),
        };
        let done = h.ledger.restock(delivery, &h.fx.manager).await.unwrap();
        assert_eq!(done.stock_quantity, 34);
        assert_eq!(done.adjustment.unit_cost_minor, Some(320));
        assert_eq!(done.adjustment.supplier.as_deref(), Some("Baltika"));

        let write_off = RestockRequest {
            product_id: product_id.clone(),
            delta: -2,
            reason: "broken bottles".to_string(),
            unit_cost_minor: Some(320),
            supplier: None,
        };
        let err = h.ledger.restock(write_off, &h.fx.manager).await.unwrap_err();
        assert!(matches!(err.rejection(), Some(CoreError::Validation(_))));

        let history = h.fx.db.catalog().adjustments_for_product(&product_id).await.unwrap();
        assert_eq!(history, vec![done.adjustment]);
        assert_eq!(stock(&h).await, 34);
    }

    #[tokio::test]
    async fn test_refund_keeps_the_price_of_the_sale() {
        let h = open(fixture().await, EventPublisher::disabled()).await;
        let cashier = h.fx.cashier.clone();

        let sold = h.ledger.post_sale(sale(&h, 4), &cashier).await.unwrap();
        h.fx.db
            .catalog()
            .update_price(&h.fx.product.id, 999, Utc::now())
            .await
            .unwrap();

        let back = h.ledger.post_refund(refund(&h, &sold.id, 2), &cashier).await.unwrap();
        assert_eq!(back.unit_price_minor, 500);
        assert_eq!(back.total_minor, 1000);

        let later = h.ledger.post_sale(sale(&h, 1), &cashier).await.unwrap();
        assert_eq!(later.total_minor, 999);

        let reports = ReportAggregator::new(h.fx.db.clone(), ShiftPolicy::default());
        let scope = ReportScope::Shift {
            shift_id: h.shift.id.clone(),
        };
        let financial = match reports
            .report(&h.fx.manager, ReportKind::Financial, &scope)
            .await
            .unwrap()
        {
            Report::Financial(f) => f,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(financial.total_revenue.minor(), 2000 + 999);
        assert_eq!(financial.total_refunded.minor(), 1000);
        assert_eq!(financial.net.minor(), 1999);
    }

    #[tokio::test]
    async fn test_only_committed_postings_reach_sinks() {
        let (events, workers, sink) = memory_events();
        let h = open(fixture().await, events).await;

        let sold = h.ledger.post_sale(sale(&h, 4), &h.fx.cashier).await.unwrap();
        h.ledger.post_sale(sale(&h, 100), &h.fx.cashier).await.unwrap_err();

        let Harness { ledger, fx, .. } = h;
        drop(ledger);
        workers.join().await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            LedgerEvent::TransactionCommitted { entry, .. } => {
                assert_eq!(entry.id, sold.id);
                assert_eq!(entry.product_name, "Beer");
                assert_eq!(entry.operator_name, fx.cashier.display_name);
                assert_eq!(entry.location_name, "Central");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        let h = open(file_fixture().await, EventPublisher::disabled()).await;

        let tasks: Vec<_> = [h.fx.cashier.clone(), h.fx.manager.clone()]
            .into_iter()
            .map(|operator| {
                let ledger = h.ledger.clone();
                let request = sale(&h, 10);
                tokio::spawn(async move { ledger.post_sale(request, &operator).await })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser.rejection(),
            Some(CoreError::InsufficientStock { available: 0, requested: 10, .. })
        ));
        assert_eq!(stock(&h).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_wait_times_out_without_effect() {
        let fx = fixture_with(file_db_config().busy_timeout(Duration::from_millis(200))).await;
        let h = open(fx, EventPublisher::disabled()).await;

        let mut holder = h.fx.db.begin().await.unwrap();
        CatalogRepository::lock_product(&mut holder, &h.fx.product.id)
            .await
            .unwrap();

        let err = h.ledger.post_sale(sale(&h, 1), &h.fx.cashier).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ConcurrencyTimeout { operation: "product" }
        ));
        assert!(err.is_retryable());

        holder.rollback().await.unwrap();
        assert_eq!(stock(&h).await, 10);
        h.ledger.post_sale(sale(&h, 1), &h.fx.cashier).await.unwrap();
        assert_eq!(stock(&h).await, 9);
    }
}
