//! # Report Folding
//!
//! Pure aggregation of ledger entries into the five report views.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  kassa-db (one read transaction = one snapshot)                         │
//! │  ├── LedgerEntry[]      ordered by created_at, then insertion order    │
//! │  ├── StockLevel[]       current stock per product at the location      │
//! │  └── StockAdjustment[]  restocks / write-offs in scope                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ReportInput::build(kind)  ← THIS MODULE, no I/O                       │
//! │           │                                                             │
//! │           ├── General    counts + quantities + per-product totals      │
//! │           ├── Financial  revenue, refunds, net, per payment method     │
//! │           ├── Sales      itemized SALE lines                           │
//! │           ├── Refunds    itemized REFUND lines                         │
//! │           └── Inventory  stock + sold/refunded/adjusted per product    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reports carry no generation timestamp and every collection has a fixed
//! order, so the same input always serializes to the same bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{
    LedgerEntry, PaymentMethod, StockAdjustment, StockLevel, StockSnapshot, TransactionKind,
};

// =============================================================================
// Scope and Kind
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    General,
    Financial,
    Sales,
    Refunds,
    Inventory,
}

/// What a report covers.
///
/// A range is half-open: `from <= created_at < to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportScope {
    Shift {
        shift_id: String,
    },
    Range {
        location_id: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

// =============================================================================
// Report Shapes
// =============================================================================

/// Quantity and amount for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTotals {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralReport {
    pub sale_count: i64,
    pub refund_count: i64,
    pub quantity_sold: i64,
    pub quantity_refunded: i64,
    pub sales_by_product: Vec<ProductTotals>,
    pub refunds_by_product: Vec<ProductTotals>,
}

/// Sales and refunds settled with one payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTotals {
    pub method: PaymentMethod,
    pub sales: Money,
    pub refunds: Money,
    pub net: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialReport {
    pub total_revenue: Money,
    pub total_refunded: Money,
    /// Always `total_revenue - total_refunded`.
    pub net: Money,
    /// One entry per payment method, in [`PaymentMethod::ALL`] order.
    pub by_method: Vec<MethodTotals>,
    /// Net cash: what should be in the drawer on top of the float.
    pub cash_in_register: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemizedLine {
    pub transaction_id: String,
    pub shift_id: String,
    pub created_at: DateTime<Utc>,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub operator_name: String,
    pub refund_of: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemizedReport {
    pub kind: TransactionKind,
    pub lines: Vec<ItemizedLine>,
    pub total_quantity: i64,
    pub total_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLine {
    pub product_id: String,
    pub product_name: String,
    pub category_name: Option<String>,
    pub unit: String,
    pub stock_quantity: i64,
    pub sold: i64,
    pub refunded: i64,
    /// Net restock minus write-off within scope.
    pub adjusted: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReport {
    pub lines: Vec<InventoryLine>,
    pub total_units: i64,
}

/// Any one of the five report views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum Report {
    General(GeneralReport),
    Financial(FinancialReport),
    Sales(ItemizedReport),
    Refunds(ItemizedReport),
    Inventory(InventoryReport),
}

/// The snapshot stored with a closed shift and handed to the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosingReport {
    pub shift_id: String,
    pub location_id: String,
    pub opened_by: String,
    pub opened_at: DateTime<Utc>,
    pub closed_by: String,
    pub closed_at: DateTime<Utc>,
    pub general: GeneralReport,
    pub financial: FinancialReport,
    pub inventory: InventoryReport,
    pub stock_counts: Vec<StockSnapshot>,
}

impl ClosingReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Display name of a product in the inventory section, or its id when
    /// the product is not listed.
    pub fn product_name<'a>(&'a self, product_id: &'a str) -> &'a str {
        self.inventory
            .lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map_or(product_id, |line| line.product_name.as_str())
    }
}

// =============================================================================
// Folding
// =============================================================================

fn add_money(acc: Money, value: Money, context: &'static str) -> CoreResult<Money> {
    acc.checked_add(value)
        .ok_or(CoreError::AmountOverflow { context })
}

fn add_qty(acc: i64, value: i64, context: &'static str) -> CoreResult<i64> {
    acc.checked_add(value)
        .ok_or(CoreError::AmountOverflow { context })
}

/// Everything a report needs, read inside one snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReportInput {
    /// Ledger entries in scope, oldest first.
    pub entries: Vec<LedgerEntry>,
    pub stock_levels: Vec<StockLevel>,
    pub adjustments: Vec<StockAdjustment>,
}

impl ReportInput {
    pub fn build(&self, kind: ReportKind) -> CoreResult<Report> {
        Ok(match kind {
            ReportKind::General => Report::General(general(&self.entries)?),
            ReportKind::Financial => Report::Financial(financial(&self.entries)?),
            ReportKind::Sales => Report::Sales(itemized(&self.entries, TransactionKind::Sale)?),
            ReportKind::Refunds => {
                Report::Refunds(itemized(&self.entries, TransactionKind::Refund)?)
            }
            ReportKind::Inventory => Report::Inventory(inventory(
                &self.stock_levels,
                &self.entries,
                &self.adjustments,
            )?),
        })
    }
}

/// Counts, quantities, and per-product totals by transaction kind.
pub fn general(entries: &[LedgerEntry]) -> CoreResult<GeneralReport> {
    let mut report = GeneralReport {
        sale_count: 0,
        refund_count: 0,
        quantity_sold: 0,
        quantity_refunded: 0,
        sales_by_product: Vec::new(),
        refunds_by_product: Vec::new(),
    };

    // Keyed by (name, id) so the output order is stable and readable.
    let mut sales: BTreeMap<(String, String), (i64, Money)> = BTreeMap::new();
    let mut refunds: BTreeMap<(String, String), (i64, Money)> = BTreeMap::new();

    for entry in entries {
        let (count, quantity, bucket) = match entry.kind {
            TransactionKind::Sale => (
                &mut report.sale_count,
                &mut report.quantity_sold,
                &mut sales,
            ),
            TransactionKind::Refund => (
                &mut report.refund_count,
                &mut report.quantity_refunded,
                &mut refunds,
            ),
        };

        *count += 1;
        *quantity = add_qty(*quantity, entry.quantity, "quantity total")?;

        let slot = bucket
            .entry((entry.product_name.clone(), entry.product_id.clone()))
            .or_insert((0, Money::zero()));
        slot.0 = add_qty(slot.0, entry.quantity, "product quantity")?;
        slot.1 = add_money(slot.1, Money::from_minor(entry.total_minor), "product amount")?;
    }

    let flatten = |map: BTreeMap<(String, String), (i64, Money)>| {
        map.into_iter()
            .map(|((product_name, product_id), (quantity, amount))| ProductTotals {
                product_id,
                product_name,
                quantity,
                amount,
            })
            .collect()
    };

    report.sales_by_product = flatten(sales);
    report.refunds_by_product = flatten(refunds);
    Ok(report)
}

/// Revenue, refunds and net, overall and per payment method.
///
/// Refunds are subtracted from the method they were settled with, so the
/// cash line is what the drawer should actually hold.
pub fn financial(entries: &[LedgerEntry]) -> CoreResult<FinancialReport> {
    let mut per_method: BTreeMap<PaymentMethod, (Money, Money)> = PaymentMethod::ALL
        .iter()
        .map(|m| (*m, (Money::zero(), Money::zero())))
        .collect();

    let mut total_revenue = Money::zero();
    let mut total_refunded = Money::zero();

    for entry in entries {
        let amount = Money::from_minor(entry.total_minor);
        let slot = per_method
            .entry(entry.payment_method)
            .or_insert((Money::zero(), Money::zero()));

        match entry.kind {
            TransactionKind::Sale => {
                total_revenue = add_money(total_revenue, amount, "total revenue")?;
                slot.0 = add_money(slot.0, amount, "method sales")?;
            }
            TransactionKind::Refund => {
                total_refunded = add_money(total_refunded, amount, "total refunded")?;
                slot.1 = add_money(slot.1, amount, "method refunds")?;
            }
        }
    }

    let mut by_method = Vec::with_capacity(per_method.len());
    for (method, (sales, refunds)) in per_method {
        let net = sales
            .checked_sub(refunds)
            .ok_or(CoreError::AmountOverflow { context: "method net" })?;
        by_method.push(MethodTotals {
            method,
            sales,
            refunds,
            net,
        });
    }

    let net = total_revenue
        .checked_sub(total_refunded)
        .ok_or(CoreError::AmountOverflow { context: "net total" })?;

    let cash_in_register = by_method
        .iter()
        .find(|m| m.method == PaymentMethod::Cash)
        .map(|m| m.net)
        .unwrap_or_default();

    Ok(FinancialReport {
        total_revenue,
        total_refunded,
        net,
        by_method,
        cash_in_register,
    })
}

/// Itemized lines of one kind, in the order the entries were given.
pub fn itemized(entries: &[LedgerEntry], kind: TransactionKind) -> CoreResult<ItemizedReport> {
    let mut total_quantity = 0;
    let mut total_amount = Money::zero();
    let mut lines = Vec::new();

    for entry in entries.iter().filter(|e| e.kind == kind) {
        total_quantity = add_qty(total_quantity, entry.quantity, "itemized quantity")?;
        total_amount = add_money(
            total_amount,
            Money::from_minor(entry.total_minor),
            "itemized amount",
        )?;

        lines.push(ItemizedLine {
            transaction_id: entry.id.clone(),
            shift_id: entry.shift_id.clone(),
            created_at: entry.created_at,
            product_id: entry.product_id.clone(),
            product_name: entry.product_name.clone(),
            quantity: entry.quantity,
            unit_price: Money::from_minor(entry.unit_price_minor),
            total: Money::from_minor(entry.total_minor),
            payment_method: entry.payment_method,
            operator_name: entry.operator_name.clone(),
            refund_of: entry.refund_of.clone(),
            notes: entry.notes.clone(),
        });
    }

    Ok(ItemizedReport {
        kind,
        lines,
        total_quantity,
        total_amount,
    })
}

/// Current stock per product plus movement within scope.
///
/// Sorted by category (uncategorized last), then product name.
pub fn inventory(
    levels: &[StockLevel],
    entries: &[LedgerEntry],
    adjustments: &[StockAdjustment],
) -> CoreResult<InventoryReport> {
    let mut movement: BTreeMap<&str, (i64, i64, i64)> = BTreeMap::new();

    for entry in entries {
        let slot = movement.entry(entry.product_id.as_str()).or_default();
        match entry.kind {
            TransactionKind::Sale => slot.0 = add_qty(slot.0, entry.quantity, "sold")?,
            TransactionKind::Refund => slot.1 = add_qty(slot.1, entry.quantity, "refunded")?,
        }
    }
    for adjustment in adjustments {
        let slot = movement.entry(adjustment.product_id.as_str()).or_default();
        slot.2 = add_qty(slot.2, adjustment.delta, "adjusted")?;
    }

    let mut lines: Vec<InventoryLine> = levels
        .iter()
        .map(|level| {
            let (sold, refunded, adjusted) = movement
                .get(level.product_id.as_str())
                .copied()
                .unwrap_or_default();
            InventoryLine {
                product_id: level.product_id.clone(),
                product_name: level.product_name.clone(),
                category_name: level.category_name.clone(),
                unit: level.unit.clone(),
                stock_quantity: level.stock_quantity,
                sold,
                refunded,
                adjusted,
            }
        })
        .collect();

    lines.sort_by(|a, b| {
        (a.category_name.is_none(), &a.category_name, &a.product_name, &a.product_id).cmp(&(
            b.category_name.is_none(),
            &b.category_name,
            &b.product_name,
            &b.product_id,
        ))
    });

    let mut total_units = 0;
    for line in &lines {
        total_units = add_qty(total_units, line.stock_quantity, "total units")?;
    }

    Ok(InventoryReport { lines, total_units })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn entry(
        id: &str,
        kind: TransactionKind,
        product: (&str, &str),
        quantity: i64,
        unit_price: i64,
        method: PaymentMethod,
        minute: i64,
    ) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            shift_id: "shift-1".to_string(),
            location_id: "loc-1".to_string(),
            location_name: "Central".to_string(),
            kind,
            operator_id: "staff-1".to_string(),
            operator_name: "Dilnoza".to_string(),
            product_id: product.0.to_string(),
            product_name: product.1.to_string(),
            category_name: Some("Drinks".to_string()),
            quantity,
            unit_price_minor: unit_price,
            total_minor: quantity * unit_price,
            payment_method: method,
            refund_of: match kind {
                TransactionKind::Refund => Some("t-1".to_string()),
                TransactionKind::Sale => None,
            },
            notes: None,
            created_at: at(minute),
        }
    }

    fn sample() -> Vec<LedgerEntry> {
        use PaymentMethod::*;
        use TransactionKind::*;
        vec![
            entry("t-1", Sale, ("p-beer", "Beer"), 4, 500, Cash, 0),
            entry("t-2", Sale, ("p-cola", "Cola"), 2, 300, Card, 5),
            entry("t-3", Refund, ("p-beer", "Beer"), 2, 500, Cash, 10),
            entry("t-4", Sale, ("p-beer", "Beer"), 1, 500, Transfer, 15),
        ]
    }

    fn level(id: &str, name: &str, category: Option<&str>, stock: i64) -> StockLevel {
        StockLevel {
            product_id: id.to_string(),
            product_name: name.to_string(),
            category_name: category.map(str::to_string),
            unit: "pcs".to_string(),
            price_minor: 100,
            stock_quantity: stock,
            is_active: true,
        }
    }

    #[test]
    fn test_general_counts() {
        let report = general(&sample()).unwrap();
        assert_eq!(report.sale_count, 3);
        assert_eq!(report.refund_count, 1);
        assert_eq!(report.quantity_sold, 7);
        assert_eq!(report.quantity_refunded, 2);

        assert_eq!(report.sales_by_product.len(), 2);
        assert_eq!(report.sales_by_product[0].product_name, "Beer");
        assert_eq!(report.sales_by_product[0].quantity, 5);
        assert_eq!(report.sales_by_product[0].amount, Money::from_minor(2500));
        assert_eq!(report.refunds_by_product[0].amount, Money::from_minor(1000));
    }

    #[test]
    fn test_financial_net_is_sales_minus_refunds() {
        let report = financial(&sample()).unwrap();
        assert_eq!(report.total_revenue, Money::from_minor(3100));
        assert_eq!(report.total_refunded, Money::from_minor(1000));
        assert_eq!(report.net, Money::from_minor(2100));
        assert_eq!(report.net, report.total_revenue - report.total_refunded);

        let cash = &report.by_method[0];
        assert_eq!(cash.method, PaymentMethod::Cash);
        assert_eq!(cash.sales, Money::from_minor(2000));
        assert_eq!(cash.refunds, Money::from_minor(1000));
        assert_eq!(cash.net, Money::from_minor(1000));
        assert_eq!(report.cash_in_register, Money::from_minor(1000));

        let method_net: Money = report.by_method.iter().map(|m| m.net).sum();
        assert_eq!(method_net, report.net);
    }

    #[test]
    fn test_financial_lists_every_method_even_when_empty() {
        let report = financial(&[]).unwrap();
        let methods: Vec<_> = report.by_method.iter().map(|m| m.method).collect();
        assert_eq!(methods, PaymentMethod::ALL.to_vec());
        assert!(report.net.is_zero());
    }

    #[test]
    fn test_financial_detects_overflow() {
        let mut entries = sample();
        entries[0].total_minor = i64::MAX;
        entries[1].total_minor = i64::MAX;
        assert!(matches!(
            financial(&entries),
            Err(CoreError::AmountOverflow { .. })
        ));
    }

    #[test]
    fn test_itemized_keeps_order_and_filters_kind() {
        let sales = itemized(&sample(), TransactionKind::Sale).unwrap();
        let ids: Vec<_> = sales.lines.iter().map(|l| l.transaction_id.as_str()).collect();
        assert_eq!(ids, ["t-1", "t-2", "t-4"]);
        assert_eq!(sales.total_quantity, 7);

        let refunds = itemized(&sample(), TransactionKind::Refund).unwrap();
        assert_eq!(refunds.lines.len(), 1);
        assert_eq!(refunds.lines[0].refund_of.as_deref(), Some("t-1"));
        assert_eq!(refunds.total_amount, Money::from_minor(1000));
    }

    #[test]
    fn test_inventory_movement_and_order() {
        let levels = vec![
            level("p-cola", "Cola", Some("Drinks"), 8),
            level("p-bag", "Bag", None, 3),
            level("p-beer", "Beer", Some("Drinks"), 5),
            level("p-chips", "Chips", Some("Snacks"), 0),
        ];
        let adjustments = vec![StockAdjustment {
            id: "a-1".to_string(),
            product_id: "p-beer".to_string(),
            operator_id: "staff-1".to_string(),
            delta: 6,
            reason: "delivery".to_string(),
            unit_cost_minor: None,
            supplier: None,
            created_at: at(1),
        }];

        let report = inventory(&levels, &sample(), &adjustments).unwrap();
        let names: Vec<_> = report.lines.iter().map(|l| l.product_name.as_str()).collect();
        assert_eq!(names, ["Beer", "Cola", "Chips", "Bag"]);

        let beer = &report.lines[0];
        assert_eq!((beer.sold, beer.refunded, beer.adjusted), (5, 2, 6));
        assert_eq!(report.total_units, 16);
    }

    #[test]
    fn test_build_is_deterministic() {
        let input = ReportInput {
            entries: sample(),
            stock_levels: vec![level("p-beer", "Beer", Some("Drinks"), 5)],
            adjustments: Vec::new(),
        };

        for kind in [
            ReportKind::General,
            ReportKind::Financial,
            ReportKind::Sales,
            ReportKind::Refunds,
            ReportKind::Inventory,
        ] {
            let first = serde_json::to_string(&input.build(kind).unwrap()).unwrap();
            let second = serde_json::to_string(&input.build(kind).unwrap()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_report_serializes_with_kind_tag() {
        let report = ReportInput::default().build(ReportKind::Financial).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["report"], "financial");
        assert_eq!(json["net"], 0);
    }

    #[test]
    fn test_scope_deserializes() {
        let scope: ReportScope =
            serde_json::from_str(r#"{"type":"shift","shift_id":"s-1"}"#).unwrap();
        assert_eq!(
            scope,
            ReportScope::Shift {
                shift_id: "s-1".to_string()
            }
        );
    }
}
