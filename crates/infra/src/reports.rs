//! Account-level stock summary (dashboard read model).
//!
//! Computed on demand from the product records and the movement log; nothing
//! here is persisted.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};
use stockledger_inventory::{CurrencyCode, Direction, Movement, Product, ProductId, UnitPrice};

/// Low-stock reporting knobs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryOptions {
    /// Products with `aggregate_stock` strictly below this are "low".
    pub low_stock_threshold: u64,
    /// How many low-stock products to list.
    pub low_stock_preview: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            low_stock_threshold: 10,
            low_stock_preview: 5,
        }
    }
}

/// Valuation of one currency's products.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    /// Σ aggregate_stock × purchase_price.
    pub stock_value: Decimal,
    /// Σ aggregate_stock × sale_price.
    pub potential_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockProduct {
    pub product_id: ProductId,
    pub name: String,
    pub barcode: String,
    pub aggregate_stock: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub products_count: usize,
    /// Totals are never summed across currencies.
    pub valuation: BTreeMap<CurrencyCode, CurrencyTotals>,
    pub inbound_movements: usize,
    pub outbound_movements: usize,
    pub low_stock_count: usize,
    pub low_stock_products: Vec<LowStockProduct>,
}

/// Build the summary of one account's products and movements.
///
/// `products` is expected in listing order; the low-stock preview keeps it.
pub fn summarize(
    products: &[Product],
    movements: &[Movement],
    options: &SummaryOptions,
) -> DomainResult<StockSummary> {
    let mut summary = StockSummary {
        products_count: products.len(),
        ..StockSummary::default()
    };

    for product in products {
        let Some(definition) = product.definition() else {
            continue;
        };
        let stock = product.aggregate_stock();

        let totals = summary
            .valuation
            .entry(definition.currency.clone())
            .or_default();
        totals.stock_value = accumulate(totals.stock_value, stock, definition.purchase_price)?;
        totals.potential_revenue =
            accumulate(totals.potential_revenue, stock, definition.sale_price)?;

        if stock < options.low_stock_threshold {
            summary.low_stock_count += 1;
            if summary.low_stock_products.len() < options.low_stock_preview {
                summary.low_stock_products.push(LowStockProduct {
                    product_id: product.id_typed(),
                    name: definition.name.clone(),
                    barcode: definition.barcode.clone(),
                    aggregate_stock: stock,
                });
            }
        }
    }

    for movement in movements {
        match movement.direction {
            Direction::Inbound => summary.inbound_movements += 1,
            Direction::Outbound => summary.outbound_movements += 1,
        }
    }

    Ok(summary)
}

fn accumulate(total: Decimal, quantity: u64, price: UnitPrice) -> DomainResult<Decimal> {
    Decimal::from(quantity)
        .checked_mul(price.amount())
        .and_then(|line| total.checked_add(line))
        .ok_or_else(|| DomainError::invariant("stock valuation overflowed"))
}
