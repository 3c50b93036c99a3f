//! Audit replay: rebuild a product's stock from its movement log.
//!
//! The movement log is the only record of how a product reached its current
//! stock. Replaying every movement committed after the latest definition
//! (`product_version > baseline_version`) onto that definition's baseline
//! must reproduce the stored levels exactly.

use stockledger_core::{AggregateRoot, DomainResult};

use crate::movement::Movement;
use crate::product::{Product, ProductId};
use crate::stock::StockLevels;

/// Apply movements, in the given order, to a starting position.
pub fn replay<'a>(
    baseline: &StockLevels,
    movements: impl IntoIterator<Item = &'a Movement>,
) -> DomainResult<StockLevels> {
    movements.into_iter().try_fold(baseline.clone(), |levels, m| {
        levels.after_movement(m.direction, m.quantity, m.variant_label.as_deref())
    })
}

/// Outcome of comparing a product's stored stock with its replayed log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub product_id: ProductId,
    pub baseline_version: u64,
    pub product_version: u64,
    pub movements_replayed: usize,
    /// Product versions after the baseline with no movement in the log.
    pub missing_versions: Vec<u64>,
    pub recorded: StockLevels,
    /// `None` when the log cannot be replayed (a movement would be rejected).
    pub replayed: Option<StockLevels>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.missing_versions.is_empty() && self.replayed.as_ref() == Some(&self.recorded)
    }
}

/// Reconcile a product against (a superset of) its movement log.
///
/// Movements of other products and movements that predate the current
/// baseline are ignored; the rest are replayed in `product_version` order.
pub fn reconcile(product: &Product, movements: &[Movement]) -> Reconciliation {
    let baseline_version = product.baseline_version();
    let mut relevant: Vec<&Movement> = movements
        .iter()
        .filter(|m| m.product_id == product.id_typed() && m.product_version > baseline_version)
        .collect();
    relevant.sort_by_key(|m| m.product_version);

    let mut missing_versions = Vec::new();
    let mut expected = baseline_version + 1;
    for m in &relevant {
        while expected < m.product_version {
            missing_versions.push(expected);
            expected += 1;
        }
        expected = m.product_version + 1;
    }
    while expected <= product.version() {
        missing_versions.push(expected);
        expected += 1;
    }

    let replayed = replay(product.baseline(), relevant.iter().copied()).ok();

    Reconciliation {
        product_id: product.id_typed(),
        baseline_version,
        product_version: product.version(),
        movements_replayed: relevant.len(),
        missing_versions,
        recorded: product.stock().clone(),
        replayed,
    }
}
