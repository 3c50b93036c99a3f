//! Stock levels: aggregate quantity plus optional per-variant quantities.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

use crate::movement::Direction;

/// Largest quantity a variant, a stock level or a single movement may carry.
///
/// Bounded by signed 64-bit storage columns.
pub const MAX_QUANTITY: u64 = i64::MAX as u64;

/// A named sub-quantity of a product's stock (e.g. a color).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    label: String,
    quantity: u64,
}

impl Variant {
    pub fn new(label: impl Into<String>, quantity: u64) -> DomainResult<Self> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(DomainError::validation("variant label cannot be empty"));
        }
        if quantity > MAX_QUANTITY {
            return Err(DomainError::invalid_quantity(format!(
                "variant '{label}' quantity exceeds {MAX_QUANTITY}"
            )));
        }
        Ok(Self { label, quantity })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }
}

impl ValueObject for Variant {}

/// Stock position of one product.
///
/// Quantities are unsigned, so non-negativity holds by construction; every
/// subtraction goes through `checked_sub`. When `variants` is non-empty,
/// `aggregate` always equals their sum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    aggregate: u64,
    variants: Vec<Variant>,
}

impl StockLevels {
    /// Levels for a product without variants.
    pub fn untracked(aggregate: u64) -> Self {
        Self {
            aggregate,
            variants: Vec::new(),
        }
    }

    /// Levels derived from variant quantities (`aggregate` = their sum).
    pub fn from_variants(variants: Vec<Variant>) -> DomainResult<Self> {
        let aggregate = sum_quantities(&variants)?;
        Ok(Self {
            aggregate,
            variants,
        })
    }

    pub fn aggregate(&self) -> u64 {
        self.aggregate
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    pub fn variant(&self, label: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.label == label)
    }

    /// Check the structural invariants (sum rule, unique labels).
    ///
    /// Used when levels come from outside the domain (storage rows).
    pub fn check_consistency(&self) -> DomainResult<()> {
        for (idx, v) in self.variants.iter().enumerate() {
            if v.label.trim().is_empty() {
                return Err(DomainError::invariant(format!("variant {idx} has an empty label")));
            }
            if self.variants[..idx].iter().any(|other| other.label == v.label) {
                return Err(DomainError::invariant(format!(
                    "duplicate variant label '{}'",
                    v.label
                )));
            }
        }
        if self.has_variants() {
            let sum = sum_quantities(&self.variants)?;
            if sum != self.aggregate {
                return Err(DomainError::invariant(format!(
                    "aggregate stock {} does not match variant sum {}",
                    self.aggregate, sum
                )));
            }
        }
        Ok(())
    }

    /// Compute the levels after one movement, without mutating `self`.
    ///
    /// - With a label: the variant must exist; outbound may not exceed its
    ///   quantity; the aggregate is recomputed from all variants.
    /// - Without a label: only allowed when the product has no variants; the
    ///   aggregate is adjusted directly.
    pub fn after_movement(
        &self,
        direction: Direction,
        quantity: u64,
        variant_label: Option<&str>,
    ) -> DomainResult<Self> {
        if quantity == 0 {
            return Err(DomainError::invalid_quantity("quantity must be greater than zero"));
        }
        if quantity > MAX_QUANTITY {
            return Err(DomainError::invalid_quantity(format!(
                "quantity must not exceed {MAX_QUANTITY}"
            )));
        }

        match variant_label {
            Some(label) => {
                let idx = self
                    .variants
                    .iter()
                    .position(|v| v.label == label)
                    .ok_or_else(|| DomainError::unknown_variant(label))?;

                let mut variants = self.variants.clone();
                let current = variants[idx].quantity;
                variants[idx].quantity = shift(current, direction, quantity)?;

                Self::from_variants(variants)
            }
            None => {
                if self.has_variants() {
                    return Err(DomainError::VariantRequired);
                }
                Ok(Self::untracked(shift(self.aggregate, direction, quantity)?))
            }
        }
    }
}

impl ValueObject for StockLevels {}

fn shift(current: u64, direction: Direction, quantity: u64) -> DomainResult<u64> {
    match direction {
        Direction::Inbound => current
            .checked_add(quantity)
            .filter(|next| *next <= MAX_QUANTITY)
            .ok_or_else(|| DomainError::invalid_quantity("stock quantity overflow")),
        Direction::Outbound => current
            .checked_sub(quantity)
            .ok_or_else(|| DomainError::insufficient_stock(quantity, current)),
    }
}

fn sum_quantities(variants: &[Variant]) -> DomainResult<u64> {
    variants.iter().try_fold(0u64, |acc, v| {
        acc.checked_add(v.quantity)
            .filter(|sum| *sum <= MAX_QUANTITY)
            .ok_or_else(|| DomainError::invalid_quantity("stock quantity overflow"))
    })
}
