//! Product definition values: prices, currency, variant lines.
//!
//! `ProductDraft` is the loosely-typed caller input. `ProductDraft::validate`
//! turns it into a `ProductDefinition` whose fields can no longer hold an
//! invalid value.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

use crate::stock::Variant;

/// Strictly positive unit amount (purchase cost or sale price).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct UnitPrice(Decimal);

impl UnitPrice {
    pub fn new(amount: Decimal) -> DomainResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::invalid_price(format!(
                "price must be greater than zero (got {amount})"
            )));
        }
        Ok(Self(amount))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for UnitPrice {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitPrice> for Decimal {
    fn from(value: UnitPrice) -> Self {
        value.0
    }
}

impl core::fmt::Display for UnitPrice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for UnitPrice {}

/// Free-form currency tag (not checked against ISO 4217).
///
/// Normalized to trimmed upper case so `"mzn"` and `"MZN "` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Fallback currency for drafts that name none.
    pub const DEFAULT: &'static str = "MZN";

    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim();
        if code.is_empty() {
            return Err(DomainError::validation("currency cannot be empty"));
        }
        Ok(Self(code.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueObject for CurrencyCode {}

/// Unvalidated variant line as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInput {
    pub label: String,
    #[serde(default)]
    pub quantity: u64,
}

/// Unvalidated product definition as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub barcode: String,
    pub purchase_price: Decimal,
    pub sale_price: Decimal,
    /// Falls back to the ledger's configured default when absent.
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub variants: Vec<VariantInput>,
}

impl ProductDraft {
    pub fn new(
        name: impl Into<String>,
        barcode: impl Into<String>,
        purchase_price: Decimal,
        sale_price: Decimal,
    ) -> Self {
        Self {
            name: name.into(),
            barcode: barcode.into(),
            purchase_price,
            sale_price,
            currency: None,
            image: None,
            variants: Vec::new(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_variant(mut self, label: impl Into<String>, quantity: u64) -> Self {
        self.variants.push(VariantInput {
            label: label.into(),
            quantity,
        });
        self
    }

    /// Validate every field and produce an immutable definition.
    pub fn validate(self, default_currency: &CurrencyCode) -> DomainResult<ProductDefinition> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let barcode = self.barcode.trim().to_string();
        if barcode.is_empty() {
            return Err(DomainError::validation("barcode cannot be empty"));
        }

        let purchase_price = UnitPrice::new(self.purchase_price)?;
        let sale_price = UnitPrice::new(self.sale_price)?;

        let currency = match self.currency.as_deref() {
            Some(code) if !code.trim().is_empty() => CurrencyCode::new(code)?,
            _ => default_currency.clone(),
        };

        let mut seen = HashSet::with_capacity(self.variants.len());
        let mut variants = Vec::with_capacity(self.variants.len());
        for input in self.variants {
            let variant = Variant::new(input.label, input.quantity)?;
            if !seen.insert(variant.label().to_string()) {
                return Err(DomainError::validation(format!(
                    "duplicate variant label '{}'",
                    variant.label()
                )));
            }
            variants.push(variant);
        }

        let image = self.image.filter(|i| !i.trim().is_empty());

        Ok(ProductDefinition {
            name,
            barcode,
            purchase_price,
            sale_price,
            currency,
            image,
            variants,
        })
    }
}

/// Validated product definition (the non-stock part of a product plus its
/// initial variant quantities).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub name: String,
    pub barcode: String,
    pub purchase_price: UnitPrice,
    pub sale_price: UnitPrice,
    pub currency: CurrencyCode,
    pub image: Option<String>,
    pub variants: Vec<Variant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn mzn() -> CurrencyCode {
        CurrencyCode::new("MZN").unwrap()
    }

    fn draft() -> ProductDraft {
        ProductDraft::new("T-shirt", "7891234567890", Decimal::new(1500, 2), Decimal::new(2500, 2))
    }

    #[test]
    fn validate_applies_default_currency() {
        let def = draft().validate(&mzn()).unwrap();
        assert_eq!(def.currency.as_str(), "MZN");
        assert_eq!(def.name, "T-shirt");
        assert!(def.variants.is_empty());
    }

    #[test]
    fn validate_normalizes_explicit_currency() {
        let def = draft().with_currency(" usd ").validate(&mzn()).unwrap();
        assert_eq!(def.currency.as_str(), "USD");
    }

    #[test]
    fn validate_rejects_non_positive_prices() {
        let mut d = draft();
        d.purchase_price = Decimal::ZERO;
        assert!(matches!(d.validate(&mzn()), Err(DomainError::InvalidPrice(_))));

        let mut d = draft();
        d.sale_price = Decimal::new(-1, 0);
        assert!(matches!(d.validate(&mzn()), Err(DomainError::InvalidPrice(_))));
    }

    #[test]
    fn validate_rejects_blank_name_and_barcode() {
        let mut d = draft();
        d.name = "   ".to_string();
        assert!(matches!(d.validate(&mzn()), Err(DomainError::Validation(_))));

        let mut d = draft();
        d.barcode = String::new();
        assert!(matches!(d.validate(&mzn()), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_rejects_duplicate_variant_labels() {
        let d = draft().with_variant("red", 1).with_variant("red", 2);
        match d.validate(&mzn()) {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("red")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unit_price_deserialization_is_validated() {
        let ok: UnitPrice = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(ok.amount(), Decimal::new(125, 1));
        assert!(serde_json::from_str::<UnitPrice>("\"0\"").is_err());
    }

    #[test]
    fn blank_image_is_dropped() {
        let def = draft().with_image("  ").validate(&mzn()).unwrap();
        assert_eq!(def.image, None);
    }
}
