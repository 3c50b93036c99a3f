use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AccountId, Aggregate, AggregateId, AggregateRoot, DomainError};

use crate::definition::ProductDefinition;
use crate::movement::{Direction, MovementId};
use crate::stock::{StockLevels, Variant};

/// Product identifier (account-scoped via `account_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    account_id: Option<AccountId>,
    definition: Option<ProductDefinition>,
    stock: StockLevels,
    baseline: StockLevels,
    baseline_version: u64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Product {
    /// Create an empty, not-yet-defined aggregate instance.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            account_id: None,
            definition: None,
            stock: StockLevels::default(),
            baseline: StockLevels::default(),
            baseline_version: 0,
            created_at: None,
            updated_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn is_defined(&self) -> bool {
        self.definition.is_some()
    }

    pub fn definition(&self) -> Option<&ProductDefinition> {
        self.definition.as_ref()
    }

    pub fn name(&self) -> &str {
        self.definition.as_ref().map(|d| d.name.as_str()).unwrap_or("")
    }

    pub fn barcode(&self) -> &str {
        self.definition
            .as_ref()
            .map(|d| d.barcode.as_str())
            .unwrap_or("")
    }

    pub fn stock(&self) -> &StockLevels {
        &self.stock
    }

    pub fn aggregate_stock(&self) -> u64 {
        self.stock.aggregate()
    }

    pub fn variants(&self) -> &[Variant] {
        self.stock.variants()
    }

    /// Stock levels set by the latest define/revise.
    pub fn baseline(&self) -> &StockLevels {
        &self.baseline
    }

    /// Version at which `baseline` was set; movements above it replay onto it.
    pub fn baseline_version(&self) -> u64 {
        self.baseline_version
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Export the persisted shape of a defined product.
    pub fn snapshot(&self) -> Result<ProductSnapshot, DomainError> {
        let (account_id, definition, created_at, updated_at) = match (
            self.account_id,
            self.definition.as_ref(),
            self.created_at,
            self.updated_at,
        ) {
            (Some(a), Some(d), Some(c), Some(u)) => (a, d, c, u),
            _ => return Err(DomainError::invariant("product has not been defined")),
        };

        Ok(ProductSnapshot {
            product_id: self.id,
            account_id,
            name: definition.name.clone(),
            barcode: definition.barcode.clone(),
            purchase_price: definition.purchase_price,
            sale_price: definition.sale_price,
            currency: definition.currency.clone(),
            image: definition.image.clone(),
            stock: self.stock.clone(),
            baseline: self.baseline.clone(),
            baseline_version: self.baseline_version,
            version: self.version,
            created_at,
            updated_at,
        })
    }

    /// Rebuild a product from its persisted shape, re-checking invariants.
    pub fn restore(snapshot: ProductSnapshot) -> Result<Self, DomainError> {
        snapshot.stock.check_consistency()?;
        snapshot.baseline.check_consistency()?;

        if snapshot.version == 0 || snapshot.baseline_version == 0 {
            return Err(DomainError::invariant("stored product has version 0"));
        }
        if snapshot.baseline_version > snapshot.version {
            return Err(DomainError::invariant(format!(
                "baseline_version {} is ahead of version {}",
                snapshot.baseline_version, snapshot.version
            )));
        }

        let labels = |levels: &StockLevels| {
            levels
                .variants()
                .iter()
                .map(|v| v.label().to_string())
                .collect::<Vec<_>>()
        };
        if labels(&snapshot.stock) != labels(&snapshot.baseline) {
            return Err(DomainError::invariant(
                "variant labels differ between stock and baseline",
            ));
        }

        let definition = ProductDefinition {
            name: snapshot.name,
            barcode: snapshot.barcode,
            purchase_price: snapshot.purchase_price,
            sale_price: snapshot.sale_price,
            currency: snapshot.currency,
            image: snapshot.image,
            variants: snapshot.baseline.variants().to_vec(),
        };

        Ok(Self {
            id: snapshot.product_id,
            account_id: Some(snapshot.account_id),
            definition: Some(definition),
            stock: snapshot.stock,
            baseline: snapshot.baseline,
            baseline_version: snapshot.baseline_version,
            created_at: Some(snapshot.created_at),
            updated_at: Some(snapshot.updated_at),
            version: snapshot.version,
        })
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Persisted shape of a product (one row / one record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub account_id: AccountId,
    pub name: String,
    pub barcode: String,
    pub purchase_price: crate::definition::UnitPrice,
    pub sale_price: crate::definition::UnitPrice,
    pub currency: crate::definition::CurrencyCode,
    pub image: Option<String>,
    pub stock: StockLevels,
    pub baseline: StockLevels,
    pub baseline_version: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Command: DefineProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineProduct {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub definition: ProductDefinition,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseProduct (definition replace; resets stock to the new variant list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseProduct {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub definition: ProductDefinition,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MoveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStock {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub direction: Direction,
    pub quantity: u64,
    pub variant_label: Option<String>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    DefineProduct(DefineProduct),
    ReviseProduct(ReviseProduct),
    MoveStock(MoveStock),
}

/// Event: ProductDefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDefined {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub definition: ProductDefinition,
    pub stock: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRevised {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub definition: ProductDefinition,
    pub stock: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockMoved.
///
/// `stock_after` is computed once in `handle`; `apply` never re-validates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub movement_id: MovementId,
    pub direction: Direction,
    pub quantity: u64,
    pub variant_label: Option<String>,
    pub note: Option<String>,
    pub stock_after: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductDefined(ProductDefined),
    ProductRevised(ProductRevised),
    StockMoved(StockMoved),
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductDefined(e) => {
                self.id = e.product_id;
                self.account_id = Some(e.account_id);
                self.definition = Some(e.definition.clone());
                self.stock = e.stock.clone();
                self.baseline = e.stock.clone();
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
            }
            ProductEvent::ProductRevised(e) => {
                self.definition = Some(e.definition.clone());
                self.stock = e.stock.clone();
                self.baseline = e.stock.clone();
                self.updated_at = Some(e.occurred_at);
            }
            ProductEvent::StockMoved(e) => {
                self.stock = e.stock_after.clone();
                self.updated_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;

        if matches!(
            event,
            ProductEvent::ProductDefined(_) | ProductEvent::ProductRevised(_)
        ) {
            self.baseline_version = self.version;
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::DefineProduct(cmd) => self.handle_define(cmd),
            ProductCommand::ReviseProduct(cmd) => self.handle_revise(cmd),
            ProductCommand::MoveStock(cmd) => self.handle_move(cmd),
        }
    }
}

impl Product {
    /// Products of another account are reported as absent, not forbidden.
    fn ensure_account(&self, account_id: AccountId) -> Result<(), DomainError> {
        if self.account_id != Some(account_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_define(&self, cmd: &DefineProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.is_defined() {
            return Err(DomainError::conflict("product already exists"));
        }
        self.ensure_product_id(cmd.product_id)?;

        // Barcode uniqueness spans the account's product set, so it is
        // enforced by the store, not here.
        let stock = StockLevels::from_variants(cmd.definition.variants.clone())?;

        Ok(vec![ProductEvent::ProductDefined(ProductDefined {
            account_id: cmd.account_id,
            product_id: cmd.product_id,
            definition: cmd.definition.clone(),
            stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.is_defined() {
            return Err(DomainError::not_found());
        }
        self.ensure_account(cmd.account_id)?;
        self.ensure_product_id(cmd.product_id)?;

        let stock = StockLevels::from_variants(cmd.definition.variants.clone())?;

        Ok(vec![ProductEvent::ProductRevised(ProductRevised {
            account_id: cmd.account_id,
            product_id: cmd.product_id,
            definition: cmd.definition.clone(),
            stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_move(&self, cmd: &MoveStock) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.is_defined() {
            return Err(DomainError::not_found());
        }
        self.ensure_account(cmd.account_id)?;
        self.ensure_product_id(cmd.product_id)?;

        let label = cmd
            .variant_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());

        let stock_after = self
            .stock
            .after_movement(cmd.direction, cmd.quantity, label)?;

        Ok(vec![ProductEvent::StockMoved(StockMoved {
            account_id: cmd.account_id,
            product_id: cmd.product_id,
            movement_id: cmd.movement_id,
            direction: cmd.direction,
            quantity: cmd.quantity,
            variant_label: label.map(str::to_string),
            note: cmd.note.clone(),
            stock_after,
            occurred_at: cmd.occurred_at,
        })])
    }
}
