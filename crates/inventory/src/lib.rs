//! Inventory domain module: products, variants and stock movements.
//!
//! This crate contains the ledger's business rules, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod definition;
pub mod movement;
pub mod product;
pub mod reconcile;
pub mod stock;

pub use definition::{CurrencyCode, ProductDefinition, ProductDraft, UnitPrice, VariantInput};
pub use movement::{Direction, Movement, MovementId, MovementIntent};
pub use product::{
    DefineProduct, MoveStock, Product, ProductCommand, ProductDefined, ProductEvent, ProductId,
    ProductRevised, ProductSnapshot, ReviseProduct, StockMoved,
};
pub use reconcile::{Reconciliation, reconcile, replay};
pub use stock::{MAX_QUANTITY, StockLevels, Variant};
