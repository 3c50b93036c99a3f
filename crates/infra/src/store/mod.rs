//! Stock record store boundary.
//!
//! Durable, account-scoped storage for product records and the append-only
//! movement log. Stores hold no business rules; they enforce only the storage
//! constraints (identifier and barcode uniqueness, version checks, atomic
//! product + movement commits).

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{SharedStore, StockStore, StoreError};
