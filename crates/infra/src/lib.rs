//! Infrastructure layer: stock record store, ledger engine, reports, config.

pub mod bootstrap;
pub mod config;
pub mod ledger;
pub mod reports;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, LedgerConfig, StoreBackend};
pub use ledger::{LedgerEngine, LedgerError, LedgerResult, RetryPolicy};
pub use reports::{CurrencyTotals, LowStockProduct, StockSummary};
pub use store::{InMemoryStockStore, PostgresStockStore, SharedStore, StockStore, StoreError};
