//! Process wiring: config -> tracing + store + engine.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::{LedgerConfig, StoreBackend};
use crate::ledger::LedgerEngine;
use crate::store::{InMemoryStockStore, PostgresStockStore, SharedStore};

/// Open the configured store (creating the Postgres schema if needed).
pub async fn build_store(backend: &StoreBackend) -> anyhow::Result<SharedStore> {
    match backend {
        StoreBackend::InMemory => {
            tracing::info!("using in-memory stock store");
            Ok(Arc::new(InMemoryStockStore::new()))
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let pool = PgPoolOptions::new()
                .max_connections(*max_connections)
                .connect(database_url)
                .await
                .context("failed to connect to Postgres")?;

            let store = PostgresStockStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("failed to create stock ledger schema")?;

            tracing::info!(max_connections, "using Postgres stock store");
            Ok(Arc::new(store))
        }
    }
}

/// Build a ready-to-use engine from configuration.
pub async fn build_engine(config: &LedgerConfig) -> anyhow::Result<LedgerEngine<SharedStore>> {
    let store = build_store(&config.store).await?;

    Ok(LedgerEngine::new(store)
        .with_retry(config.retry)
        .with_default_currency(config.default_currency.clone())
        .with_summary_options(config.summary))
}

/// Read the environment, install tracing, and build the engine.
pub async fn from_env() -> anyhow::Result<LedgerEngine<SharedStore>> {
    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    stockledger_observability::init(config.log_format);
    build_engine(&config).await
}
