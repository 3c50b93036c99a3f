//! Ledger configuration, read from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `STOCKLEDGER_DB_MAX_CONNECTIONS` | `5` |
//! | `STOCKLEDGER_MAX_COMMIT_ATTEMPTS` | `3` |
//! | `STOCKLEDGER_LOW_STOCK_THRESHOLD` | `10` |
//! | `STOCKLEDGER_LOW_STOCK_PREVIEW` | `5` |
//! | `STOCKLEDGER_DEFAULT_CURRENCY` | `MZN` |
//! | `STOCKLEDGER_LOG_FORMAT` | `json` |

use std::str::FromStr;

use thiserror::Error;

use stockledger_inventory::CurrencyCode;
use stockledger_observability::LogFormat;

use crate::ledger::RetryPolicy;
use crate::reports::SummaryOptions;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Which stock store backs the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub store: StoreBackend,
    pub retry: RetryPolicy,
    pub summary: SummaryOptions,
    pub default_currency: CurrencyCode,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::InMemory,
            retry: RetryPolicy::default(),
            summary: SummaryOptions::default(),
            default_currency: CurrencyCode::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let use_persistent: bool = parse_or(&var, "USE_PERSISTENT_STORES", false)?;
        let store = if use_persistent {
            let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let max_connections: u32 = parse_or(&var, "STOCKLEDGER_DB_MAX_CONNECTIONS", 5)?;
            if max_connections == 0 {
                return Err(invalid(
                    "STOCKLEDGER_DB_MAX_CONNECTIONS",
                    "0",
                    "must be at least 1",
                ));
            }
            StoreBackend::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StoreBackend::InMemory
        };

        let max_attempts: u32 = parse_or(
            &var,
            "STOCKLEDGER_MAX_COMMIT_ATTEMPTS",
            defaults.retry.max_attempts,
        )?;
        if max_attempts == 0 {
            return Err(invalid(
                "STOCKLEDGER_MAX_COMMIT_ATTEMPTS",
                "0",
                "must be at least 1",
            ));
        }

        let summary = SummaryOptions {
            low_stock_threshold: parse_or(
                &var,
                "STOCKLEDGER_LOW_STOCK_THRESHOLD",
                defaults.summary.low_stock_threshold,
            )?,
            low_stock_preview: parse_or(
                &var,
                "STOCKLEDGER_LOW_STOCK_PREVIEW",
                defaults.summary.low_stock_preview,
            )?,
        };

        let default_currency = match var("STOCKLEDGER_DEFAULT_CURRENCY") {
            Some(code) => CurrencyCode::new(&code)
                .map_err(|e| invalid("STOCKLEDGER_DEFAULT_CURRENCY", &code, e))?,
            None => defaults.default_currency,
        };

        let log_format = parse_or(&var, "STOCKLEDGER_LOG_FORMAT", defaults.log_format)?;

        Ok(Self {
            store,
            retry: RetryPolicy { max_attempts },
            summary,
            default_currency,
            log_format,
        })
    }
}

fn parse_or<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e| invalid(name, &raw, e)),
        None => Ok(default),
    }
}

fn invalid(name: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
