//! Ledger service configuration.

use serde::Deserialize;
use thiserror::Error;

use crate::stats::TransferRule;

pub const TRANSFER_RULE_VAR: &str = "KI_LEDGER_TRANSFER_RULE";
pub const PAGE_SIZE_VAR: &str = "KI_LEDGER_PAGE_SIZE";

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Knobs of [`KiLedger`](crate::KiLedger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How transfers count toward stats.
    pub transfer_rule: TransferRule,
    /// Rows fetched per request when reading history.
    pub history_page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            transfer_rule: TransferRule::default(),
            history_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `KI_LEDGER_TRANSFER_RULE` and
    /// `KI_LEDGER_PAGE_SIZE` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(TRANSFER_RULE_VAR) {
            config.transfer_rule = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: TRANSFER_RULE_VAR,
                value: value.clone(),
            })?;
        }

        if let Some(value) = lookup(PAGE_SIZE_VAR) {
            config.history_page_size = match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: PAGE_SIZE_VAR,
                        value,
                    });
                }
            };
        }

        Ok(config)
    }
}
