//! Engine configuration
//!
//! Values come from built-in defaults, an optional TOML file, and environment
//! variables prefixed with `LEDGER__` (nested keys separated by `__`, e.g.
//! `LEDGER__RECONCILIATION__AUTO_RECONCILE_THRESHOLD=85`).

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub quick_entry: QuickEntryConfig,
    pub reconciliation: ReconciliationConfig,
    pub scheduler: SchedulerConfig,
    pub aging: AgingConfig,
}

/// Default account codes used by the quick-entry helpers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickEntryConfig {
    pub cash_account_code: String,
    pub sales_account_code: String,
    pub expense_account_code: String,
}

impl Default for QuickEntryConfig {
    fn default() -> Self {
        Self {
            cash_account_code: "1000".to_string(),
            sales_account_code: "4000".to_string(),
            expense_account_code: "6900".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Minimum confidence (0-100) for auto-reconciliation
    pub auto_reconcile_threshold: u8,
    /// Statement lines inserted per atomic chunk
    pub import_chunk_size: usize,
    /// Suggestions returned per bank line
    pub max_suggestions: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            auto_reconcile_threshold: 90,
            import_chunk_size: 500,
            max_suggestions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// How long a worker's claim on a definition stays valid
    pub claim_lease_secs: i64,
    /// Occurrences a single tick may generate for one definition
    pub max_catch_up: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 300,
            claim_lease_secs: 600,
            max_catch_up: 12,
        }
    }
}

/// Control accounts reported next to the aging buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgingConfig {
    pub receivables_account_code: String,
    pub payables_account_code: String,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            receivables_account_code: "1200".to_string(),
            payables_account_code: "2000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from environment variables only
    pub fn from_env() -> LedgerResult<Self> {
        Self::build(None)
    }

    /// Load from a TOML file (if it exists) overlaid with environment variables
    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> LedgerResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config: EngineConfig = builder
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.reconciliation.auto_reconcile_threshold > 100 {
            return Err(LedgerError::Config(
                "reconciliation.auto_reconcile_threshold must be between 0 and 100".to_string(),
            ));
        }
        if self.reconciliation.import_chunk_size == 0 {
            return Err(LedgerError::Config(
                "reconciliation.import_chunk_size must be positive".to_string(),
            ));
        }
        if self.scheduler.claim_lease_secs <= 0 {
            return Err(LedgerError::Config(
                "scheduler.claim_lease_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.max_catch_up == 0 {
            return Err(LedgerError::Config(
                "scheduler.max_catch_up must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
