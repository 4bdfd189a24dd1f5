//! Configuration module for the master-dataset engine
//!
//! This module defines the pipeline configuration structure: data paths,
//! aggregation/merge key columns, resolver tolerances, backup retention and
//! the identifier override tables. Override tables are plain data built once
//! and injected into the resolver, so tests can substitute their own.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Split-order aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Grouping-key column names (canonical schema names)
    #[serde(default = "default_key_columns")]
    pub group_columns: Vec<String>,
    /// Columns summed within a group
    #[serde(default = "default_sum_columns")]
    pub sum_columns: Vec<String>,
    /// Decimal places the price is rounded to when building the grouping key
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            group_columns: default_key_columns(),
            sum_columns: default_sum_columns(),
            price_precision: default_price_precision(),
        }
    }
}

/// How an override-table hit treats a stock_name/market that is already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverridePolicy {
    /// The table value replaces any existing value. Matches the original
    /// behavior; required for known rename corrections (stale names must be
    /// replaced even when present).
    Always,
    /// The table value only fills blanks, preserving curated data.
    OnlyIfMissing,
}

/// Identifier resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Fuzzy match: allowed settlement-date distance in days
    #[serde(default = "default_date_tolerance_days")]
    pub date_tolerance_days: i64,
    /// Fuzzy match: allowed relative quantity deviation (exact match always passes)
    #[serde(default = "default_quantity_rel_tolerance")]
    pub quantity_rel_tolerance: f64,
    /// Fuzzy match: allowed relative unit-price deviation
    #[serde(default = "default_price_rel_tolerance")]
    pub price_rel_tolerance: f64,
    /// Whether override-table hits replace existing stock_name/market values
    #[serde(default = "default_override_policy")]
    pub override_policy: OverridePolicy,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            date_tolerance_days: default_date_tolerance_days(),
            quantity_rel_tolerance: default_quantity_rel_tolerance(),
            price_rel_tolerance: default_price_rel_tolerance(),
            override_policy: default_override_policy(),
        }
    }
}

/// Master merge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Dedup-key column names (canonical schema names)
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,
    /// Master row count above which the date window kicks in
    #[serde(default = "default_window_threshold")]
    pub window_threshold: usize,
    /// Trailing window, in days before the earliest batch date
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            key_columns: default_key_columns(),
            window_threshold: default_window_threshold(),
            window_days: default_window_days(),
        }
    }
}

/// Backup retention mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionMode {
    /// Within each calendar day, keep only the most recently modified backup
    DailyLatestOnly,
    /// Keep the N most recently modified backups overall
    KeepLatestN,
}

/// Backup rotation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    #[serde(default = "default_retention_mode")]
    pub mode: RetentionMode,
    /// N for keep-latest-n mode; ignored by daily-latest-only
    #[serde(default = "default_keep_latest")]
    pub keep_latest: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            mode: default_retention_mode(),
            keep_latest: default_keep_latest(),
        }
    }
}

/// Authoritative info attached to a ticker by the override tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockInfo {
    pub stock_name: String,
    pub market: String,
}

/// Stock-name substring pattern mapping to a ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamePattern {
    /// Case-insensitive substring matched against the record's stock_name
    pub pattern: String,
    pub ticker: String,
}

/// Static identifier reference data: ticker renames, ticker info and
/// name-substring inference. Read-only; never alters quantities or prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideTables {
    /// old ticker -> new ticker
    #[serde(default)]
    pub ticker_renames: HashMap<String, String>,
    /// ticker -> { stock_name, market }
    #[serde(default)]
    pub ticker_info: HashMap<String, StockInfo>,
    /// stock-name substring -> ticker
    #[serde(default)]
    pub name_to_ticker: Vec<NamePattern>,
}

impl Default for OverrideTables {
    /// Built-in entries covering the corporate actions seen in the ledger so
    /// far: Tempur Sealy International -> Somnigroup (TPX -> SGI) and the
    /// delisted Hawaiian Holdings (HA).
    fn default() -> Self {
        let mut ticker_renames = HashMap::new();
        ticker_renames.insert("TPX".to_string(), "SGI".to_string());

        let mut ticker_info = HashMap::new();
        ticker_info.insert(
            "SGI".to_string(),
            StockInfo {
                stock_name: "Somnigroup".to_string(),
                market: "NYSE".to_string(),
            },
        );
        ticker_info.insert(
            "TPX".to_string(),
            StockInfo {
                stock_name: "Somnigroup".to_string(),
                market: "NYSE".to_string(),
            },
        );
        ticker_info.insert(
            "HA".to_string(),
            StockInfo {
                stock_name: "Hawaiian Holdings, Inc.".to_string(),
                market: "NASDAQ".to_string(),
            },
        );

        let name_to_ticker = vec![
            NamePattern {
                pattern: "テンピュール".to_string(),
                ticker: "SGI".to_string(),
            },
            NamePattern {
                pattern: "TEMPUR".to_string(),
                ticker: "SGI".to_string(),
            },
            NamePattern {
                pattern: "SOMNIGROUP".to_string(),
                ticker: "SGI".to_string(),
            },
        ];

        Self {
            ticker_renames,
            ticker_info,
            name_to_ticker,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the data tree; the master lives under
    /// `<data_root>/<broker>/master/`
    pub data_root: String,
    /// Broker name (e.g. "rakuten", "sbi")
    pub broker: String,
    /// Data type (e.g. "realized_pl", "transaction")
    pub data_type: String,
    #[serde(default)]
    pub aggregation: AggregationSettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub overrides: OverrideTables,
    /// Optional richer reference ledger (another master parquet) used only
    /// by the resolver's fuzzy-match stage
    #[serde(default)]
    pub reference_master: Option<String>,
    /// Emit a human-readable CSV mirror beside the master (best effort)
    #[serde(default)]
    pub csv_mirror: bool,
}

impl PipelineConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_yaml::from_str(&content).context("Failed to parse config YAML")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Sanity-check numeric settings before a run.
    pub fn validate(&self) -> EngineResult<()> {
        if self.broker.trim().is_empty() || self.data_type.trim().is_empty() {
            return Err(EngineError::config("broker and data_type must be set"));
        }
        if self.aggregation.price_precision > 9 {
            return Err(EngineError::config("price_precision must be <= 9"));
        }
        if self.resolver.date_tolerance_days < 0 {
            return Err(EngineError::config("date_tolerance_days must be >= 0"));
        }
        if self.resolver.quantity_rel_tolerance < 0.0
            || self.resolver.price_rel_tolerance < 0.0
        {
            return Err(EngineError::config("relative tolerances must be >= 0"));
        }
        if self.merge.window_days <= 0 {
            return Err(EngineError::config("window_days must be > 0"));
        }
        if self.backup.mode == RetentionMode::KeepLatestN && self.backup.keep_latest == 0 {
            return Err(EngineError::config("keep_latest must be >= 1"));
        }
        Ok(())
    }

    /// Directory holding the master file and its backups
    pub fn master_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_root)
            .join(&self.broker)
            .join("master")
    }

    /// Path of the persisted master parquet:
    /// `<data_root>/<broker>/master/master_<data_type>_<broker>.parquet`
    pub fn master_file_path(&self) -> PathBuf {
        self.master_dir()
            .join(format!("master_{}_{}.parquet", self.data_type, self.broker))
    }

    /// Path of the optional CSV mirror beside the master
    pub fn mirror_file_path(&self) -> PathBuf {
        self.master_dir()
            .join(format!("master_{}_{}.csv", self.data_type, self.broker))
    }
}

fn default_key_columns() -> Vec<String> {
    vec![
        "trade_date".to_string(),
        "settlement_date".to_string(),
        "ticker".to_string(),
        "transaction_type".to_string(),
        "unit_price".to_string(),
    ]
}

fn default_sum_columns() -> Vec<String> {
    vec![
        "quantity".to_string(),
        "amount".to_string(),
        "fees".to_string(),
    ]
}

fn default_price_precision() -> u32 {
    1
}

fn default_date_tolerance_days() -> i64 {
    7
}

fn default_quantity_rel_tolerance() -> f64 {
    0.10
}

fn default_price_rel_tolerance() -> f64 {
    0.01
}

fn default_override_policy() -> OverridePolicy {
    OverridePolicy::Always
}

fn default_window_threshold() -> usize {
    10_000
}

fn default_window_days() -> i64 {
    90
}

fn default_retention_mode() -> RetentionMode {
    RetentionMode::DailyLatestOnly
}

fn default_keep_latest() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing_minimal() {
        let yaml = r#"
data_root: "/data/trading_account"
broker: "rakuten"
data_type: "realized_pl"
"#;

        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.broker, "rakuten");
        assert_eq!(config.aggregation.price_precision, 1);
        assert_eq!(config.merge.window_threshold, 10_000);
        assert_eq!(config.resolver.date_tolerance_days, 7);
        assert_eq!(config.resolver.override_policy, OverridePolicy::Always);
        assert_eq!(config.backup.mode, RetentionMode::DailyLatestOnly);
        // Built-in override tables apply when the section is omitted
        assert_eq!(
            config.overrides.ticker_renames.get("TPX"),
            Some(&"SGI".to_string())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parsing_full() {
        let yaml = r#"
data_root: "/data/trading_account"
broker: "sbi"
data_type: "transaction"
aggregation:
  price_precision: 2
resolver:
  date_tolerance_days: 3
  override_policy: only-if-missing
merge:
  window_threshold: 500
  window_days: 30
backup:
  mode: keep-latest-n
  keep_latest: 5
overrides:
  ticker_renames:
    OLD: NEW
  ticker_info:
    NEW:
      stock_name: "New Corp"
      market: "NASDAQ"
  name_to_ticker:
    - pattern: "NEW CORP"
      ticker: "NEW"
reference_master: "/data/trading_account/rakuten/master/master_transaction_rakuten.parquet"
csv_mirror: true
"#;

        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.aggregation.price_precision, 2);
        assert_eq!(
            config.resolver.override_policy,
            OverridePolicy::OnlyIfMissing
        );
        assert_eq!(config.backup.mode, RetentionMode::KeepLatestN);
        assert_eq!(config.backup.keep_latest, 5);
        // A configured overrides section replaces the built-in tables
        assert!(config.overrides.ticker_renames.get("TPX").is_none());
        assert!(config.csv_mirror);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_master_file_path_layout() {
        let yaml = r#"
data_root: "/data/trading_account"
broker: "rakuten"
data_type: "realized_pl"
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.master_file_path(),
            PathBuf::from(
                "/data/trading_account/rakuten/master/master_realized_pl_rakuten.parquet"
            )
        );
    }

    #[test]
    fn test_validate_rejects_bad_tolerances() {
        let yaml = r#"
data_root: "/data"
broker: "sbi"
data_type: "realized_pl"
resolver:
  price_rel_tolerance: -0.5
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
