//! Trade Master Engine Library
//!
//! This library reconciles incoming broker trade batches into a persisted,
//! deduplicated master dataset:
//! - Split-order aggregation: SplitOrderAggregator
//! - Identifier resolution: IdentifierResolver
//! - Master merge: MasterMerger
//! - Backup rotation: BackupRotator
//! - Parquet persistence: store

pub mod aggregator;
pub mod backup;
pub mod config;
pub mod error;
pub mod merger;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use aggregator::{AggregationStats, SplitOrderAggregator};
pub use backup::BackupRotator;
pub use config::{
    AggregationSettings, BackupSettings, MergeSettings, NamePattern, OverridePolicy,
    OverrideTables, PipelineConfig, ResolverSettings, RetentionMode, StockInfo,
};
pub use error::{EngineError, EngineResult};
pub use merger::{MasterMerger, MergeStats};
pub use record::{DedupKey, KeyColumn, KeyValue, TradeRecord, CANONICAL_COLUMNS};
pub use report::RunReport;
pub use resolver::{
    IdentifierResolver, ResolutionCache, ResolutionMethod, ResolutionStats, RowOutcome,
};
