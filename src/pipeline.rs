//! Pipeline orchestration
//!
//! One run: aggregate split-order fragments, resolve identifiers, merge into
//! the persisted master, and persist with a pre-write backup. Runs are
//! synchronous and single-threaded; a run that appends nothing performs no
//! write, no backup and no pruning.

use std::path::Path;

use tracing::{info, warn};

use crate::aggregator::SplitOrderAggregator;
use crate::backup::BackupRotator;
use crate::config::PipelineConfig;
use crate::error::EngineResult;
use crate::merger::MasterMerger;
use crate::record::TradeRecord;
use crate::report::RunReport;
use crate::resolver::{IdentifierResolver, ResolutionCache};
use crate::store;

/// Read an incoming batch from a CSV file in the canonical schema.
pub fn read_batch_csv(path: &Path) -> EngineResult<Vec<TradeRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut batch = Vec::new();
    for result in reader.deserialize() {
        let record: TradeRecord = result?;
        batch.push(record);
    }
    info!("Read {} batch rows from {:?}", batch.len(), path);
    Ok(batch)
}

/// Run the full pipeline over one batch. With `dry_run` everything up to and
/// including the merge happens, but nothing on disk is touched.
pub fn run(
    config: &PipelineConfig,
    batch: Vec<TradeRecord>,
    dry_run: bool,
) -> EngineResult<RunReport> {
    config.validate()?;
    let mut report = RunReport::new(&config.broker, &config.data_type, dry_run);

    let aggregator = SplitOrderAggregator::new(&config.aggregation);
    let (mut records, agg_stats) = aggregator.aggregate(batch);
    report.record_aggregation(&agg_stats);

    let reference = load_reference(config);
    let resolver = IdentifierResolver::new(config.overrides.clone(), config.resolver.clone());
    let mut cache = ResolutionCache::new();
    let resolution_stats = resolver.resolve_batch(&mut records, reference.as_deref(), &mut cache);
    report.record_resolution(&resolution_stats);

    let master_path = config.master_file_path();
    let master = store::load_master(&master_path)?;

    let merger = MasterMerger::new(&config.merge, config.aggregation.price_precision);
    let (merged, merge_stats) = merger.merge(master, records);
    report.record_merge(&merge_stats);

    if dry_run {
        info!("Dry run, not persisting {} rows", merged.len());
        report.emit();
        return Ok(report);
    }

    if !merge_stats.changed {
        info!("Master unchanged, skipping write and backup");
        report.emit();
        return Ok(report);
    }

    // Snapshot failure is fatal: never overwrite the master without one
    let rotator = BackupRotator::new(config.backup.clone());
    report.backup_created = rotator
        .snapshot(&master_path)?
        .map(|p| p.to_string_lossy().into_owned());

    store::save_master_atomic(&master_path, &merged)?;

    if config.csv_mirror {
        let mirror_path = config.mirror_file_path();
        if let Err(err) = store::write_csv_mirror(&mirror_path, &merged) {
            warn!("CSV mirror write failed (ignored): {}", err);
        }
    }

    match rotator.prune(&master_path) {
        Ok(pruned) => report.backups_pruned = pruned,
        Err(err) => warn!("Backup pruning failed (ignored): {}", err),
    }

    report.emit();
    Ok(report)
}

/// Optional richer ledger for the resolver's fuzzy-match stage. A missing or
/// unreadable reference disables fuzzy matching instead of failing the run.
fn load_reference(config: &PipelineConfig) -> Option<Vec<TradeRecord>> {
    let path = config.reference_master.as_deref()?;
    match store::load_master(Path::new(path)) {
        Ok(Some(records)) => Some(records),
        Ok(None) => {
            warn!("Reference master {:?} does not exist, fuzzy matching disabled", path);
            None
        }
        Err(err) => {
            warn!("Failed to load reference master {:?}: {}", path, err);
            None
        }
    }
}
