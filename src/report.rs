//! Per-run summary report
//!
//! Every counter the pipeline stages accumulate, flattened into one
//! machine-readable line so a supervising script can scrape the outcome of a
//! run without parsing the full log stream.

use serde::Serialize;
use tracing::info;

use crate::aggregator::AggregationStats;
use crate::merger::MergeStats;
use crate::resolver::ResolutionStats;

/// Flattened counters for a whole pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub broker: String,
    pub data_type: String,
    pub dry_run: bool,

    pub input_rows: usize,
    pub aggregated_rows: usize,
    pub fragments_collapsed: usize,

    pub resolved_by_override: usize,
    pub resolved_by_reverse_inference: usize,
    pub resolved_by_fuzzy_match: usize,
    pub unresolved: usize,
    pub stale_values_corrected: usize,

    pub master_rows_before: usize,
    pub duplicates_dropped: usize,
    pub new_rows: usize,
    pub master_rows_after: usize,
    pub changed: bool,
    pub cold_start: bool,

    /// Path of the snapshot taken before the write, if one was taken
    pub backup_created: Option<String>,
    pub backups_pruned: usize,
}

impl RunReport {
    pub fn new(broker: &str, data_type: &str, dry_run: bool) -> Self {
        Self {
            broker: broker.to_string(),
            data_type: data_type.to_string(),
            dry_run,
            input_rows: 0,
            aggregated_rows: 0,
            fragments_collapsed: 0,
            resolved_by_override: 0,
            resolved_by_reverse_inference: 0,
            resolved_by_fuzzy_match: 0,
            unresolved: 0,
            stale_values_corrected: 0,
            master_rows_before: 0,
            duplicates_dropped: 0,
            new_rows: 0,
            master_rows_after: 0,
            changed: false,
            cold_start: false,
            backup_created: None,
            backups_pruned: 0,
        }
    }

    pub fn record_aggregation(&mut self, stats: &AggregationStats) {
        self.input_rows = stats.input_rows;
        self.aggregated_rows = stats.output_rows;
        self.fragments_collapsed = stats.fragments_collapsed();
    }

    pub fn record_resolution(&mut self, stats: &ResolutionStats) {
        self.resolved_by_override = stats.resolved_by_override;
        self.resolved_by_reverse_inference = stats.resolved_by_reverse_inference;
        self.resolved_by_fuzzy_match = stats.resolved_by_fuzzy_match;
        self.unresolved = stats.unresolved;
        self.stale_values_corrected = stats.stale_values_corrected;
    }

    pub fn record_merge(&mut self, stats: &MergeStats) {
        self.master_rows_before = stats.master_rows_before;
        self.duplicates_dropped = stats.duplicates_dropped;
        self.new_rows = stats.new_rows;
        self.master_rows_after = stats.master_rows_after;
        self.changed = stats.changed;
        self.cold_start = stats.cold_start;
    }

    /// Log the report as a single JSON line.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => info!("Run summary: {}", json),
            Err(err) => info!("Run summary (unserializable, {}): {:?}", err, self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_to_flat_json() {
        let mut report = RunReport::new("rakuten", "realized_pl", false);
        report.changed = true;
        report.new_rows = 3;

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"broker\":\"rakuten\""));
        assert!(json.contains("\"new_rows\":3"));
        assert!(json.contains("\"changed\":true"));
        assert!(json.contains("\"backup_created\":null"));
    }
}
