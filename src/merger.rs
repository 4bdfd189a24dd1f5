//! Master merge module
//!
//! Appends a processed batch to the persisted master dataset, dropping batch
//! rows whose dedup key is already present. Master rows are never modified or
//! deleted here; the merge only ever appends.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::config::MergeSettings;
use crate::record::{DedupKey, KeyColumn, TradeRecord};

/// Per-run merge counts plus the changed flag that gates persistence.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    pub incoming_rows: usize,
    pub master_rows_before: usize,
    pub duplicates_dropped: usize,
    pub new_rows: usize,
    pub master_rows_after: usize,
    /// True only when the merge appended at least one row
    pub changed: bool,
    /// True when no persisted master existed before this run
    pub cold_start: bool,
    /// True when the dedup window narrowed the compared master slice
    pub window_applied: bool,
    /// Master rows whose keys the batch was compared against
    pub master_rows_compared: usize,
}

/// Deduplicating append onto the persisted master.
pub struct MasterMerger {
    key_columns: Vec<KeyColumn>,
    price_precision: u32,
    window_threshold: usize,
    window_days: i64,
}

impl MasterMerger {
    pub fn new(settings: &MergeSettings, price_precision: u32) -> Self {
        let mut key_columns = Vec::new();
        for name in &settings.key_columns {
            match KeyColumn::parse(name) {
                Some(column) => key_columns.push(column),
                None => warn!("Ignoring unknown merge key column '{}'", name),
            }
        }
        Self {
            key_columns,
            price_precision,
            window_threshold: settings.window_threshold,
            window_days: settings.window_days,
        }
    }

    /// Merge the batch into the master. `master` is `None` on a cold start.
    /// Returns the updated master and the merge counts; when nothing new was
    /// appended the returned rows are the master unchanged and
    /// `stats.changed` is false.
    pub fn merge(
        &self,
        master: Option<Vec<TradeRecord>>,
        batch: Vec<TradeRecord>,
    ) -> (Vec<TradeRecord>, MergeStats) {
        let mut stats = MergeStats {
            incoming_rows: batch.len(),
            cold_start: master.is_none(),
            ..MergeStats::default()
        };

        let mut master = master.unwrap_or_default();
        stats.master_rows_before = master.len();

        if self.key_columns.is_empty() {
            // Without any usable key column every batch row is treated as new
            warn!("No valid merge key columns configured, appending batch without dedup");
            stats.new_rows = batch.len();
            stats.changed = !batch.is_empty();
            master.extend(batch);
            stats.master_rows_after = master.len();
            return (master, stats);
        }

        let mut seen = self.master_key_set(&master, &batch, &mut stats);
        for record in batch {
            let key = record.key(&self.key_columns, self.price_precision);
            // insert() also catches duplicates within the batch itself
            if seen.insert(key) {
                master.push(record);
                stats.new_rows += 1;
            } else {
                stats.duplicates_dropped += 1;
            }
        }

        stats.changed = stats.new_rows > 0;
        stats.master_rows_after = master.len();
        info!(
            "Merge: {} incoming, {} duplicates dropped, {} appended, master {} -> {} rows{}",
            stats.incoming_rows,
            stats.duplicates_dropped,
            stats.new_rows,
            stats.master_rows_before,
            stats.master_rows_after,
            if stats.cold_start { " (cold start)" } else { "" }
        );
        (master, stats)
    }

    /// Key set of the master slice the batch is compared against. Small
    /// masters are compared in full; above the row threshold only rows within
    /// the trailing date window before the earliest batch date contribute.
    ///
    /// The window is sound only while the windowed date column is part of the
    /// dedup key: a batch confined to a date range can then only collide with
    /// master rows in that range. With trade_date absent from the key a
    /// duplicate may carry any trade_date, so the full master is compared.
    fn master_key_set(
        &self,
        master: &[TradeRecord],
        batch: &[TradeRecord],
        stats: &mut MergeStats,
    ) -> HashSet<DedupKey> {
        let windowable = master.len() > self.window_threshold
            && self.key_columns.contains(&KeyColumn::TradeDate);
        let cutoff = if windowable {
            earliest_trade_date(batch).map(|date| date - Duration::days(self.window_days))
        } else {
            None
        };

        let mut keys = HashSet::with_capacity(master.len().min(self.window_threshold));
        match cutoff {
            Some(cutoff) => {
                stats.window_applied = true;
                let mut in_window = 0usize;
                for record in master {
                    // Undated rows always stay in the comparison set
                    let within = record.trade_date.map_or(true, |date| date >= cutoff);
                    if within {
                        keys.insert(record.key(&self.key_columns, self.price_precision));
                        in_window += 1;
                    }
                }
                stats.master_rows_compared = in_window;
                info!(
                    "Dedup window active: comparing {} of {} master rows (cutoff {})",
                    in_window,
                    master.len(),
                    cutoff
                );
            }
            None => {
                for record in master {
                    keys.insert(record.key(&self.key_columns, self.price_precision));
                }
                stats.master_rows_compared = master.len();
            }
        }
        keys
    }
}

fn earliest_trade_date(batch: &[TradeRecord]) -> Option<NaiveDate> {
    batch.iter().filter_map(|record| record.trade_date).min()
}
