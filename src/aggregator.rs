//! Split-order aggregation module
//!
//! Brokers report a single logical order as multiple execution-fill lines.
//! This module collapses those fragments into one canonical record per
//! order: fragments are grouped by a rounded-price key (tolerating broker
//! floating-point jitter), sum columns are accumulated, and the canonical
//! price is rebuilt as the quantity-weighted average of the unrounded
//! fragment prices.

use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::AggregationSettings;
use crate::record::{DedupKey, KeyColumn, TradeRecord};

/// Per-run aggregation counts
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregationStats {
    pub input_rows: usize,
    pub output_rows: usize,
}

impl AggregationStats {
    /// Number of fragment rows folded into an existing group
    pub fn fragments_collapsed(&self) -> usize {
        self.input_rows.saturating_sub(self.output_rows)
    }
}

/// Columns that are summed within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SumColumn {
    Quantity,
    Amount,
    Fees,
}

impl SumColumn {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "quantity" => Some(Self::Quantity),
            "amount" => Some(Self::Amount),
            "fees" => Some(Self::Fees),
            _ => None,
        }
    }
}

struct GroupAccum {
    record: TradeRecord,
    fragments: usize,
    /// Σ(price_i * qty_i) over fragments with a price, unrounded
    price_qty_sum: f64,
    /// Σ(qty_i) over the same fragments
    qty_sum: f64,
}

/// Collapses broker-side fragmented fills into one logical record per order.
pub struct SplitOrderAggregator {
    group_columns: Vec<KeyColumn>,
    sum_columns: Vec<SumColumn>,
    price_precision: u32,
}

impl SplitOrderAggregator {
    pub fn new(settings: &AggregationSettings) -> Self {
        let group_columns: Vec<KeyColumn> = settings
            .group_columns
            .iter()
            .filter_map(|name| {
                let col = KeyColumn::parse(name);
                if col.is_none() {
                    warn!("Unknown grouping column '{}', ignoring", name);
                }
                col
            })
            .collect();

        let sum_columns: Vec<SumColumn> = settings
            .sum_columns
            .iter()
            .filter_map(|name| {
                let col = SumColumn::parse(name);
                if col.is_none() {
                    warn!("Unknown sum column '{}', ignoring", name);
                }
                col
            })
            .collect();

        Self {
            group_columns,
            sum_columns,
            price_precision: settings.price_precision,
        }
    }

    /// Aggregate a batch of raw records. Output groups keep the order of
    /// their first appearance in the input.
    ///
    /// If no configured grouping column maps to the canonical schema, the
    /// batch is returned unchanged with a warning - no partial grouping.
    pub fn aggregate(&self, batch: Vec<TradeRecord>) -> (Vec<TradeRecord>, AggregationStats) {
        let input_rows = batch.len();

        if self.group_columns.is_empty() {
            warn!("No valid grouping columns configured, passing batch through unchanged");
            return (
                batch,
                AggregationStats {
                    input_rows,
                    output_rows: input_rows,
                },
            );
        }

        let mut index: HashMap<DedupKey, usize> = HashMap::new();
        let mut groups: Vec<GroupAccum> = Vec::new();

        for record in batch {
            let key = record.key(&self.group_columns, self.price_precision);
            match index.get(&key) {
                Some(&idx) => self.fold_fragment(&mut groups[idx], record),
                None => {
                    index.insert(key, groups.len());
                    groups.push(self.new_group(record));
                }
            }
        }

        let output: Vec<TradeRecord> = groups.into_iter().map(finalize_group).collect();

        let stats = AggregationStats {
            input_rows,
            output_rows: output.len(),
        };
        info!(
            "Collapsed {} input rows into {} logical orders ({} fragments folded)",
            stats.input_rows,
            stats.output_rows,
            stats.fragments_collapsed()
        );
        (output, stats)
    }

    fn new_group(&self, record: TradeRecord) -> GroupAccum {
        let (price_qty_sum, qty_sum) = match record.unit_price {
            Some(p) => (p * record.quantity, record.quantity),
            None => (0.0, 0.0),
        };
        GroupAccum {
            record,
            fragments: 1,
            price_qty_sum,
            qty_sum,
        }
    }

    fn fold_fragment(&self, group: &mut GroupAccum, fragment: TradeRecord) {
        group.fragments += 1;
        if let Some(p) = fragment.unit_price {
            group.price_qty_sum += p * fragment.quantity;
            group.qty_sum += fragment.quantity;
        }
        for col in &self.sum_columns {
            match col {
                SumColumn::Quantity => group.record.quantity += fragment.quantity,
                SumColumn::Amount => group.record.amount += fragment.amount,
                SumColumn::Fees => group.record.fees += fragment.fees,
            }
        }
        // Every other column keeps the first observed value.
    }
}

fn finalize_group(group: GroupAccum) -> TradeRecord {
    let mut record = group.record;
    if group.fragments > 1 {
        // Weighted average over the unrounded fragment prices. A zero total
        // quantity leaves the price undefined rather than dividing by zero.
        record.unit_price = if group.qty_sum.abs() > f64::EPSILON {
            Some(group.price_qty_sum / group.qty_sum)
        } else {
            None
        };
    }
    record
}
