//! Identifier resolution module
//!
//! Fills missing ticker / stock_name / market on canonical records, in four
//! stages:
//! - Step A: normalize the ticker and map old tickers to their renamed form
//! - Step B: ticker -> { stock_name, market } override lookup
//! - Step C: reverse inference from a stock-name substring when the ticker
//!   is missing
//! - Step D: tolerance-based fuzzy match against a richer reference ledger
//!   when both ticker and stock_name are missing
//!
//! A row that no stage can complete is left blank and counted, never raised.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::{OverridePolicy, OverrideTables, ResolverSettings};
use crate::record::{normalize_symbol, round_to_ticks, TradeRecord};

/// Which stage completed a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    Override,
    ReverseInference,
    FuzzyMatch,
}

/// Typed per-row outcome, aggregated into [`ResolutionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// All identifiers were already present
    AlreadyComplete,
    /// A missing identifier was filled by the given stage
    Resolved(ResolutionMethod),
    /// Identifiers remain missing; not an error
    Unresolved,
}

/// Per-run resolution counts
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionStats {
    pub already_complete: usize,
    pub resolved_by_override: usize,
    pub resolved_by_reverse_inference: usize,
    pub resolved_by_fuzzy_match: usize,
    pub unresolved: usize,
    /// Rows where an override replaced an existing, different
    /// stock_name/market. Disjoint from the resolved counts: a row can be
    /// already complete and still be corrected.
    pub stale_values_corrected: usize,
}

impl ResolutionStats {
    fn count(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::AlreadyComplete => self.already_complete += 1,
            RowOutcome::Resolved(ResolutionMethod::Override) => self.resolved_by_override += 1,
            RowOutcome::Resolved(ResolutionMethod::ReverseInference) => {
                self.resolved_by_reverse_inference += 1
            }
            RowOutcome::Resolved(ResolutionMethod::FuzzyMatch) => {
                self.resolved_by_fuzzy_match += 1
            }
            RowOutcome::Unresolved => self.unresolved += 1,
        }
    }
}

/// Cache of fuzzy-match results, keyed by the matchable shape of a record.
/// Owned by the caller with process-run lifetime; duplicate fragments of the
/// same order skip the reference scan.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    fuzzy: HashMap<FuzzyKey, (String, String)>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fuzzy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fuzzy.is_empty()
    }
}

type FuzzyKey = (NaiveDate, i64, i64);

/// What an override-table hit did to a record.
#[derive(Debug, Clone, Copy, Default)]
struct InfoApplication {
    filled: bool,
    corrected: bool,
}

/// Fills missing identifiers using injected override tables and an optional
/// reference ledger. Stateless across calls; the cache is passed in.
pub struct IdentifierResolver {
    tables: OverrideTables,
    settings: ResolverSettings,
}

impl IdentifierResolver {
    pub fn new(tables: OverrideTables, settings: ResolverSettings) -> Self {
        Self { tables, settings }
    }

    /// Resolve every record in the batch in place.
    pub fn resolve_batch(
        &self,
        batch: &mut [TradeRecord],
        reference: Option<&[TradeRecord]>,
        cache: &mut ResolutionCache,
    ) -> ResolutionStats {
        let mut stats = ResolutionStats::default();
        for record in batch.iter_mut() {
            let (outcome, corrected) = self.resolve_record_impl(record, reference, cache);
            stats.count(outcome);
            if corrected {
                stats.stale_values_corrected += 1;
            }
        }
        info!(
            "Identifier resolution: {} complete, {} by override, {} by reverse inference, {} by fuzzy match, {} unresolved, {} stale values corrected",
            stats.already_complete,
            stats.resolved_by_override,
            stats.resolved_by_reverse_inference,
            stats.resolved_by_fuzzy_match,
            stats.unresolved,
            stats.stale_values_corrected
        );
        stats
    }

    /// Resolve a single record in place. Applying this twice in succession
    /// leaves the record unchanged on the second pass.
    pub fn resolve_record(
        &self,
        record: &mut TradeRecord,
        reference: Option<&[TradeRecord]>,
        cache: &mut ResolutionCache,
    ) -> RowOutcome {
        self.resolve_record_impl(record, reference, cache).0
    }

    /// Outcome plus whether an override corrected an existing stale value.
    fn resolve_record_impl(
        &self,
        record: &mut TradeRecord,
        reference: Option<&[TradeRecord]>,
        cache: &mut ResolutionCache,
    ) -> (RowOutcome, bool) {
        let missing_before = record.ticker_text().is_none()
            || record.stock_name_text().is_none()
            || record.market_text().is_none();

        // Step A: normalize and rename the ticker if present
        if let Some(ticker) = record.ticker_text() {
            let normalized = self.normalize_ticker(ticker);
            record.ticker = Some(normalized);
        }

        if record.ticker_text().is_some() {
            let applied = self.apply_ticker_info(record);
            let outcome = if !missing_before {
                RowOutcome::AlreadyComplete
            } else if applied.filled {
                // Counts even when only one of the two fields could be filled
                RowOutcome::Resolved(ResolutionMethod::Override)
            } else {
                RowOutcome::Unresolved
            };
            return (outcome, applied.corrected);
        }

        // Step C: infer the ticker from the stock name
        if let Some(name) = record.stock_name_text() {
            if let Some(ticker) = self.infer_ticker_from_name(name) {
                debug!("Inferred ticker {} from stock name '{}'", ticker, name);
                record.ticker = Some(ticker);
                let applied = self.apply_ticker_info(record);
                return (
                    RowOutcome::Resolved(ResolutionMethod::ReverseInference),
                    applied.corrected,
                );
            }
            return (RowOutcome::Unresolved, false);
        }

        // Step D: both ticker and stock name are missing, try the reference
        // ledger within the configured tolerances
        if let Some(reference) = reference {
            if let Some((ticker, name)) = self.fuzzy_match(record, reference, cache) {
                debug!(
                    "Fuzzy-matched record to {} / '{}' via reference ledger",
                    ticker, name
                );
                record.ticker = Some(ticker);
                record.stock_name = Some(name);
                let applied = self.apply_ticker_info(record);
                return (
                    RowOutcome::Resolved(ResolutionMethod::FuzzyMatch),
                    applied.corrected,
                );
            }
        }

        (RowOutcome::Unresolved, false)
    }

    /// Step A: trimmed/upper-cased, old tickers mapped to their new symbol.
    fn normalize_ticker(&self, ticker: &str) -> String {
        let normalized = normalize_symbol(ticker);
        match self.tables.ticker_renames.get(&normalized) {
            Some(renamed) => renamed.clone(),
            None => normalized,
        }
    }

    /// Step B: ticker -> info lookup. `filled` means a previously missing
    /// field got a value; `corrected` means an existing, different value was
    /// replaced. Whether existing values are replaced is governed by the
    /// configured [`OverridePolicy`].
    fn apply_ticker_info(&self, record: &mut TradeRecord) -> InfoApplication {
        let mut applied = InfoApplication::default();
        let Some(ticker) = record.ticker_text() else {
            return applied;
        };
        let Some(info) = self.tables.ticker_info.get(&normalize_symbol(ticker)) else {
            return applied;
        };

        let name_missing = record.stock_name_text().is_none();
        if name_missing || self.settings.override_policy == OverridePolicy::Always {
            applied.corrected |=
                !name_missing && record.stock_name_text() != Some(info.stock_name.as_str());
            record.stock_name = Some(info.stock_name.clone());
            applied.filled |= name_missing;
        }

        let market_missing = record.market_text().is_none();
        if market_missing || self.settings.override_policy == OverridePolicy::Always {
            applied.corrected |=
                !market_missing && record.market_text() != Some(info.market.as_str());
            record.market = Some(info.market.clone());
            applied.filled |= market_missing;
        }

        applied
    }

    /// Step C: case-insensitive substring scan of the name patterns.
    fn infer_ticker_from_name(&self, stock_name: &str) -> Option<String> {
        let upper = stock_name.to_uppercase();
        self.tables
            .name_to_ticker
            .iter()
            .find(|entry| upper.contains(&entry.pattern.to_uppercase()))
            .map(|entry| entry.ticker.clone())
    }

    /// Step D: search the reference ledger for a row matching this record
    /// within the date/quantity/price tolerances, preferring the candidate
    /// with minimum absolute settlement-date distance.
    fn fuzzy_match(
        &self,
        record: &TradeRecord,
        reference: &[TradeRecord],
        cache: &mut ResolutionCache,
    ) -> Option<(String, String)> {
        let target_date = record.settlement_date?;
        let target_price = record.unit_price?;
        let cache_key: FuzzyKey = (
            target_date,
            round_to_ticks(record.quantity, 4),
            round_to_ticks(target_price, 4),
        );

        if let Some(hit) = cache.fuzzy.get(&cache_key) {
            return Some(hit.clone());
        }

        let mut best: Option<(&TradeRecord, i64)> = None;
        for candidate in reference {
            let (Some(date), Some(price)) = (candidate.settlement_date, candidate.unit_price)
            else {
                continue;
            };
            if candidate.ticker_text().is_none() || candidate.stock_name_text().is_none() {
                continue;
            }
            if !within_date_window(target_date, date, self.settings.date_tolerance_days) {
                continue;
            }
            if !quantity_within_tolerance(
                record.quantity,
                candidate.quantity,
                self.settings.quantity_rel_tolerance,
            ) {
                continue;
            }
            if !price_within_tolerance(target_price, price, self.settings.price_rel_tolerance) {
                continue;
            }

            let distance = (date - target_date).num_days().abs();
            // Strict comparison keeps the first candidate on ties
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }

        let (winner, _) = best?;
        let resolved = (
            normalize_symbol(winner.ticker_text().unwrap_or_default()),
            winner.stock_name_text().unwrap_or_default().to_string(),
        );
        cache.fuzzy.insert(cache_key, resolved.clone());
        Some(resolved)
    }
}

/// Date-window predicate for fuzzy matching.
pub fn within_date_window(target: NaiveDate, candidate: NaiveDate, tolerance_days: i64) -> bool {
    (candidate - target).num_days().abs() <= tolerance_days
}

/// Quantity predicate: exact equality always passes; otherwise the relative
/// deviation from the target must be within the tolerance. A zero target
/// matches only an exactly-zero candidate.
pub fn quantity_within_tolerance(target: f64, candidate: f64, rel_tolerance: f64) -> bool {
    if target == candidate {
        return true;
    }
    if target == 0.0 {
        return false;
    }
    ((candidate - target) / target).abs() <= rel_tolerance
}

/// Price predicate: relative deviation from the target within the tolerance.
pub fn price_within_tolerance(target: f64, candidate: f64, rel_tolerance: f64) -> bool {
    if target == candidate {
        return true;
    }
    if target == 0.0 {
        return false;
    }
    ((candidate - target) / target).abs() <= rel_tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NamePattern, StockInfo};

    fn blank_record() -> TradeRecord {
        TradeRecord {
            trade_date: NaiveDate::from_ymd_opt(2025, 10, 6),
            settlement_date: NaiveDate::from_ymd_opt(2025, 10, 8),
            ticker: None,
            stock_name: None,
            market: None,
            transaction_type: "buy".to_string(),
            quantity: 100.0,
            unit_price: Some(50.0),
            amount: 5000.0,
            fees: 0.0,
            currency: "USD".to_string(),
        }
    }

    fn reference_row(
        ticker: &str,
        name: &str,
        date: NaiveDate,
        qty: f64,
        price: f64,
    ) -> TradeRecord {
        TradeRecord {
            trade_date: Some(date),
            settlement_date: Some(date),
            ticker: Some(ticker.to_string()),
            stock_name: Some(name.to_string()),
            market: Some("NASDAQ".to_string()),
            transaction_type: "buy".to_string(),
            quantity: qty,
            unit_price: Some(price),
            amount: qty * price,
            fees: 0.0,
            currency: "USD".to_string(),
        }
    }

    fn resolver() -> IdentifierResolver {
        IdentifierResolver::new(OverrideTables::default(), ResolverSettings::default())
    }

    #[test]
    fn test_rename_normalization() {
        let mut record = blank_record();
        record.ticker = Some("tpx".to_string());
        let mut cache = ResolutionCache::new();
        resolver().resolve_record(&mut record, None, &mut cache);

        assert_eq!(record.ticker.as_deref(), Some("SGI"));
        assert_eq!(record.stock_name.as_deref(), Some("Somnigroup"));
        assert_eq!(record.market.as_deref(), Some("NYSE"));
    }

    #[test]
    fn test_override_replaces_stale_name_by_default() {
        let mut record = blank_record();
        record.ticker = Some("TPX".to_string());
        record.stock_name = Some("Tempur Sealy International".to_string());
        record.market = Some("NYSE".to_string());
        let mut cache = ResolutionCache::new();
        resolver().resolve_record(&mut record, None, &mut cache);

        assert_eq!(record.stock_name.as_deref(), Some("Somnigroup"));
    }

    #[test]
    fn test_stale_name_correction_is_counted() {
        // All identifiers present, but the name predates the rename: the row
        // is complete yet still corrected
        let mut record = blank_record();
        record.ticker = Some("TPX".to_string());
        record.stock_name = Some("Tempur Sealy International".to_string());
        record.market = Some("NYSE".to_string());
        let mut batch = vec![record];
        let mut cache = ResolutionCache::new();

        let stats = resolver().resolve_batch(&mut batch, None, &mut cache);
        assert_eq!(stats.already_complete, 1);
        assert_eq!(stats.resolved_by_override, 0);
        assert_eq!(stats.stale_values_corrected, 1);
        assert_eq!(batch[0].stock_name.as_deref(), Some("Somnigroup"));

        // Nothing left to correct on a second pass
        let stats = resolver().resolve_batch(&mut batch, None, &mut cache);
        assert_eq!(stats.stale_values_corrected, 0);
    }

    #[test]
    fn test_only_if_missing_preserves_curated_name() {
        let settings = ResolverSettings {
            override_policy: OverridePolicy::OnlyIfMissing,
            ..ResolverSettings::default()
        };
        let resolver = IdentifierResolver::new(OverrideTables::default(), settings);

        let mut record = blank_record();
        record.ticker = Some("HA".to_string());
        record.stock_name = Some("Hawaiian Holdings".to_string());
        let mut cache = ResolutionCache::new();
        resolver.resolve_record(&mut record, None, &mut cache);

        assert_eq!(record.stock_name.as_deref(), Some("Hawaiian Holdings"));
        // The missing market is still filled
        assert_eq!(record.market.as_deref(), Some("NASDAQ"));
    }

    #[test]
    fn test_reverse_inference_from_name() {
        let mut record = blank_record();
        record.stock_name = Some("テンピュール シーリー".to_string());
        let mut cache = ResolutionCache::new();
        let outcome = resolver().resolve_record(&mut record, None, &mut cache);

        assert_eq!(
            outcome,
            RowOutcome::Resolved(ResolutionMethod::ReverseInference)
        );
        assert_eq!(record.ticker.as_deref(), Some("SGI"));
        assert_eq!(record.stock_name.as_deref(), Some("Somnigroup"));
    }

    #[test]
    fn test_fuzzy_match_sofi_scenario() {
        // 1-day settlement gap, exact quantity, price within 1%
        let mut record = blank_record();
        record.settlement_date = NaiveDate::from_ymd_opt(2025, 10, 8);
        record.quantity = 100.0;
        record.unit_price = Some(50.0);

        let reference = vec![reference_row(
            "SOFI",
            "SoFi Technologies",
            NaiveDate::from_ymd_opt(2025, 10, 9).unwrap(),
            100.0,
            50.10,
        )];

        let mut cache = ResolutionCache::new();
        let outcome = resolver().resolve_record(&mut record, Some(&reference), &mut cache);

        assert_eq!(outcome, RowOutcome::Resolved(ResolutionMethod::FuzzyMatch));
        assert_eq!(record.ticker.as_deref(), Some("SOFI"));
        assert_eq!(record.stock_name.as_deref(), Some("SoFi Technologies"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fuzzy_match_rejects_date_outside_window() {
        // 10 days away with a 7-day limit: never selected, even with exact
        // quantity and price
        let mut record = blank_record();
        record.settlement_date = NaiveDate::from_ymd_opt(2025, 10, 8);

        let reference = vec![reference_row(
            "SOFI",
            "SoFi Technologies",
            NaiveDate::from_ymd_opt(2025, 10, 18).unwrap(),
            100.0,
            50.0,
        )];

        let mut cache = ResolutionCache::new();
        let outcome = resolver().resolve_record(&mut record, Some(&reference), &mut cache);

        assert_eq!(outcome, RowOutcome::Unresolved);
        assert_eq!(record.ticker, None);
    }

    #[test]
    fn test_fuzzy_match_prefers_minimum_date_distance() {
        let mut record = blank_record();
        record.settlement_date = NaiveDate::from_ymd_opt(2025, 10, 8);

        let reference = vec![
            reference_row(
                "FAR",
                "Far Candidate",
                NaiveDate::from_ymd_opt(2025, 10, 13).unwrap(),
                100.0,
                50.0,
            ),
            reference_row(
                "NEAR",
                "Near Candidate",
                NaiveDate::from_ymd_opt(2025, 10, 9).unwrap(),
                100.0,
                50.0,
            ),
        ];

        let mut cache = ResolutionCache::new();
        resolver().resolve_record(&mut record, Some(&reference), &mut cache);
        assert_eq!(record.ticker.as_deref(), Some("NEAR"));
    }

    #[test]
    fn test_fuzzy_predicates() {
        let base = NaiveDate::from_ymd_opt(2025, 10, 8).unwrap();
        assert!(within_date_window(
            base,
            NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
            7
        ));
        assert!(!within_date_window(
            base,
            NaiveDate::from_ymd_opt(2025, 10, 16).unwrap(),
            7
        ));

        assert!(quantity_within_tolerance(100.0, 100.0, 0.10));
        assert!(quantity_within_tolerance(100.0, 109.0, 0.10));
        assert!(!quantity_within_tolerance(100.0, 111.0, 0.10));
        assert!(quantity_within_tolerance(0.0, 0.0, 0.10));
        assert!(!quantity_within_tolerance(0.0, 1.0, 0.10));

        assert!(price_within_tolerance(50.0, 50.10, 0.01));
        assert!(!price_within_tolerance(50.0, 51.0, 0.01));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut record = blank_record();
        record.ticker = Some("TPX".to_string());
        record.stock_name = Some("Tempur Sealy International".to_string());
        let mut cache = ResolutionCache::new();

        let resolver = resolver();
        resolver.resolve_record(&mut record, None, &mut cache);
        let first_pass = record.clone();
        resolver.resolve_record(&mut record, None, &mut cache);
        assert_eq!(record, first_pass);
    }

    #[test]
    fn test_unresolved_counts_in_batch_stats() {
        let mut batch = vec![blank_record()];
        let mut cache = ResolutionCache::new();
        let stats = resolver().resolve_batch(&mut batch, None, &mut cache);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(batch[0].ticker, None);
    }

    #[test]
    fn test_custom_tables_are_injectable() {
        let mut tables = OverrideTables {
            ticker_renames: HashMap::new(),
            ticker_info: HashMap::new(),
            name_to_ticker: vec![NamePattern {
                pattern: "acme".to_string(),
                ticker: "ACME".to_string(),
            }],
        };
        tables.ticker_info.insert(
            "ACME".to_string(),
            StockInfo {
                stock_name: "Acme Corp".to_string(),
                market: "NYSE".to_string(),
            },
        );
        let resolver = IdentifierResolver::new(tables, ResolverSettings::default());

        let mut record = blank_record();
        record.stock_name = Some("ACME HOLDINGS".to_string());
        let mut cache = ResolutionCache::new();
        resolver.resolve_record(&mut record, None, &mut cache);
        assert_eq!(record.ticker.as_deref(), Some("ACME"));
        assert_eq!(record.stock_name.as_deref(), Some("Acme Corp"));
    }
}
