//! Canonical trade record data model
//!
//! This module defines the canonical column schema shared by every pipeline
//! stage, plus the normalized dedup key used to decide whether two records
//! denote the same underlying trade event.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical column names, in schema order. Incoming batches are expected to
/// already use these names; translating broker-native columns is the
/// ingestion normalizer's job.
pub const CANONICAL_COLUMNS: [&str; 11] = [
    "trade_date",
    "settlement_date",
    "ticker",
    "stock_name",
    "market",
    "transaction_type",
    "quantity",
    "unit_price",
    "amount",
    "fees",
    "currency",
];

/// One canonical trade record. Identifier fields are optional because broker
/// exports routinely leave them blank after corporate actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_date: Option<NaiveDate>,
    pub settlement_date: Option<NaiveDate>,
    pub ticker: Option<String>,
    pub stock_name: Option<String>,
    pub market: Option<String>,
    pub transaction_type: String,
    pub quantity: f64,
    /// None when the price is undefined (e.g. a zero-quantity group).
    pub unit_price: Option<f64>,
    pub amount: f64,
    pub fees: f64,
    pub currency: String,
}

impl TradeRecord {
    /// Ticker with blank values normalized away.
    pub fn ticker_text(&self) -> Option<&str> {
        non_blank(&self.ticker)
    }

    /// Stock name with blank values normalized away.
    pub fn stock_name_text(&self) -> Option<&str> {
        non_blank(&self.stock_name)
    }

    /// Market with blank values normalized away.
    pub fn market_text(&self) -> Option<&str> {
        non_blank(&self.market)
    }

    /// Build the dedup key for this record over the given key columns.
    pub fn key(&self, columns: &[KeyColumn], price_precision: u32) -> DedupKey {
        let values = columns
            .iter()
            .map(|col| match col {
                KeyColumn::TradeDate => KeyValue::Date(self.trade_date),
                KeyColumn::SettlementDate => KeyValue::Date(self.settlement_date),
                KeyColumn::Ticker => {
                    KeyValue::Text(self.ticker_text().map(normalize_symbol))
                }
                KeyColumn::StockName => {
                    KeyValue::Text(self.stock_name_text().map(|s| s.trim().to_string()))
                }
                KeyColumn::Market => {
                    KeyValue::Text(self.market_text().map(|s| s.trim().to_string()))
                }
                KeyColumn::TransactionType => {
                    KeyValue::Text(Some(self.transaction_type.trim().to_string()))
                }
                KeyColumn::Quantity => {
                    KeyValue::Ticks(Some(round_to_ticks(self.quantity, price_precision)))
                }
                KeyColumn::UnitPrice => KeyValue::Ticks(
                    self.unit_price.map(|p| round_to_ticks(p, price_precision)),
                ),
                KeyColumn::Amount => {
                    KeyValue::Ticks(Some(round_to_ticks(self.amount, price_precision)))
                }
                KeyColumn::Fees => {
                    KeyValue::Ticks(Some(round_to_ticks(self.fees, price_precision)))
                }
                KeyColumn::Currency => {
                    KeyValue::Text(Some(self.currency.trim().to_string()))
                }
            })
            .collect();
        DedupKey(values)
    }
}

/// A canonical column usable in a grouping/dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumn {
    TradeDate,
    SettlementDate,
    Ticker,
    StockName,
    Market,
    TransactionType,
    Quantity,
    UnitPrice,
    Amount,
    Fees,
    Currency,
}

impl KeyColumn {
    /// Parse a configured column name. Returns None for names that are not
    /// part of the canonical schema.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "trade_date" => Some(Self::TradeDate),
            "settlement_date" => Some(Self::SettlementDate),
            "ticker" => Some(Self::Ticker),
            "stock_name" => Some(Self::StockName),
            "market" => Some(Self::Market),
            "transaction_type" => Some(Self::TransactionType),
            "quantity" => Some(Self::Quantity),
            "unit_price" => Some(Self::UnitPrice),
            "amount" => Some(Self::Amount),
            "fees" => Some(Self::Fees),
            "currency" => Some(Self::Currency),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradeDate => "trade_date",
            Self::SettlementDate => "settlement_date",
            Self::Ticker => "ticker",
            Self::StockName => "stock_name",
            Self::Market => "market",
            Self::TransactionType => "transaction_type",
            Self::Quantity => "quantity",
            Self::UnitPrice => "unit_price",
            Self::Amount => "amount",
            Self::Fees => "fees",
            Self::Currency => "currency",
        }
    }
}

/// One component of a dedup key. Float columns are carried as rounded ticks
/// so the key is hashable without float equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Date(Option<NaiveDate>),
    Text(Option<String>),
    Ticks(Option<i64>),
}

/// The composite, normalized identity of a trade record for merge purposes.
/// Two records with an equal key are the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(pub Vec<KeyValue>);

/// Round a float to an integer number of ticks at the given decimal
/// precision. A precision of 1 maps 101.04 and 100.96 to the same tick,
/// tolerating broker floating-point jitter.
pub fn round_to_ticks(value: f64, precision: u32) -> i64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() as i64
}

/// Normalize a ticker-like symbol: trimmed, upper-cased.
pub fn normalize_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Treat empty, whitespace-only and literal "None" strings as missing; the
/// raw exports use all three interchangeably.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    match value {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "None" {
                None
            } else {
                Some(trimmed)
            }
        }
        None => None,
    }
}
