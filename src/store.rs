//! Parquet persistence for the master dataset
//!
//! The master is a single parquet file with a fixed schema matching the
//! canonical record. Saves are atomic: data is written to a unique sibling
//! temp file first and renamed over the master only after a successful close,
//! so a crash mid-write never leaves a corrupt master behind.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{
    Array, ArrayRef, Date32Array, Date32Builder, Float64Array, Float64Builder, RecordBatch,
    StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use chrono::{Datelike, NaiveDate};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::record::{TradeRecord, CANONICAL_COLUMNS};

/// Days from 0001-01-01 (chrono's CE origin) to the 1970-01-01 epoch Date32
/// counts from.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Read the persisted master. `Ok(None)` when the file does not exist yet.
pub fn load_master(path: &Path) -> EngineResult<Option<Vec<TradeRecord>>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        batch_to_records(&batch, &mut records)?;
    }
    info!("Loaded {} master rows from {:?}", records.len(), path);
    Ok(Some(records))
}

/// Persist the master atomically: write a temp sibling, fsync via close, then
/// rename over the destination. Parent directories are created as needed.
pub fn save_master_atomic(path: &Path, records: &[TradeRecord]) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    let result = write_parquet(&temp_path, records);
    if result.is_err() {
        // Leave no temp droppings behind on failure
        let _ = fs::remove_file(&temp_path);
        return result;
    }
    fs::rename(&temp_path, path)?;
    info!("Saved {} master rows to {:?}", records.len(), path);
    Ok(())
}

/// Write the human-readable CSV mirror. Callers treat failures as
/// non-fatal; the parquet master is the source of truth.
pub fn write_csv_mirror(path: &Path, records: &[TradeRecord]) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_parquet(path: &Path, records: &[TradeRecord]) -> EngineResult<()> {
    let schema = master_schema();
    let batch = records_to_batch(schema.clone(), records)?;

    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Unique temp path next to the destination so the final rename stays on one
/// filesystem.
fn temp_sibling(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("master.parquet");
    path.with_file_name(format!(".{}.tmp.{}.{}", name, std::process::id(), nanos))
}

fn master_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("trade_date", DataType::Date32, true),
        Field::new("settlement_date", DataType::Date32, true),
        Field::new("ticker", DataType::Utf8, true),
        Field::new("stock_name", DataType::Utf8, true),
        Field::new("market", DataType::Utf8, true),
        Field::new("transaction_type", DataType::Utf8, false),
        Field::new("quantity", DataType::Float64, false),
        Field::new("unit_price", DataType::Float64, true),
        Field::new("amount", DataType::Float64, false),
        Field::new("fees", DataType::Float64, false),
        Field::new("currency", DataType::Utf8, false),
    ]))
}

fn records_to_batch(schema: Arc<Schema>, records: &[TradeRecord]) -> EngineResult<RecordBatch> {
    let mut trade_date = Date32Builder::with_capacity(records.len());
    let mut settlement_date = Date32Builder::with_capacity(records.len());
    let mut ticker = StringBuilder::new();
    let mut stock_name = StringBuilder::new();
    let mut market = StringBuilder::new();
    let mut transaction_type = StringBuilder::new();
    let mut quantity = Float64Builder::with_capacity(records.len());
    let mut unit_price = Float64Builder::with_capacity(records.len());
    let mut amount = Float64Builder::with_capacity(records.len());
    let mut fees = Float64Builder::with_capacity(records.len());
    let mut currency = StringBuilder::new();

    for record in records {
        trade_date.append_option(record.trade_date.map(days_since_epoch));
        settlement_date.append_option(record.settlement_date.map(days_since_epoch));
        ticker.append_option(record.ticker.as_deref());
        stock_name.append_option(record.stock_name.as_deref());
        market.append_option(record.market.as_deref());
        transaction_type.append_value(&record.transaction_type);
        quantity.append_value(record.quantity);
        unit_price.append_option(record.unit_price);
        amount.append_value(record.amount);
        fees.append_value(record.fees);
        currency.append_value(&record.currency);
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(trade_date.finish()),
        Arc::new(settlement_date.finish()),
        Arc::new(ticker.finish()),
        Arc::new(stock_name.finish()),
        Arc::new(market.finish()),
        Arc::new(transaction_type.finish()),
        Arc::new(quantity.finish()),
        Arc::new(unit_price.finish()),
        Arc::new(amount.finish()),
        Arc::new(fees.finish()),
        Arc::new(currency.finish()),
    ];

    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn batch_to_records(batch: &RecordBatch, out: &mut Vec<TradeRecord>) -> EngineResult<()> {
    let missing: Vec<String> = CANONICAL_COLUMNS
        .iter()
        .filter(|name| batch.column_by_name(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::SchemaMismatch { missing });
    }

    let trade_date = date_column(batch, "trade_date")?;
    let settlement_date = date_column(batch, "settlement_date")?;
    let ticker = string_column(batch, "ticker")?;
    let stock_name = string_column(batch, "stock_name")?;
    let market = string_column(batch, "market")?;
    let transaction_type = string_column(batch, "transaction_type")?;
    let quantity = float_column(batch, "quantity")?;
    let unit_price = float_column(batch, "unit_price")?;
    let amount = float_column(batch, "amount")?;
    let fees = float_column(batch, "fees")?;
    let currency = string_column(batch, "currency")?;

    out.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        out.push(TradeRecord {
            trade_date: date_at(trade_date, i),
            settlement_date: date_at(settlement_date, i),
            ticker: string_at(ticker, i),
            stock_name: string_at(stock_name, i),
            market: string_at(market, i),
            transaction_type: string_at(transaction_type, i).unwrap_or_default(),
            quantity: float_at(quantity, i).unwrap_or(0.0),
            unit_price: float_at(unit_price, i),
            amount: float_at(amount, i).unwrap_or(0.0),
            fees: float_at(fees, i).unwrap_or(0.0),
            currency: string_at(currency, i).unwrap_or_default(),
        });
    }
    Ok(())
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

fn date_at(array: &Date32Array, i: usize) -> Option<NaiveDate> {
    if array.is_null(i) {
        return None;
    }
    NaiveDate::from_num_days_from_ce_opt(array.value(i) + EPOCH_DAYS_FROM_CE)
}

fn string_at(array: &StringArray, i: usize) -> Option<String> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i).to_string())
    }
}

fn float_at(array: &Float64Array, i: usize) -> Option<f64> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i))
    }
}

fn date_column<'a>(batch: &'a RecordBatch, name: &str) -> EngineResult<&'a Date32Array> {
    typed_column(batch, name)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> EngineResult<&'a StringArray> {
    typed_column(batch, name)
}

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> EngineResult<&'a Float64Array> {
    typed_column(batch, name)
}

fn typed_column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> EngineResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            EngineError::invalid_batch(format!("Column '{}' has an unexpected type", name))
        })
}
