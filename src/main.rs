//! Trade Master Engine
//!
//! A tool for reconciling broker trade batches into a deduplicated master
//! dataset: split-order aggregation, identifier resolution and safe parquet
//! persistence with backup rotation.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trade_master_engine::{pipeline, PipelineConfig};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "trade-master-engine")]
#[command(about = "Merge broker trade batches into a deduplicated master dataset", long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Incoming batch CSV in the canonical schema
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Override the configured broker
    #[arg(long, value_name = "BROKER")]
    broker: Option<String>,

    /// Override the configured data type
    #[arg(short = 't', long, value_name = "TYPE")]
    data_type: Option<String>,

    /// Run everything except the disk writes
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    info!("Loading configuration from {:?}", args.config);
    let mut config =
        PipelineConfig::from_file(&args.config).context("Failed to load configuration")?;
    if let Some(broker) = args.broker {
        config.broker = broker;
    }
    if let Some(data_type) = args.data_type {
        config.data_type = data_type;
    }
    info!(
        "Processing {} / {} batch from {:?}",
        config.broker, config.data_type, args.input
    );

    // Read the incoming batch
    let batch = pipeline::read_batch_csv(&args.input)
        .context(format!("Failed to read batch file: {:?}", args.input))?;

    // Run the pipeline
    let report = pipeline::run(&config, batch, args.dry_run).context("Pipeline run failed")?;

    if report.changed {
        info!(
            "Master updated: {} new rows, {} total",
            report.new_rows, report.master_rows_after
        );
    } else {
        info!("Master already up to date");
    }
    info!("Processing completed successfully!");
    Ok(())
}
