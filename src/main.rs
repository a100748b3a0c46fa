use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

use card_valuation::{setup_output_schema, write_batch, EngineConfig, Snapshot, ValuationPipeline, ValuationRun};

/// Card valuation batch driver - reconcile price observations into market values
#[derive(Parser, Debug)]
#[command(name = "card-valuation")]
#[command(version, about, long_about = None)]
struct Args {
    /// Item records CSV
    #[arg(long)]
    items: PathBuf,

    /// Price observations CSV
    #[arg(long)]
    observations: PathBuf,

    /// SQLite database receiving the batch
    #[arg(long, default_value = "valuations.db")]
    db: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Process at most K items
    #[arg(long)]
    limit: Option<usize>,

    /// Also export the full batch outcome as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.limit.is_some() {
        config.pipeline.batch_limit = args.limit;
    }

    config.logging.init();

    let started_at = Utc::now();

    // 1. Load the snapshot in full before any item is processed
    let snapshot = Snapshot::load(&args.items, &args.observations)?;
    tracing::info!(
        items = snapshot.items.len(),
        observations = snapshot.observations.len(),
        "Snapshot loaded"
    );

    // 2. Run the pipeline
    let pipeline = ValuationPipeline::from_config(&config)?;
    let outcome = pipeline.run(&snapshot);

    // 3. Write the batch once
    let mut conn = Connection::open(&args.db)
        .with_context(|| format!("Failed to open database: {}", args.db.display()))?;
    setup_output_schema(&conn)?;

    let run = ValuationRun::new(started_at, outcome.summary.clone());
    write_batch(&mut conn, &run, &outcome.reports)?;

    // 4. Optional JSON export
    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&outcome)?;
        fs::write(path, json).with_context(|| format!("Failed to write JSON export: {}", path.display()))?;
        tracing::info!(path = %path.display(), "JSON export written");
    }

    tracing::info!(run_id = %run.run_id, "{}", outcome.summary.summary());

    Ok(())
}
