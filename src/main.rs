use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use bulk_optimizer::{
    BenchmarkConfig, BenchmarkRunner, ImportMode, ImporterConfig, MemoryStore, MemoryStoreConfig,
    StrategyKind, init_logger,
};

#[derive(Parser, Debug)]
#[command(
    name = "bulk-optimizer",
    about = "Compare bulk import strategies against a simulated document store"
)]
struct Args {
    /// Strategy to run: `all`, `parallel`, `bulk-operations` or `stored-procedure`.
    #[arg(long, default_value = "all")]
    strategy: String,

    /// Write mode (`create` or `upsert`).
    #[arg(long, default_value = "create")]
    mode: ImportMode,

    /// Number of records to generate.
    #[arg(long)]
    items: Option<usize>,

    /// Provisioned throughput in RU/s; 0 disables throttling.
    #[arg(long)]
    throughput: Option<f64>,

    /// Pause between strategy runs, in milliseconds.
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Concurrent writes of the parallel strategy.
    #[arg(long)]
    parallelism: Option<usize>,

    /// Operations per batch submission.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Largest chunk sent to the procedure before pre-splitting.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Let the procedure skip items that already exist.
    #[arg(long)]
    ignore_conflicts: bool,

    /// Print reports as JSON lines.
    #[arg(long)]
    json: bool,
}

fn strategies(selection: &str) -> Result<Vec<StrategyKind>, String> {
    if selection.trim().eq_ignore_ascii_case("all") {
        return Ok(StrategyKind::ALL.to_vec());
    }
    selection.split(',').map(str::parse).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let strategies = strategies(&args.strategy)?;

    let mut store_config = MemoryStoreConfig::from_env();
    if let Some(throughput) = args.throughput {
        store_config = store_config.with_throughput((throughput > 0.0).then_some(throughput));
    }

    let mut importer_config = ImporterConfig::from_env();
    if let Some(parallelism) = args.parallelism {
        importer_config = importer_config.with_parallelism(parallelism);
    }
    if let Some(batch_size) = args.batch_size {
        importer_config = importer_config.with_batch_size(batch_size);
    }
    if args.chunk_size.is_some() {
        importer_config = importer_config.with_max_chunk_size(args.chunk_size);
    }
    if args.ignore_conflicts {
        importer_config = importer_config.with_ignore_conflicts(true);
    }

    let mut benchmark_config = BenchmarkConfig::from_env();
    if let Some(items) = args.items {
        benchmark_config.items_to_insert = items;
    }
    if let Some(cooldown_ms) = args.cooldown_ms {
        benchmark_config.cooldown = Duration::from_millis(cooldown_ms);
    }

    log::info!(
        "starting benchmark: {} items, strategies {:?}",
        benchmark_config.items_to_insert,
        strategies
    );

    let store = Arc::new(MemoryStore::new(store_config));
    let mut runner = BenchmarkRunner::new(store, importer_config, benchmark_config);
    let reports = runner.run_sequence(&strategies, args.mode).await?;

    for report in &reports {
        if args.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            println!("{report}");
            for error in report.errors.iter().take(5) {
                println!("    {error}");
            }
        }
    }

    Ok(())
}
