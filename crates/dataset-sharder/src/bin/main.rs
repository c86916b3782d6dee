use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use dataset_sharder::config::defaults;
use dataset_sharder::{JsonlTableLoader, KeyValueSerializer, Pipeline, PipelineConfig};
use env_logger::Env;
use log::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Shard serialized tabular datasets into size-bounded tar containers"
)]
struct Cli {
    /// Root directory scanned recursively for .jsonl / .jsonl.gz tables
    #[arg(long, value_name = "DIR")]
    input: PathBuf,

    /// Output directory for shards and manifests
    #[arg(long, value_name = "DIR")]
    output: PathBuf,

    /// Process at most N tables, taken in sorted discovery order
    #[arg(long, value_name = "N")]
    max_tables: Option<usize>,

    /// Fraction of table files assigned to the train split
    #[arg(long, value_name = "FRAC", default_value_t = defaults::TRAIN_FRAC)]
    train_frac: f64,

    /// Seed for the file shuffle and derived per-partition generators
    #[arg(long, value_name = "SEED", default_value_t = defaults::SPLIT_RANDOM_SEED)]
    seed: u64,

    /// Partitions per worker produced by repartitioning
    #[arg(long, value_name = "N", default_value_t = defaults::OUTPUT_SHARD_FACTOR)]
    output_shard_factor: usize,

    /// Records appended per shard-writer lock acquisition
    #[arg(long, value_name = "N", default_value_t = defaults::CHUNK_SIZE)]
    chunk_size: usize,

    /// Byte ceiling per shard container, in megabytes
    #[arg(long, value_name = "MB", default_value_t = defaults::TARGET_SHARD_SIZE_MB)]
    shard_size_mb: u64,

    /// Prefix prepended to every shard filename
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,

    /// Number of worker threads (defaults to all cores)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Fraction of train partitions that attempt an eval carve
    #[arg(long, value_name = "FRAC", default_value_t = defaults::EVAL_ATTEMPT_FRAC)]
    eval_attempt_frac: f64,

    /// Fraction of rows carved into the eval stream per attempting partition
    #[arg(long, value_name = "FRAC", default_value_t = defaults::EVAL_FRAC)]
    eval_frac: f64,

    /// Abort once more than N tables have failed
    #[arg(long, value_name = "N", default_value_t = defaults::MAX_FAILED_TABLES)]
    max_failed_tables: usize,

    /// Model context length bounding serialized record size
    #[arg(long, value_name = "N", default_value_t = defaults::MAX_MODEL_TOKENS)]
    max_model_tokens: usize,

    /// Average characters per token for the record size gate
    #[arg(long, value_name = "CHARS", default_value_t = defaults::AVG_CHARS_PER_TOKEN)]
    avg_chars_per_token: f64,

    /// Serialize this column as the prediction target instead of the last one
    #[arg(long, value_name = "COLUMN")]
    target_column: Option<String>,

    /// Overwrite existing outputs if present
    #[arg(long)]
    overwrite: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = PipelineConfig {
        input_dir: cli.input,
        output_dir: cli.output,
        max_tables: cli.max_tables,
        train_frac: cli.train_frac,
        split_random_seed: cli.seed,
        output_shard_factor: cli.output_shard_factor,
        chunk_size: cli.chunk_size,
        target_shard_size_mb: cli.shard_size_mb,
        output_file_prefix: cli.prefix,
        workers: cli.workers,
        eval_attempt_frac: cli.eval_attempt_frac,
        eval_frac: cli.eval_frac,
        max_failed_tables: cli.max_failed_tables,
        max_model_tokens: cli.max_model_tokens,
        avg_chars_per_token: cli.avg_chars_per_token,
        overwrite: cli.overwrite,
    };
    let serializer = KeyValueSerializer {
        target_column: cli.target_column,
    };

    let report = Pipeline::new(config, JsonlTableLoader, serializer).run()?;
    info!(
        "Processed {} table(s), {} failed, {} oversized record(s) dropped",
        report.tables_discovered, report.tables_failed, report.records_dropped
    );
    info!(
        "Completed sharding: {} train / {} eval / {} test record(s) in {:.1?}",
        report.train_records, report.train_eval_records, report.test_records, report.elapsed
    );
    Ok(())
}
