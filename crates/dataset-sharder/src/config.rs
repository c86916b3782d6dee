use std::path::PathBuf;
use std::thread::available_parallelism;

use anyhow::{Result, bail};

/// Configuration for one end-to-end sharding run, supplied by the CLI.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Directory scanned recursively for source tables.
    pub input_dir: PathBuf,
    /// Output directory for shards and manifests.
    pub output_dir: PathBuf,
    /// Cap on the number of tables processed, applied after sorted discovery.
    pub max_tables: Option<usize>,
    /// Fraction of table files assigned to the train split.
    pub train_frac: f64,
    /// Seed for the file shuffle and every derived per-partition generator.
    pub split_random_seed: u64,
    /// Partition files per worker produced by repartitioning.
    pub output_shard_factor: usize,
    /// Records flushed into a shard writer per lock acquisition.
    pub chunk_size: usize,
    /// Byte ceiling for one shard container, in megabytes.
    pub target_shard_size_mb: u64,
    /// Optional prefix prepended to every shard filename.
    pub output_file_prefix: Option<String>,
    /// Worker thread count (None = all cores).
    pub workers: Option<usize>,
    /// Fraction of train partition files that attempt an eval carve.
    pub eval_attempt_frac: f64,
    /// Fraction of rows carved into the eval stream per attempting file.
    pub eval_frac: f64,
    /// Abort the run once more than this many tables have failed.
    pub max_failed_tables: usize,
    /// Model context length bounding serialized record size.
    pub max_model_tokens: usize,
    /// Average characters per token for the record size gate.
    pub avg_chars_per_token: f64,
    /// Replace existing outputs when true.
    pub overwrite: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            max_tables: None,
            train_frac: defaults::TRAIN_FRAC,
            split_random_seed: defaults::SPLIT_RANDOM_SEED,
            output_shard_factor: defaults::OUTPUT_SHARD_FACTOR,
            chunk_size: defaults::CHUNK_SIZE,
            target_shard_size_mb: defaults::TARGET_SHARD_SIZE_MB,
            output_file_prefix: None,
            workers: None,
            eval_attempt_frac: defaults::EVAL_ATTEMPT_FRAC,
            eval_frac: defaults::EVAL_FRAC,
            max_failed_tables: defaults::MAX_FAILED_TABLES,
            max_model_tokens: defaults::MAX_MODEL_TOKENS,
            avg_chars_per_token: defaults::AVG_CHARS_PER_TOKEN,
            overwrite: false,
        }
    }
}

impl PipelineConfig {
    /// Byte ceiling for one shard container.
    pub fn target_shard_bytes(&self) -> u64 {
        self.target_shard_size_mb * 1024 * 1024
    }

    /// Character budget above which a serialized record is dropped.
    pub fn max_record_chars(&self) -> usize {
        (self.max_model_tokens as f64 * self.avg_chars_per_token) as usize
    }

    /// Effective worker count for the repartition target.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    /// Reject out-of-range knobs before any work starts.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.train_frac) {
            bail!("train_frac must be within [0, 1], got {}", self.train_frac);
        }
        if !(0.0..=1.0).contains(&self.eval_attempt_frac) {
            bail!(
                "eval_attempt_frac must be within [0, 1], got {}",
                self.eval_attempt_frac
            );
        }
        if !(0.0..=1.0).contains(&self.eval_frac) {
            bail!("eval_frac must be within [0, 1], got {}", self.eval_frac);
        }
        if self.output_shard_factor == 0 {
            bail!("output_shard_factor must be > 0");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if self.target_shard_size_mb == 0 {
            bail!("target_shard_size_mb must be > 0");
        }
        if self.workers == Some(0) {
            bail!("workers must be > 0 when specified");
        }
        if self.max_model_tokens == 0 {
            bail!("max_model_tokens must be > 0");
        }
        if self.avg_chars_per_token.is_nan() || self.avg_chars_per_token <= 0.0 {
            bail!(
                "avg_chars_per_token must be > 0, got {}",
                self.avg_chars_per_token
            );
        }
        Ok(())
    }
}

pub mod defaults {
    pub const TRAIN_FRAC: f64 = 0.975;
    pub const SPLIT_RANDOM_SEED: u64 = 42;
    pub const OUTPUT_SHARD_FACTOR: usize = 1000;
    pub const CHUNK_SIZE: usize = 64;
    pub const TARGET_SHARD_SIZE_MB: u64 = 500;
    pub const EVAL_ATTEMPT_FRAC: f64 = 0.1;
    pub const EVAL_FRAC: f64 = 0.1;
    pub const MAX_FAILED_TABLES: usize = 1000;
    pub const MAX_MODEL_TOKENS: usize = 4096;
    pub const AVG_CHARS_PER_TOKEN: f64 = 3.5;
}
