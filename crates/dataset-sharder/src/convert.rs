//! Pack intermediate partition files into per-stream shard containers.
//!
//! Partitions are consumed across the rayon pool. Each worker reads one
//! partition, carves a held-out eval slice when its seeded draw says so
//! (train split only), appends the records to the shared stream writers,
//! and deletes the partition file once everything it held is on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use log::info;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::partition::read_partition;
use crate::schedule::default_progress_bar;
use crate::schema::{Record, Split, StreamId};
use crate::shard::ShardWriter;
use crate::split::{self, derive_seed};

/// Sealed shard paths and record count for one output stream.
pub struct StreamOutput {
    pub shards: Vec<PathBuf>,
    pub records: usize,
}

/// Everything the packing stage produced, by stream.
pub struct PackOutcome {
    pub train_main: StreamOutput,
    pub train_eval: StreamOutput,
    pub test_main: StreamOutput,
}

/// One shard writer shared across partition workers.
struct StreamSink {
    writer: Mutex<ShardWriter>,
    records: AtomicUsize,
}

impl StreamSink {
    fn new(config: &PipelineConfig, id: StreamId) -> Result<Self> {
        let prefix = id.shard_prefix(config.output_file_prefix.as_deref());
        let writer = ShardWriter::new(&config.output_dir, &prefix, config.target_shard_bytes())?;
        Ok(Self {
            writer: Mutex::new(writer),
            records: AtomicUsize::new(0),
        })
    }

    /// Append records in chunks so no partition holds the writer lock for
    /// its whole duration.
    fn append(&self, records: &[Record], chunk_size: usize) -> Result<()> {
        for chunk in records.chunks(chunk_size.max(1)) {
            let mut writer = self.writer.lock();
            for record in chunk {
                writer.write(record)?;
            }
        }
        self.records.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    }

    fn finish(self) -> Result<StreamOutput> {
        let shards = self.writer.into_inner().finish()?;
        Ok(StreamOutput {
            shards,
            records: self.records.into_inner(),
        })
    }
}

/// Drain every partition of both splits into the three shard streams.
pub fn pack_partitions(
    config: &PipelineConfig,
    train_partitions: &[PathBuf],
    test_partitions: &[PathBuf],
) -> Result<PackOutcome> {
    let train_main = StreamSink::new(config, StreamId::TRAIN_MAIN)?;
    let train_eval = StreamSink::new(config, StreamId::TRAIN_EVAL)?;
    let test_main = StreamSink::new(config, StreamId::TEST_MAIN)?;

    let tasks: Vec<(Split, &PathBuf)> = train_partitions
        .iter()
        .map(|path| (Split::Train, path))
        .chain(test_partitions.iter().map(|path| (Split::Test, path)))
        .collect();

    info!("Packing {} partition(s) into shard containers", tasks.len());
    let pb = default_progress_bar(tasks.len() as u64);
    tasks.par_iter().try_for_each(|&(split, path)| {
        let (main, eval) = match split {
            Split::Train => (&train_main, Some(&train_eval)),
            Split::Test => (&test_main, None),
        };
        let result = pack_partition(config, split, path, main, eval);
        pb.inc(1);
        result
    })?;
    pb.finish_with_message("partitions packed");

    Ok(PackOutcome {
        train_main: train_main.finish()?,
        train_eval: train_eval.finish()?,
        test_main: test_main.finish()?,
    })
}

/// Pack one partition file, then remove it. The file survives any failure
/// on the way so an aborted run keeps its intermediates.
fn pack_partition(
    config: &PipelineConfig,
    split: Split,
    path: &Path,
    main: &StreamSink,
    eval: Option<&StreamSink>,
) -> Result<()> {
    let records = read_partition(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    // Seed per partition so the eval draw does not depend on worker order.
    let label = format!("{}/{file_name}", split.name());
    let mut rng = StdRng::seed_from_u64(derive_seed(config.split_random_seed, &label));

    let (main_records, eval_records) = match eval {
        Some(_) if rng.gen_bool(config.eval_attempt_frac) => {
            split::split_rows(records, config.eval_frac, &mut rng)
        }
        _ => (records, None),
    };

    if let (Some(sink), Some(rows)) = (eval, &eval_records) {
        sink.append(rows, config.chunk_size)?;
    }
    main.append(&main_records, config.chunk_size)?;

    fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(())
}
