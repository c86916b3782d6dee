use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::info;
use rayon::prelude::*;

use crate::schedule::default_progress_bar;
use crate::schema::{Record, Split};

/// Directory holding one split's intermediate partition files.
pub fn split_dir(output_dir: &Path, split: Split) -> PathBuf {
    output_dir.join(split.name())
}

/// Write every partition of `split` under `{output_dir}/{split}/` as gzipped
/// JSONL. Returns the written paths in partition order.
pub fn write_split_partitions(
    output_dir: &Path,
    split: Split,
    partitions: &[Vec<Record>],
) -> Result<Vec<PathBuf>> {
    if partitions.is_empty() {
        return Ok(Vec::new());
    }
    let dir = split_dir(output_dir, split);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    info!(
        "Writing {} {} partition file(s)",
        partitions.len(),
        split.name()
    );
    let pb = default_progress_bar(partitions.len() as u64);
    let paths = partitions
        .par_iter()
        .enumerate()
        .map(|(idx, records)| {
            let out = write_partition(&dir, idx, records);
            pb.inc(1);
            out
        })
        .collect::<Result<Vec<_>>>()?;
    pb.finish_with_message("partitions written");
    Ok(paths)
}

fn write_partition(dir: &Path, index: usize, records: &[Record]) -> Result<PathBuf> {
    let path = dir.join(format!("part-{index:06}.jsonl.gz"));
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = GzEncoder::new(file, Compression::default());
    for record in records {
        let line = serde_json::to_string(record)
            .with_context(|| format!("failed to encode record for {}", path.display()))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer
        .finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    Ok(path)
}

/// Read a partition file back into memory.
pub fn read_partition(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(GzDecoder::new(file));
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("failed to read line from {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("failed to parse record in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}
