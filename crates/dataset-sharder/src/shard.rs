//! Size-bounded tar shard containers.
//!
//! Each output stream owns one `ShardWriter` that appends records as
//! `{key}.json` entries, rolls to the next sequentially numbered container
//! before a write would cross the byte ceiling, and seals containers by
//! renaming a temporary path so a final shard name always means a complete
//! shard.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tar::{Builder, Header};

use crate::schema::Record;

const BLOCK: u64 = 512;
/// End-of-archive trailer written by `tar` on finish.
const TRAILER: u64 = 1024;
/// Width of the header name field; longer names spill into an extra GNU
/// long-name entry holding the NUL-terminated name.
const NAME_FIELD: u64 = 100;

/// Rotating writer for one shard stream.
pub struct ShardWriter {
    out_dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    shard_idx: usize,
    bytes_written: u64,
    current: Option<OpenShard>,
    sealed: Vec<PathBuf>,
}

struct OpenShard {
    builder: Builder<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl ShardWriter {
    /// Create a writer that targets `out_dir` with the given filename prefix.
    /// Nothing touches the disk until the first record arrives.
    pub fn new(out_dir: &Path, prefix: &str, max_bytes: u64) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            prefix: prefix.to_string(),
            max_bytes,
            shard_idx: 0,
            bytes_written: 0,
            current: None,
            sealed: Vec::new(),
        })
    }

    /// Append one record, rolling to the next shard first when the entry
    /// would push the open one past the ceiling. A record bigger than the
    /// ceiling still lands whole, alone in its own shard.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        let payload = serde_json::to_vec(record)
            .with_context(|| format!("failed to encode record {}", record.shard_key()))?;
        let name = format!("{}.json", record.shard_key());
        let cost = entry_cost(name.len() as u64, payload.len() as u64);

        if self.current.is_some() && self.bytes_written + cost > self.budget() {
            self.seal()?;
        }
        self.ensure_open()?;
        let shard = self.current.as_mut().expect("open shard must exist");

        let mut header = Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        shard
            .builder
            .append_data(&mut header, &name, payload.as_slice())
            .with_context(|| {
                format!("failed to append {} to {}", name, shard.tmp_path.display())
            })?;
        self.bytes_written += cost;
        Ok(())
    }

    /// Seal the open shard, if any, and return every sealed path in order.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.seal()?;
        Ok(self.sealed)
    }

    fn budget(&self) -> u64 {
        self.max_bytes.saturating_sub(TRAILER)
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }
        let final_path = self
            .out_dir
            .join(format!("{}-{:06}.tar", self.prefix, self.shard_idx));
        let tmp_path = final_path.with_extension("tar.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        self.current = Some(OpenShard {
            builder: Builder::new(BufWriter::new(file)),
            tmp_path,
            final_path,
        });
        self.bytes_written = 0;
        Ok(())
    }

    fn seal(&mut self) -> Result<()> {
        let Some(shard) = self.current.take() else {
            return Ok(());
        };
        let OpenShard {
            builder,
            tmp_path,
            final_path,
        } = shard;
        let mut file = builder
            .into_inner()
            .with_context(|| format!("failed to finish {}", tmp_path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
        drop(file);
        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                tmp_path.display(),
                final_path.display()
            )
        })?;
        self.sealed.push(final_path);
        self.shard_idx += 1;
        self.bytes_written = 0;
        Ok(())
    }
}

/// On-disk cost of one tar entry: header block plus the payload padded to a
/// whole number of blocks. A name past the header field adds the GNU
/// long-name entry `append_data` writes first, itself a header block plus
/// the padded name.
fn entry_cost(name_len: u64, payload_len: u64) -> u64 {
    let mut cost = BLOCK + payload_len.div_ceil(BLOCK) * BLOCK;
    if name_len > NAME_FIELD {
        cost += BLOCK + (name_len + 1).div_ceil(BLOCK) * BLOCK;
    }
    cost
}
