use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::emit;
use crate::schema::Record;
use crate::serialize::RowSerializer;
use crate::table::{TableFile, TableLoader};

/// Shared count of failed tables across the whole run, tripping once the
/// ceiling is crossed.
pub struct FailureBudget {
    failed: AtomicUsize,
    cap: usize,
    tripped: AtomicBool,
}

impl FailureBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            failed: AtomicUsize::new(0),
            cap,
            tripped: AtomicBool::new(false),
        }
    }

    /// Record one failed table. Returns false once the budget is exhausted.
    pub fn record_failure(&self) -> bool {
        let seen = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
        if seen > self.cap {
            self.tripped.store(true, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Records emitted for one split plus the failure accounting for the stage.
#[derive(Debug)]
pub struct EmitStats {
    pub records: Vec<Record>,
    pub tables_failed: usize,
    pub records_dropped: usize,
}

/// Serialize every table of one split across the rayon pool.
///
/// Each table is its own fault isolation boundary: a failure is logged,
/// counted against `budget`, and leaves sibling tables untouched. Workers
/// observing a tripped budget skip remaining tables, and the stage then
/// aborts with a run-level error.
pub fn emit_split(
    label: &str,
    files: &[TableFile],
    loader: &dyn TableLoader,
    serializer: &dyn RowSerializer,
    max_chars: usize,
    budget: &FailureBudget,
) -> Result<EmitStats> {
    if files.is_empty() {
        return Ok(EmitStats {
            records: Vec::new(),
            tables_failed: 0,
            records_dropped: 0,
        });
    }

    info!("Serializing {} {} table(s)", files.len(), label);
    let pb = default_progress_bar(files.len() as u64);
    let failed = AtomicUsize::new(0);
    let dropped = AtomicUsize::new(0);

    let outputs: Vec<Vec<Record>> = files
        .par_iter()
        .map(|table| {
            if budget.is_tripped() {
                pb.inc(1);
                return Vec::new();
            }
            let out = emit::emit_records(table, loader, serializer, max_chars);
            pb.inc(1);
            match out {
                Ok((records, rows_dropped)) => {
                    dropped.fetch_add(rows_dropped, Ordering::Relaxed);
                    records
                }
                Err(err) => {
                    warn!("Failed to process table {}: {err:#}", table.path.display());
                    failed.fetch_add(1, Ordering::Relaxed);
                    budget.record_failure();
                    Vec::new()
                }
            }
        })
        .collect();
    pb.finish_with_message("tables processed");

    if budget.is_tripped() {
        bail!(
            "failed table budget exceeded: {} table(s) failed (limit {})",
            budget.failures(),
            budget.cap()
        );
    }

    Ok(EmitStats {
        records: outputs.into_iter().flatten().collect(),
        tables_failed: failed.into_inner(),
        records_dropped: dropped.into_inner(),
    })
}

/// Shuffle `records` with `seed` and deal them into at most `partitions`
/// near-equal groups, so no partition is dominated by one source table.
/// Group count is capped by the record count; no group is empty.
pub fn repartition<T>(mut records: Vec<T>, partitions: usize, seed: u64) -> Vec<Vec<T>> {
    if records.is_empty() {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    let count = partitions.clamp(1, records.len());
    let base = records.len() / count;
    let extra = records.len() % count;
    let mut out = Vec::with_capacity(count);
    let mut rest = records;
    for idx in 0..count {
        let take = base + usize::from(idx < extra);
        let tail = rest.split_off(take);
        out.push(rest);
        rest = tail;
    }
    out
}

pub(crate) fn default_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb
}
