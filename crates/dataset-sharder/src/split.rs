use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::table::TableFile;

/// Outcome of the file-level split.
#[derive(Clone, Debug, Default)]
pub struct FileSplit {
    pub train: Vec<TableFile>,
    pub test: Vec<TableFile>,
}

/// Shuffle `files` with `seed` and split off the test fraction.
///
/// The test side receives `ceil(n * (1 - train_frac))` files, so
/// `train_frac = 1.0` yields an empty test split. Deterministic given the
/// input order, the fraction, and the seed.
pub fn split_files(mut files: Vec<TableFile>, train_frac: f64, seed: u64) -> FileSplit {
    let mut rng = StdRng::seed_from_u64(seed);
    files.shuffle(&mut rng);
    let test_len = ((files.len() as f64) * (1.0 - train_frac)).ceil() as usize;
    let test_len = test_len.min(files.len());
    let test = files.split_off(files.len() - test_len);
    FileSplit { train: files, test }
}

/// Carve a held-out slice from `rows`.
///
/// Returns `(main, Some(eval))` after shuffling with `rng`, or
/// `(rows, None)` untouched when the carve is infeasible: fewer than two
/// rows, or an eval share that would round to zero or swallow everything.
pub fn split_rows<T>(
    mut rows: Vec<T>,
    eval_frac: f64,
    rng: &mut StdRng,
) -> (Vec<T>, Option<Vec<T>>) {
    let Some(eval_len) = eval_row_count(rows.len(), eval_frac) else {
        return (rows, None);
    };
    rows.shuffle(rng);
    let eval = rows.split_off(rows.len() - eval_len);
    (rows, Some(eval))
}

fn eval_row_count(total: usize, eval_frac: f64) -> Option<usize> {
    if total < 2 {
        return None;
    }
    let eval_len = ((total as f64) * eval_frac).ceil() as usize;
    if eval_len == 0 || eval_len >= total {
        return None;
    }
    Some(eval_len)
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Blend a stable label into a base seed, so sibling shuffles driven by the
/// same run seed still differ from each other.
///
/// Hashes with FNV-1a rather than the standard library hasher, whose
/// algorithm is not fixed across releases.
pub fn derive_seed(base: u64, label: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in label.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    base ^ hash
}
