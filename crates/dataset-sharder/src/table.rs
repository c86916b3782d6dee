use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use serde_json::Value;

use crate::schema::DataError;

/// A discovered source table on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableFile {
    /// Full path to the table file.
    pub path: PathBuf,
    /// Logical dataset name: the filename with the table extension stripped.
    pub stem: String,
}

/// One table row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// An in-memory table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reads source tables into memory.
///
/// Unreadable or non-tabular content surfaces as an error carrying
/// [`DataError`] where the condition is a data problem; either way the table
/// contributes zero records and counts against the run's table budget.
pub trait TableLoader: Sync {
    /// Strip the loader's table extension from `file_name`, returning the
    /// stem, or `None` when the file is not a table this loader reads.
    fn table_stem(&self, file_name: &str) -> Option<String>;

    /// Load the table at `path`.
    fn load(&self, path: &Path) -> Result<Table>;
}

/// Reference loader for JSON-lines tables (`.jsonl` / `.jsonl.gz`), one JSON
/// object per row. An empty table is fine; a line that is not a JSON object
/// is the loader's malformed-value condition.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonlTableLoader;

impl TableLoader for JsonlTableLoader {
    fn table_stem(&self, file_name: &str) -> Option<String> {
        let stem = file_name
            .strip_suffix(".jsonl.gz")
            .or_else(|| file_name.strip_suffix(".jsonl"))?;
        if stem.is_empty() {
            return None;
        }
        Some(stem.to_string())
    }

    fn load(&self, path: &Path) -> Result<Table> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let reader: Box<dyn BufRead> = if path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false)
        {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut rows = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("failed to read line from {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|_| {
                DataError::MalformedValue {
                    detail: format!("line {} of {} is not valid JSON", idx + 1, path.display()),
                }
            })?;
            let Value::Object(row) = value else {
                return Err(DataError::MalformedValue {
                    detail: format!("line {} of {} is not an object", idx + 1, path.display()),
                }
                .into());
            };
            rows.push(row);
        }
        Ok(Table { rows })
    }
}

/// Find every table under `root` that `loader` claims, sorted by path, with
/// the `max_tables` cap applied after sorting. Two tables sharing a stem
/// would collide in the shard key space, so duplicates are rejected.
pub fn discover_tables(
    root: &Path,
    loader: &dyn TableLoader,
    max_tables: Option<usize>,
) -> Result<Vec<TableFile>> {
    let mut tables = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = match path.file_name().and_then(|s| s.to_str()) {
            Some(n) => n,
            None => continue,
        };
        let Some(stem) = loader.table_stem(name) else {
            continue;
        };
        tables.push(TableFile {
            path: path.to_path_buf(),
            stem,
        });
    }
    tables.sort_by(|a, b| a.path.cmp(&b.path));
    if let Some(cap) = max_tables {
        tables.truncate(cap);
    }

    let mut seen = HashSet::new();
    for table in &tables {
        if !seen.insert(table.stem.as_str()) {
            bail!(
                "duplicate table stem '{}' (second occurrence at {})",
                table.stem,
                table.path.display()
            );
        }
    }
    Ok(tables)
}
