use anyhow::{Context, Result};
use log::warn;

use crate::schema::Record;
use crate::serialize::RowSerializer;
use crate::table::{TableFile, TableLoader};

/// Load one table and serialize its rows into records.
///
/// Returns the surviving records plus the number of rows dropped for
/// exceeding `max_chars`. Dropped rows are logged and never count against
/// the run's table budget; any loader or serializer failure fails the whole
/// table instead.
pub fn emit_records(
    table: &TableFile,
    loader: &dyn TableLoader,
    serializer: &dyn RowSerializer,
    max_chars: usize,
) -> Result<(Vec<Record>, usize)> {
    let data = loader
        .load(&table.path)
        .with_context(|| format!("failed to load {}", table.path.display()))?;

    let mut records = Vec::with_capacity(data.len());
    let mut dropped = 0usize;
    for (idx, row) in data.rows.iter().enumerate() {
        let record = serializer
            .serialize_row(row, &table.stem, idx as u64)
            .with_context(|| {
                format!("failed to serialize row {} of {}", idx, table.path.display())
            })?;
        if record.text.chars().count() > max_chars {
            dropped += 1;
            continue;
        }
        records.push(record);
    }
    if dropped > 0 {
        warn!(
            "Dropped {} oversized record(s) from {}",
            dropped,
            table.path.display()
        );
    }
    Ok((records, dropped))
}
