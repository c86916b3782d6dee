use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::{DataError, Record};
use crate::table::Row;

/// Turns table rows into text records.
///
/// Implementations must be pure: the emitter owns logging, size gating, and
/// failure accounting.
pub trait RowSerializer: Sync {
    /// Serialize one row. `table` is the source table stem and `row_index`
    /// the row's position within it; both flow into the record's provenance
    /// fields.
    fn serialize_row(&self, row: &Row, table: &str, row_index: u64) -> Result<Record, DataError>;
}

/// Reference serializer rendering rows as `column = value` pairs followed by
/// a question naming the target column.
///
/// The target is the configured column when set, otherwise the last column in
/// sorted order. The label is the target cell's scalar value. Null feature
/// cells are skipped; non-scalar cells are malformed.
#[derive(Clone, Debug, Default)]
pub struct KeyValueSerializer {
    pub target_column: Option<String>,
}

impl RowSerializer for KeyValueSerializer {
    fn serialize_row(&self, row: &Row, table: &str, row_index: u64) -> Result<Record, DataError> {
        // Sort so the rendering does not depend on serde_json's map backing.
        let mut columns: Vec<&String> = row.keys().collect();
        columns.sort();

        if columns.len() < 2 {
            return Err(DataError::NoTargetCandidates {
                table: table.to_string(),
            });
        }
        let target = match &self.target_column {
            Some(name) => {
                if !row.contains_key(name) {
                    return Err(DataError::NoTargetCandidates {
                        table: table.to_string(),
                    });
                }
                name.as_str()
            }
            None => columns.last().map(|c| c.as_str()).unwrap_or_default(),
        };

        let label = match row.get(target).and_then(scalar_text) {
            Some(text) if !text.is_empty() => text,
            Some(_) => {
                return Err(DataError::NoTargetCandidates {
                    table: table.to_string(),
                });
            }
            None => {
                return Err(DataError::MalformedValue {
                    detail: format!("non-scalar value in target column '{target}'"),
                });
            }
        };

        let mut pairs = Vec::with_capacity(columns.len() - 1);
        for column in &columns {
            if column.as_str() == target {
                continue;
            }
            match row.get(*column) {
                Some(Value::Null) | None => continue,
                Some(value) => match scalar_text(value) {
                    Some(text) => pairs.push(format!("{column} = {text}")),
                    None => {
                        return Err(DataError::MalformedValue {
                            detail: format!("non-scalar value in column '{column}'"),
                        });
                    }
                },
            }
        }
        if pairs.is_empty() {
            return Err(DataError::NoTargetCandidates {
                table: table.to_string(),
            });
        }

        Ok(Record {
            text: format!("{}. What is {}?", pairs.join(". "), target),
            label,
            source_file: table.to_string(),
            row_index,
            extra: BTreeMap::new(),
        })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
