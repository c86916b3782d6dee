//! Shared record, split, and stream types for the sharding pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One serialized training example flowing through the pipeline.
///
/// Records are produced by a [`RowSerializer`](crate::serialize::RowSerializer),
/// carried through the intermediate partition files as JSON lines, and finally
/// stored as `{key}.json` entries inside the output shard containers. The
/// secondary fields a serializer attaches are flattened into the JSON object;
/// the sorted map keeps the encoding stable across runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Serialized text form of the source row.
    pub text: String,
    /// Value of the prediction target named in `text`.
    pub label: String,
    /// Stem of the table file this row came from.
    pub source_file: String,
    /// Zero-based position of the row in its source table.
    pub row_index: u64,
    /// Serializer-provided secondary fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Record {
    /// Container entry key, unique across a run as long as table stems are.
    pub fn shard_key(&self) -> String {
        format!("{}__{}", self.source_file, self.row_index)
    }
}

/// Typed failure a loader or serializer reports for a whole table.
///
/// These are the recoverable per-table conditions: the file contributes zero
/// records, the failure counts against the run's table budget, and the run
/// continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataError {
    /// No column in the table qualifies as a prediction target.
    NoTargetCandidates { table: String },
    /// A cell or row could not be interpreted.
    MalformedValue { detail: String },
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::NoTargetCandidates { table } => {
                write!(f, "no target candidates in table '{table}'")
            }
            DataError::MalformedValue { detail } => write!(f, "malformed value: {detail}"),
        }
    }
}

impl std::error::Error for DataError {}

/// Which side of the file-level split a table landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    pub fn all() -> [Split; 2] {
        [Split::Train, Split::Test]
    }
}

/// Output stream within a split. Only train carves a held-out eval stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    Main,
    Eval,
}

/// A (split, stream) pair naming one shard sequence and its manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub split: Split,
    pub stream: Stream,
}

impl StreamId {
    pub const TRAIN_MAIN: StreamId = StreamId {
        split: Split::Train,
        stream: Stream::Main,
    };
    pub const TRAIN_EVAL: StreamId = StreamId {
        split: Split::Train,
        stream: Stream::Eval,
    };
    pub const TEST_MAIN: StreamId = StreamId {
        split: Split::Test,
        stream: Stream::Main,
    };

    /// Stable label used in manifest filenames: `train`, `traineval`, `test`.
    pub fn label(self) -> String {
        match self.stream {
            Stream::Main => self.split.name().to_string(),
            Stream::Eval => format!("{}eval", self.split.name()),
        }
    }

    /// Shard filename prefix, honoring the optional run-wide file prefix.
    ///
    /// The eval suffix attaches after the split name, so a run with prefix
    /// `v2` writes `v2-train-000000.tar` and `v2-traineval-000000.tar`.
    pub fn shard_prefix(self, file_prefix: Option<&str>) -> String {
        let base = match file_prefix {
            Some(prefix) => format!("{prefix}-{}", self.split.name()),
            None => self.split.name().to_string(),
        };
        match self.stream {
            Stream::Main => base,
            Stream::Eval => format!("{base}eval"),
        }
    }

    pub fn manifest_name(self) -> String {
        format!("{}-files.txt", self.label())
    }
}
