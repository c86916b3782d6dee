//! Shard serialized tabular datasets into size-bounded tar containers.
//!
//! One run walks a directory of table files, assigns whole files to train
//! and test with a seeded shuffle, serializes rows to text records across
//! a rayon pool under a bounded failure budget, repartitions each split
//! into shuffled intermediate files, then packs those into sequentially
//! numbered tar shards per output stream and writes one plain-text
//! manifest per stream.

pub mod config;
pub mod convert;
pub mod emit;
pub mod manifest;
pub mod partition;
pub mod pipeline;
pub mod schedule;
pub mod schema;
pub mod serialize;
pub mod shard;
pub mod split;
pub mod table;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, RunReport};
pub use schema::{DataError, Record, Split, Stream, StreamId};
pub use serialize::{KeyValueSerializer, RowSerializer};
pub use table::{JsonlTableLoader, Table, TableFile, TableLoader};
