//! End-to-end orchestration: discover, split, serialize, repartition,
//! pack, manifest.

use std::fs;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::{info, warn};

use crate::config::PipelineConfig;
use crate::convert::pack_partitions;
use crate::manifest::write_manifest;
use crate::partition::{split_dir, write_split_partitions};
use crate::schedule::{self, FailureBudget};
use crate::schema::{Split, StreamId};
use crate::serialize::RowSerializer;
use crate::split::{self, derive_seed};
use crate::table::{TableLoader, discover_tables};

/// Final summary of one run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub tables_discovered: usize,
    pub train_tables: usize,
    pub test_tables: usize,
    pub tables_failed: usize,
    pub records_dropped: usize,
    pub train_records: usize,
    pub train_eval_records: usize,
    pub test_records: usize,
    pub train_shards: usize,
    pub train_eval_shards: usize,
    pub test_shards: usize,
    pub elapsed: Duration,
}

/// One configured sharding run over an injected loader and serializer.
pub struct Pipeline<L, S> {
    config: PipelineConfig,
    loader: L,
    serializer: S,
}

impl<L: TableLoader, S: RowSerializer> Pipeline<L, S> {
    pub fn new(config: PipelineConfig, loader: L, serializer: S) -> Self {
        Self {
            config,
            loader,
            serializer,
        }
    }

    /// Run every stage to completion on the configured thread pool.
    pub fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let start = Instant::now();
        let process = || self.run_inner();
        let mut report = if let Some(n) = self.config.workers {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .context("failed to build rayon thread pool")?
                .install(process)?
        } else {
            process()?
        };
        report.elapsed = start.elapsed();
        Ok(report)
    }

    fn run_inner(&self) -> Result<RunReport> {
        let config = &self.config;
        if !config.input_dir.exists() {
            bail!("input directory '{}' does not exist", config.input_dir.display());
        }
        prepare_output_dir(config)?;

        let tables = discover_tables(&config.input_dir, &self.loader, config.max_tables)?;
        if tables.is_empty() {
            bail!("no table files found under {}", config.input_dir.display());
        }
        info!("Discovered {} table(s)", tables.len());
        let tables_discovered = tables.len();

        let file_split = split::split_files(tables, config.train_frac, config.split_random_seed);
        let train_tables = file_split.train.len();
        let test_tables = file_split.test.len();
        info!("File split: {} train / {} test", train_tables, test_tables);

        let budget = FailureBudget::new(config.max_failed_tables);
        let max_chars = config.max_record_chars();
        let train_stats = schedule::emit_split(
            "train",
            &file_split.train,
            &self.loader,
            &self.serializer,
            max_chars,
            &budget,
        )?;
        let test_stats = schedule::emit_split(
            "test",
            &file_split.test,
            &self.loader,
            &self.serializer,
            max_chars,
            &budget,
        )?;
        let tables_failed = train_stats.tables_failed + test_stats.tables_failed;
        let records_dropped = train_stats.records_dropped + test_stats.records_dropped;

        let partition_count = config.worker_count().saturating_mul(config.output_shard_factor);
        let train_partitions = schedule::repartition(
            train_stats.records,
            partition_count,
            derive_seed(config.split_random_seed, "train"),
        );
        let test_partitions = schedule::repartition(
            test_stats.records,
            partition_count,
            derive_seed(config.split_random_seed, "test"),
        );

        let train_paths =
            write_split_partitions(&config.output_dir, Split::Train, &train_partitions)?;
        let test_paths = write_split_partitions(&config.output_dir, Split::Test, &test_partitions)?;
        drop(train_partitions);
        drop(test_partitions);

        let outcome = pack_partitions(config, &train_paths, &test_paths)?;

        // Packing removed the partition files, leaving the split directories
        // empty.
        for split in Split::all() {
            let dir = split_dir(&config.output_dir, split);
            if dir.exists() {
                if let Err(err) = fs::remove_dir(&dir) {
                    warn!("Could not remove {}: {err}", dir.display());
                }
            }
        }

        let manifest_path = |id: StreamId| config.output_dir.join(id.manifest_name());
        write_manifest(&outcome.train_main.shards, &manifest_path(StreamId::TRAIN_MAIN))?;
        write_manifest(&outcome.train_eval.shards, &manifest_path(StreamId::TRAIN_EVAL))?;
        write_manifest(&outcome.test_main.shards, &manifest_path(StreamId::TEST_MAIN))?;

        Ok(RunReport {
            tables_discovered,
            train_tables,
            test_tables,
            tables_failed,
            records_dropped,
            train_records: outcome.train_main.records,
            train_eval_records: outcome.train_eval.records,
            test_records: outcome.test_main.records,
            train_shards: outcome.train_main.shards.len(),
            train_eval_shards: outcome.train_eval.shards.len(),
            test_shards: outcome.test_main.shards.len(),
            elapsed: Duration::default(),
        })
    }
}

/// Create the output directory, refusing to mix new outputs with leftovers
/// from a prior run unless `overwrite` clears them first.
fn prepare_output_dir(config: &PipelineConfig) -> Result<()> {
    let dir = &config.output_dir;
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir {}", dir.display()))?;

    let mut stale = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = match path.file_name().and_then(|s| s.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let is_split_dir = path.is_dir() && Split::all().iter().any(|split| split.name() == name);
        let is_output =
            name.ends_with(".tar") || name.ends_with(".tar.tmp") || name.ends_with("-files.txt");
        if is_split_dir || is_output {
            stale.push(path);
        }
    }

    if stale.is_empty() {
        return Ok(());
    }
    if !config.overwrite {
        bail!(
            "output dir {} holds {} prior output file(s) (use --overwrite)",
            dir.display(),
            stale.len()
        );
    }
    for path in stale {
        if path.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Record;
    use crate::serialize::KeyValueSerializer;
    use crate::table::JsonlTableLoader;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;
    use std::collections::HashSet;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn write_jsonl(dir: &Path, name: &str, rows: &[serde_json::Value]) {
        let mut body = String::new();
        for row in rows {
            body.push_str(&row.to_string());
            body.push('\n');
        }
        fs::write(dir.join(name), body).unwrap();
    }

    fn write_jsonl_gz(dir: &Path, name: &str, rows: &[serde_json::Value]) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for row in rows {
            encoder.write_all(row.to_string().as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        fs::write(dir.join(name), encoder.finish().unwrap()).unwrap();
    }

    fn city_rows(count: u64) -> Vec<serde_json::Value> {
        (0..count)
            .map(|i| json!({"city": format!("c{i}"), "pop": i}))
            .collect()
    }

    fn test_config(input: &Path, output: &Path) -> PipelineConfig {
        PipelineConfig {
            input_dir: input.to_path_buf(),
            output_dir: output.to_path_buf(),
            workers: Some(2),
            output_shard_factor: 1,
            ..PipelineConfig::default()
        }
    }

    fn run_pipeline(config: PipelineConfig) -> Result<RunReport> {
        Pipeline::new(config, JsonlTableLoader, KeyValueSerializer::default()).run()
    }

    fn read_manifest(output: &Path, name: &str) -> Vec<PathBuf> {
        let contents = fs::read_to_string(output.join(name)).unwrap();
        assert!(!contents.ends_with('\n'), "{name} has a trailing newline");
        contents.lines().map(PathBuf::from).collect()
    }

    fn shard_records(path: &Path) -> Vec<(String, Record)> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let key = entry.path().unwrap().display().to_string();
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            out.push((key, serde_json::from_slice(&body).unwrap()));
        }
        out
    }

    fn stream_keys(manifest: &[PathBuf]) -> HashSet<String> {
        manifest
            .iter()
            .flat_map(|shard| shard_records(shard))
            .map(|(key, _)| key)
            .collect()
    }

    #[test]
    fn end_to_end_shards_and_manifests() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_jsonl(input.path(), "alpha.jsonl", &city_rows(5));
        write_jsonl(input.path(), "beta.jsonl", &city_rows(5));
        write_jsonl_gz(input.path(), "gamma.jsonl.gz", &city_rows(5));
        write_jsonl_gz(input.path(), "delta.jsonl.gz", &city_rows(5));
        // Single-column rows leave the serializer without a target.
        write_jsonl(input.path(), "bad.jsonl", &[json!({"only": 1}), json!({"only": 2})]);

        let config = PipelineConfig {
            train_frac: 0.5,
            eval_attempt_frac: 1.0,
            eval_frac: 0.5,
            ..test_config(input.path(), output.path())
        };
        let report = run_pipeline(config).unwrap();

        assert_eq!(report.tables_discovered, 5);
        assert_eq!(report.train_tables + report.test_tables, 5);
        assert_eq!(report.tables_failed, 1);
        assert_eq!(report.records_dropped, 0);
        assert_eq!(report.train_records + report.train_eval_records + report.test_records, 20);

        let train = read_manifest(output.path(), "train-files.txt");
        let train_eval = read_manifest(output.path(), "traineval-files.txt");
        let test = read_manifest(output.path(), "test-files.txt");
        assert_eq!(train.len(), report.train_shards);
        assert_eq!(train_eval.len(), report.train_eval_shards);
        assert_eq!(test.len(), report.test_shards);
        for shard in train.iter().chain(train_eval.iter()).chain(test.iter()) {
            assert!(shard.is_absolute());
            assert!(shard.exists(), "manifest lists missing {}", shard.display());
        }

        // Every surviving record lands in exactly one stream, none from the
        // failed table.
        let train_keys = stream_keys(&train);
        let eval_keys = stream_keys(&train_eval);
        let test_keys = stream_keys(&test);
        assert!(train_keys.is_disjoint(&eval_keys));
        assert!(train_keys.is_disjoint(&test_keys));
        assert!(eval_keys.is_disjoint(&test_keys));
        let all: HashSet<String> = train_keys
            .iter()
            .chain(eval_keys.iter())
            .chain(test_keys.iter())
            .cloned()
            .collect();
        assert_eq!(all.len(), 20);
        assert!(all.iter().all(|key| !key.starts_with("bad__")));

        for shard in train.iter().chain(train_eval.iter()).chain(test.iter()) {
            for (key, record) in shard_records(shard) {
                assert!(key.ends_with(".json"));
                assert!(!record.text.is_empty());
                assert!(!record.label.is_empty());
            }
        }

        // Intermediates are gone once packing finishes.
        assert!(!output.path().join("train").exists());
        assert!(!output.path().join("test").exists());
        let stray: Vec<_> = fs::read_dir(output.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("tmp"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let input = tempdir().unwrap();
        for name in ["a.jsonl", "b.jsonl", "c.jsonl", "d.jsonl"] {
            write_jsonl(input.path(), name, &city_rows(8));
        }

        let run = |output: &Path| {
            let config = PipelineConfig {
                train_frac: 0.5,
                eval_attempt_frac: 1.0,
                eval_frac: 0.25,
                workers: Some(1),
                ..test_config(input.path(), output)
            };
            run_pipeline(config).unwrap();
            let mut streams = Vec::new();
            for name in ["train-files.txt", "traineval-files.txt", "test-files.txt"] {
                let manifest = read_manifest(output, name);
                let names: Vec<String> = manifest
                    .iter()
                    .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
                    .collect();
                streams.push((names, stream_keys(&manifest)));
            }
            streams
        };

        let first_out = tempdir().unwrap();
        let second_out = tempdir().unwrap();
        assert_eq!(run(first_out.path()), run(second_out.path()));
    }

    #[test]
    fn train_only_run_mixes_tables_into_first_shard() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_jsonl(input.path(), "a.jsonl", &city_rows(20));
        write_jsonl(input.path(), "b.jsonl", &city_rows(20));
        write_jsonl(input.path(), "c.jsonl", &city_rows(20));

        let config = PipelineConfig {
            train_frac: 1.0,
            eval_attempt_frac: 0.0,
            workers: Some(1),
            ..test_config(input.path(), output.path())
        };
        let report = run_pipeline(config).unwrap();
        assert_eq!(report.train_records, 60);
        assert_eq!(report.test_records, 0);
        assert_eq!(report.train_eval_records, 0);

        let train = read_manifest(output.path(), "train-files.txt");
        assert_eq!(train.len(), 1);
        assert!(read_manifest(output.path(), "test-files.txt").is_empty());
        assert!(read_manifest(output.path(), "traineval-files.txt").is_empty());

        let stems: Vec<String> = shard_records(&train[0])
            .iter()
            .map(|(_, record)| record.source_file.clone())
            .collect();
        let distinct: HashSet<&String> = stems.iter().collect();
        assert_eq!(distinct.len(), 3);
        // A file-grouped order would change stems exactly twice.
        let changes = stems.windows(2).filter(|w| w[0] != w[1]).count();
        assert!(changes > 2, "records are still grouped by file: {changes} changes");
    }

    #[test]
    fn budget_exhaustion_aborts_without_manifests() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_jsonl(input.path(), "good.jsonl", &city_rows(4));
        write_jsonl(input.path(), "bad.jsonl", &[json!({"only": 1})]);

        let config = PipelineConfig {
            train_frac: 1.0,
            max_failed_tables: 0,
            ..test_config(input.path(), output.path())
        };
        let err = run_pipeline(config).unwrap_err();
        assert!(err.to_string().contains("budget"), "unexpected error: {err:#}");

        for entry in fs::read_dir(output.path()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            assert!(!name.ends_with("-files.txt"), "manifest {name} written on abort");
            assert!(!name.ends_with(".tar"), "shard {name} written on abort");
        }
    }

    #[test]
    fn tiny_shard_ceiling_rolls_shards() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let rows: Vec<serde_json::Value> = (0..800)
            .map(|i| json!({"payload": "x".repeat(1200), "value": i}))
            .collect();
        write_jsonl(input.path(), "big.jsonl", &rows);

        let config = PipelineConfig {
            train_frac: 1.0,
            eval_attempt_frac: 0.0,
            target_shard_size_mb: 1,
            workers: Some(1),
            ..test_config(input.path(), output.path())
        };
        let report = run_pipeline(config).unwrap();
        assert_eq!(report.train_records, 800);
        assert!(report.train_shards >= 2, "expected rolling, got {}", report.train_shards);

        let train = read_manifest(output.path(), "train-files.txt");
        for (idx, shard) in train.iter().enumerate() {
            let name = format!("train-{idx:06}.tar");
            assert!(shard.ends_with(&name), "unexpected shard name {}", shard.display());
            assert!(fs::metadata(shard).unwrap().len() <= 1024 * 1024);
        }
    }

    #[test]
    fn refuses_existing_outputs_without_overwrite() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        write_jsonl(input.path(), "a.jsonl", &city_rows(4));

        let config = PipelineConfig {
            train_frac: 1.0,
            eval_attempt_frac: 0.0,
            ..test_config(input.path(), output.path())
        };
        run_pipeline(config.clone()).unwrap();

        let err = run_pipeline(config.clone()).unwrap_err();
        assert!(err.to_string().contains("--overwrite"), "unexpected error: {err:#}");

        let config = PipelineConfig {
            overwrite: true,
            ..config
        };
        run_pipeline(config).unwrap();
        assert_eq!(read_manifest(output.path(), "train-files.txt").len(), 1);
    }
}
