//! Plain-text manifests listing the sealed shards of one stream.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

/// Write one manifest: absolute shard paths, one per line, no trailing
/// newline after the last. An empty shard list still writes the file so
/// consumers can tell "no shards" from "run never finished".
pub fn write_manifest(shards: &[PathBuf], manifest_path: &Path) -> Result<()> {
    let mut lines = Vec::with_capacity(shards.len());
    for shard in shards {
        let absolute = std::path::absolute(shard)
            .with_context(|| format!("failed to absolutize {}", shard.display()))?;
        lines.push(absolute.display().to_string());
    }
    let mut file = File::create(manifest_path)
        .with_context(|| format!("failed to create {}", manifest_path.display()))?;
    file.write_all(lines.join("\n").as_bytes())
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    info!(
        "Wrote {} with {} shard(s)",
        manifest_path.display(),
        shards.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn lists_absolute_paths_without_trailing_newline() {
        let dir = tempdir().unwrap();
        let shards = vec![
            dir.path().join("train-000000.tar"),
            dir.path().join("train-000001.tar"),
        ];
        let manifest = dir.path().join("train-files.txt");
        write_manifest(&shards, &manifest).unwrap();

        let contents = fs::read_to_string(&manifest).unwrap();
        assert!(!contents.ends_with('\n'));
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for (line, shard) in lines.iter().zip(&shards) {
            assert!(Path::new(line).is_absolute());
            assert!(line.ends_with(shard.file_name().unwrap().to_str().unwrap()));
        }
    }

    #[test]
    fn empty_stream_writes_an_empty_file() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("traineval-files.txt");
        write_manifest(&[], &manifest).unwrap();
        assert_eq!(fs::read_to_string(&manifest).unwrap(), "");
    }
}
