//! Artifact discovery and removal under the backup root.
//!
//! Layout: `<backup_root>/<instance>/<instance>-<stamp>.tar`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::core::naming::ArtifactPattern;
use crate::core::types::BackupArtifact;

/// Directory holding artifacts for `instance`.
pub fn instance_dir(backup_root: &Path, instance: &str) -> PathBuf {
    backup_root.join(instance)
}

/// Instance directories under `backup_root`, sorted by name.
///
/// A missing root yields an empty list. Non-directory entries and names that
/// are not valid UTF-8 are ignored.
pub fn instance_dirs(backup_root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(backup_root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", backup_root.display()));
        }
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", backup_root.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if !file_type.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            dirs.push((name, entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// List the artifacts of one instance with their modification times.
#[instrument(skip_all, fields(instance = %instance, dir = %dir.display()))]
pub fn scan_instance_dir(instance: &str, dir: &Path) -> Result<Vec<BackupArtifact>> {
    let pattern = ArtifactPattern::for_instance(instance)
        .with_context(|| format!("build artifact pattern for {instance}"))?;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", dir.display())),
    };

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !pattern.matches(&name) {
            continue;
        }
        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .with_context(|| format!("read mtime {}", path.display()))?;
        artifacts.push(BackupArtifact::new(
            name,
            path,
            DateTime::<Utc>::from(modified),
        ));
    }
    // read_dir order is platform dependent; fix it so tie-breaks are repeatable.
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(count = artifacts.len(), "scanned artifacts");
    Ok(artifacts)
}

/// Deletes obsolete artifacts.
pub trait Remover {
    fn remove(&self, artifact: &BackupArtifact) -> Result<()>;
}

/// Remover that deletes files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

impl Remover for FsRemover {
    fn remove(&self, artifact: &BackupArtifact) -> Result<()> {
        fs::remove_file(&artifact.path)
            .with_context(|| format!("remove {}", artifact.path.display()))
    }
}
