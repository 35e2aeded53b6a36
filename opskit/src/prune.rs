//! Retention pass over every instance directory under the backup root.
//!
//! Classification is delegated to [`crate::core::retention::select`]; this
//! module turns the obsolete set into deletions. Per-item failures (an
//! unreadable directory, a file that cannot be removed) are recorded and the
//! pass moves on.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::retention::{RetentionPolicy, select};
use crate::io::store::{Remover, instance_dirs, scan_instance_dir};

/// A deletion that did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of the retention pass for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub instance: String,
    /// Artifacts retained by either policy, newest first.
    pub kept: Vec<PathBuf>,
    /// Artifacts classified obsolete, newest first.
    pub obsolete: Vec<PathBuf>,
    /// Obsolete artifacts actually removed.
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<DeleteFailure>,
    /// Set when the group could not be scanned at all.
    pub error: Option<String>,
}

impl GroupReport {
    fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            ..Self::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        self.error.is_some() || !self.failed.is_empty()
    }
}

/// Outcome of a full retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    pub groups: Vec<GroupReport>,
}

impl PruneReport {
    pub fn has_failures(&self) -> bool {
        self.groups.iter().any(GroupReport::has_failures)
    }

    pub fn deleted_count(&self) -> usize {
        self.groups.iter().map(|group| group.deleted.len()).sum()
    }
}

/// Apply `policy` to every instance directory under `backup_root`.
///
/// An invalid policy fails before any directory is touched. With `dry_run`
/// the report lists what would be removed and nothing is deleted.
#[instrument(skip_all, fields(root = %backup_root.display(), dry_run = dry_run))]
pub fn prune_root<R: Remover>(
    backup_root: &Path,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    remover: &R,
    dry_run: bool,
) -> Result<PruneReport> {
    policy.validate()?;
    let groups = instance_dirs(backup_root)?
        .into_iter()
        .map(|(instance, dir)| prune_group(&instance, &dir, policy, now, remover, dry_run))
        .collect();
    Ok(PruneReport { dry_run, groups })
}

/// Apply `policy` to a single instance directory. Never fails; problems are
/// recorded in the returned report.
#[instrument(skip_all, fields(instance = %instance))]
pub fn prune_group<R: Remover>(
    instance: &str,
    dir: &Path,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    remover: &R,
    dry_run: bool,
) -> GroupReport {
    let mut report = GroupReport::new(instance);

    let artifacts = match scan_instance_dir(instance, dir) {
        Ok(artifacts) => artifacts,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to scan instance directory");
            report.error = Some(format!("{err:#}"));
            return report;
        }
    };
    let selection = match select(&artifacts, now, policy) {
        Ok(selection) => selection,
        Err(err) => {
            report.error = Some(err.to_string());
            return report;
        }
    };

    report.kept = selection.keep.iter().map(|a| a.path.clone()).collect();
    report.obsolete = selection.obsolete.iter().map(|a| a.path.clone()).collect();
    if dry_run {
        return report;
    }

    for artifact in &selection.obsolete {
        match remover.remove(artifact) {
            Ok(()) => {
                info!(path = %artifact.path.display(), "deleted obsolete artifact");
                report.deleted.push(artifact.path.clone());
            }
            Err(err) => {
                warn!(path = %artifact.path.display(), err = %format!("{err:#}"), "failed to delete artifact");
                report.failed.push(DeleteFailure {
                    path: artifact.path.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }
    report
}
