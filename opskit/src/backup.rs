//! Orchestration for `opskit backup`: export every instance, then prune.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::instances::filter_excluded;
use crate::core::naming::artifact_file_name;
use crate::io::config::OpskitConfig;
use crate::io::store::{Remover, instance_dir};
use crate::io::virt::Virtualizer;
use crate::prune::{PruneReport, prune_root};

const PARTIAL_SUFFIX: &str = "partial";

/// Flags for a backup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Report what would happen without exporting or deleting.
    pub dry_run: bool,
    /// Export only; leave old artifacts in place.
    pub skip_prune: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportStatus {
    Exported,
    Planned,
    Failed { error: String },
}

/// Export result for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub instance: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: ExportStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub excluded: Vec<String>,
    pub exports: Vec<ExportReport>,
    pub prune: Option<PruneReport>,
}

impl BackupReport {
    pub fn has_failures(&self) -> bool {
        self.exports
            .iter()
            .any(|export| matches!(export.status, ExportStatus::Failed { .. }))
            || self.prune.as_ref().is_some_and(PruneReport::has_failures)
    }
}

/// Export each non-excluded instance to `<backup_root>/<instance>/` and then
/// apply the retention policy.
///
/// Listing instances and validating config are the only fatal steps. A failed
/// export is recorded and the pass continues with the next instance.
#[instrument(skip_all, fields(root = %config.backup_root.display(), dry_run = options.dry_run))]
pub fn run_backup<V: Virtualizer, R: Remover>(
    config: &OpskitConfig,
    virtualizer: &V,
    remover: &R,
    now: DateTime<Utc>,
    options: BackupOptions,
) -> Result<BackupReport> {
    config.validate()?;
    let listed = virtualizer
        .list_instances()
        .context("list instances")?;
    let targets = filter_excluded(listed.clone(), &config.excluded_instances);
    let excluded: Vec<String> = listed
        .into_iter()
        .filter(|name| !targets.contains(name))
        .collect();
    info!(
        targets = targets.len(),
        excluded = excluded.len(),
        "instances resolved"
    );

    let exports = targets
        .iter()
        .map(|instance| export_instance(config, virtualizer, instance, now, options.dry_run))
        .collect();

    let prune = if options.skip_prune {
        None
    } else {
        Some(prune_root(
            &config.backup_root,
            &config.retention,
            now,
            remover,
            options.dry_run,
        )?)
    };

    Ok(BackupReport {
        excluded,
        exports,
        prune,
    })
}

#[instrument(skip_all, fields(instance = %instance))]
fn export_instance<V: Virtualizer>(
    config: &OpskitConfig,
    virtualizer: &V,
    instance: &str,
    now: DateTime<Utc>,
    dry_run: bool,
) -> ExportReport {
    let dir = instance_dir(&config.backup_root, instance);
    let path = dir.join(artifact_file_name(instance, now));
    let status = if dry_run {
        ExportStatus::Planned
    } else {
        match export_to(virtualizer, instance, &dir, &path) {
            Ok(()) => {
                info!(path = %path.display(), "export complete");
                ExportStatus::Exported
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "export failed");
                ExportStatus::Failed {
                    error: format!("{err:#}"),
                }
            }
        }
    };
    ExportReport {
        instance: instance.to_string(),
        path,
        status,
    }
}

/// Export into a `.partial` file and rename on success, so an interrupted
/// export never looks like a finished artifact. An existing artifact with the
/// same name (two passes within one second) is never replaced.
fn export_to<V: Virtualizer>(
    virtualizer: &V,
    instance: &str,
    dir: &Path,
    dest: &Path,
) -> Result<()> {
    if instance.contains(['/', '\\']) || instance == ".." || instance == "." {
        bail!("refusing unsafe instance name {instance:?}");
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    if dest.exists() {
        bail!("artifact {} already exists", dest.display());
    }
    let partial = partial_path(dest);
    if let Err(err) = virtualizer.export(instance, &partial) {
        if partial.exists()
            && let Err(cleanup) = fs::remove_file(&partial)
        {
            warn!(path = %partial.display(), err = %cleanup, "failed to remove partial export");
        }
        return Err(err);
    }
    if dest.exists() {
        if let Err(cleanup) = fs::remove_file(&partial) {
            warn!(path = %partial.display(), err = %cleanup, "failed to remove partial export");
        }
        bail!("artifact {} appeared during export", dest.display());
    }
    fs::rename(&partial, dest)
        .with_context(|| format!("rename {} to {}", partial.display(), dest.display()))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
