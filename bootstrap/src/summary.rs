//! Run summary persisted to `<build_root>/bootstrap.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::run::StepRecord;
use crate::stage::Stage;

pub const SUMMARY_FILE: &str = "bootstrap.json";

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapSummary {
    pub config_path: String,
    /// SHA-256 of the config file, for telling runs apart.
    pub config_hash: String,
    pub stages: Vec<Stage>,
    pub success: bool,
    /// Failure message of the aborting step.
    pub error: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub steps: Vec<StepRecord>,
}

/// Input for [`write_summary`].
#[derive(Debug)]
pub struct SummaryInput<'a> {
    pub config_path: &'a Path,
    pub stages: &'a [Stage],
    pub steps: Vec<StepRecord>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub fn summary_path(build_root: &Path) -> PathBuf {
    build_root.join(SUMMARY_FILE)
}

/// Write the summary. A config file that cannot be hashed leaves the hash
/// empty rather than losing the summary.
#[instrument(skip_all, fields(build_root = %build_root.display()))]
pub fn write_summary(build_root: &Path, input: SummaryInput<'_>) -> Result<PathBuf> {
    let config_hash = match file_sha256(input.config_path) {
        Ok(hash) => hash,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "config hash unavailable");
            String::new()
        }
    };
    let duration = input.finished_at - input.started_at;
    let summary = BootstrapSummary {
        config_path: input.config_path.display().to_string(),
        config_hash,
        stages: input.stages.to_vec(),
        success: input.error.is_none(),
        error: input.error,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        steps: input.steps,
    };

    fs::create_dir_all(build_root).with_context(|| format!("create {}", build_root.display()))?;
    let path = summary_path(build_root);
    let contents = serde_json::to_string_pretty(&summary).context("serialize summary")?;
    fs::write(&path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), "summary written");
    Ok(path)
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(contents)))
}
