//! Retention selection for one instance group.
//!
//! Two independent policies are evaluated over the same artifact set and their
//! results unioned: an artifact survives if it is among the newest
//! `keep_count`, or if it is younger than `keep_age_days`. Deletion requires
//! failing both.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::BackupArtifact;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Retention knobs. Both must be non-negative.
///
/// Stored signed so that a negative value in a config file or on the command
/// line surfaces as [`RetentionError::InvalidConfiguration`] instead of being
/// silently clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Always keep this many of the newest artifacts.
    pub keep_count: i64,
    /// Always keep artifacts modified within this many days of `now`.
    pub keep_age_days: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_count: 3,
            keep_age_days: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetentionError {
    #[error("invalid retention configuration: {field} must be a non-negative number, got {value}")]
    InvalidConfiguration { field: &'static str, value: String },
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<(), RetentionError> {
        if self.keep_count < 0 {
            return Err(RetentionError::InvalidConfiguration {
                field: "keep_count",
                value: self.keep_count.to_string(),
            });
        }
        if !self.keep_age_days.is_finite() || self.keep_age_days < 0.0 {
            return Err(RetentionError::InvalidConfiguration {
                field: "keep_age_days",
                value: self.keep_age_days.to_string(),
            });
        }
        Ok(())
    }

    /// Oldest timestamp still covered by the age policy.
    ///
    /// Returns `None` when the window reaches past the representable range,
    /// in which case every artifact is within it.
    fn age_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let millis = (self.keep_age_days * MILLIS_PER_DAY).round();
        let window = TimeDelta::try_milliseconds(millis as i64)?;
        now.checked_sub_signed(window)
    }
}

/// Partition of one instance group. Both lists are ordered newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub keep: Vec<BackupArtifact>,
    pub obsolete: Vec<BackupArtifact>,
}

/// Classify `artifacts` into artifacts to keep and artifacts to delete.
///
/// The policy is validated before anything else; an invalid policy yields no
/// partial result. Ties in `last_modified` keep their input order (stable
/// sort), so repeated calls over the same input agree.
pub fn select(
    artifacts: &[BackupArtifact],
    now: DateTime<Utc>,
    policy: &RetentionPolicy,
) -> Result<Selection, RetentionError> {
    policy.validate()?;
    if artifacts.is_empty() {
        return Ok(Selection::default());
    }

    let mut newest_first = artifacts.to_vec();
    newest_first.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let by_count = kept_by_count(&newest_first, policy.keep_count);
    let by_age = kept_by_age(&newest_first, policy.age_cutoff(now));
    let keep_paths: BTreeSet<&Path> = by_count.union(&by_age).copied().collect();

    let (keep, obsolete): (Vec<_>, Vec<_>) = newest_first
        .iter()
        .cloned()
        .partition(|artifact| keep_paths.contains(artifact.path.as_path()));
    Ok(Selection { keep, obsolete })
}

fn kept_by_count(newest_first: &[BackupArtifact], keep_count: i64) -> BTreeSet<&Path> {
    let take = usize::try_from(keep_count).unwrap_or(usize::MAX);
    newest_first
        .iter()
        .take(take)
        .map(|artifact| artifact.path.as_path())
        .collect()
}

fn kept_by_age(
    newest_first: &[BackupArtifact],
    cutoff: Option<DateTime<Utc>>,
) -> BTreeSet<&Path> {
    newest_first
        .iter()
        .filter(|artifact| cutoff.is_none_or(|cutoff| artifact.last_modified >= cutoff))
        .map(|artifact| artifact.path.as_path())
        .collect()
}
