//! Shared deterministic types for the retention core.
//!
//! These types carry no I/O handles. Producers in `io` fill them from the
//! filesystem; `core` only reads them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One completed backup file for one instance.
///
/// Artifacts are immutable once written: `last_modified` never changes for a
/// given `path`. Identity within an instance group is `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    /// File name, derived from the instance name and export timestamp.
    pub name: String,
    /// Location of the file; unique within the group.
    pub path: PathBuf,
    /// Write time reported by the filesystem.
    pub last_modified: DateTime<Utc>,
}

impl BackupArtifact {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            last_modified,
        }
    }
}
