//! Backup artifact file naming.
//!
//! Artifacts are named `<instance>-<YYYYMMDD-HHMMSS>.tar` with a UTC stamp.
//! Only files matching this shape take part in retention, so partial exports
//! and unrelated files in an instance directory are left alone.

use chrono::{DateTime, Utc};
use regex::Regex;

pub const ARTIFACT_EXTENSION: &str = "tar";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// File name for an export of `instance` taken at `at`.
pub fn artifact_file_name(instance: &str, at: DateTime<Utc>) -> String {
    format!(
        "{instance}-{}.{ARTIFACT_EXTENSION}",
        at.format(STAMP_FORMAT)
    )
}

/// Matcher for artifact names of a single instance.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    regex: Regex,
}

impl ArtifactPattern {
    pub fn for_instance(instance: &str) -> Result<Self, regex::Error> {
        let pattern = format!(
            r"^{}-\d{{8}}-\d{{6}}\.{ARTIFACT_EXTENSION}$",
            regex::escape(instance)
        );
        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }
}
