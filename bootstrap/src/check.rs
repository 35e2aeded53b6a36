//! Expected-output checks run after each stage build.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputCheck {
    /// Path as configured, relative to the stage build directory.
    pub path: PathBuf,
    pub present: bool,
}

/// Check each of `expected` under `build_dir`. A path counts as present only
/// if it is a regular file.
#[instrument(skip_all, fields(build_dir = %build_dir.display(), expected = expected.len()))]
pub fn check_outputs(build_dir: &Path, expected: &[PathBuf]) -> Vec<OutputCheck> {
    expected
        .iter()
        .map(|path| {
            let present = build_dir.join(path).is_file();
            debug!(path = %path.display(), present, "output check");
            OutputCheck {
                path: path.clone(),
                present,
            }
        })
        .collect()
}

pub fn missing(checks: &[OutputCheck]) -> Vec<&Path> {
    checks
        .iter()
        .filter(|check| !check.present)
        .map(|check| check.path.as_path())
        .collect()
}
