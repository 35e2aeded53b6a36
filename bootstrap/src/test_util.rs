//! Fake CMake for driving stages in tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::BootstrapConfig;

/// Write a `cmake` stand-in that echoes its arguments, and on `--build`
/// creates `bin/clang` and `bin/clang++` before exiting with `build_exit`.
pub fn fake_cmake(dir: &Path, build_exit: i32) -> PathBuf {
    let path = dir.join("fake-cmake");
    let script = format!(
        r#"#!/bin/sh
echo "cmake $*"
echo "BOOTSTRAP_MARKER=$BOOTSTRAP_MARKER"
echo "note: fake cmake" >&2
if [ "$1" = "--build" ]; then
  mkdir -p "$2/bin" && touch "$2/bin/clang" "$2/bin/clang++"
  exit {build_exit}
fi
exit 0
"#
    );
    fs::write(&path, script).expect("write fake cmake");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake cmake");
    path
}

pub fn fake_config(root: &Path, cmake: &Path) -> BootstrapConfig {
    let mut config = BootstrapConfig {
        source_dir: root.join("src"),
        build_root: root.join("build"),
        cmake: cmake.display().to_string(),
        jobs: Some(2),
        timeout_secs: 30,
        ..BootstrapConfig::default()
    };
    config
        .env
        .insert("BOOTSTRAP_MARKER".to_string(), "on".to_string());
    config
}
