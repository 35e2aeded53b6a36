//! CLI tests for `opskit prune` and `opskit plan`.
//!
//! Spawns the opskit binary against a temporary backup root and verifies
//! exit codes and on-disk effects.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{TimeDelta, Utc};
use opskit::exit_codes;
use opskit::io::config::{OpskitConfig, write_config};
use opskit::test_support::touch_artifact;

fn setup(root: &Path) -> (PathBuf, Vec<PathBuf>) {
    let config_path = root.join("opskit.toml");
    let backup_root = root.join("backups");
    write_config(
        &config_path,
        &OpskitConfig {
            backup_root: backup_root.clone(),
            ..OpskitConfig::default()
        },
    )
    .expect("write config");

    let now = Utc::now();
    let dir = backup_root.join("Ubuntu");
    let artifacts = [1, 2, 4, 6, 10]
        .iter()
        .map(|days| touch_artifact(&dir, "Ubuntu", now - TimeDelta::days(*days)).expect("touch"))
        .collect();
    (config_path, artifacts)
}

fn opskit(config: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_opskit"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run opskit")
}

#[test]
fn prune_deletes_obsolete_artifacts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (config, artifacts) = setup(temp.path());

    let output = opskit(&config, &["prune"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(artifacts[..3].iter().all(|path| path.exists()));
    assert!(artifacts[3..].iter().all(|path| !path.exists()));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("prune: instance=Ubuntu kept=3 deleted=2 failed=0"));
}

#[test]
fn prune_dry_run_keeps_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (config, artifacts) = setup(temp.path());

    let output = opskit(&config, &["prune", "--dry-run", "--keep-count", "0"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(artifacts.iter().all(|path| path.exists()));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("would_delete=2"));
}

#[test]
fn negative_override_is_rejected_without_deleting() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (config, artifacts) = setup(temp.path());

    let output = opskit(&config, &["prune", "--keep-age-days", "-1"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(artifacts.iter().all(|path| path.exists()));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("keep_age_days"));
}

#[test]
fn plan_prints_json_classification() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (config, artifacts) = setup(temp.path());

    let output = opskit(&config, &["plan", "--keep-count", "1", "--keep-age-days", "0"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let group = &plan["groups"][0];
    assert_eq!(group["instance"], "Ubuntu");
    assert_eq!(group["kept"].as_array().map(Vec::len), Some(1));
    assert_eq!(group["obsolete"].as_array().map(Vec::len), Some(4));
    assert!(artifacts.iter().all(|path| path.exists()));
}

#[test]
fn repeat_reports_failure_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("opskit.toml");

    let ok = opskit(&config, &["repeat", "-n", "2", "--", "true"]);
    assert_eq!(ok.status.code(), Some(exit_codes::OK));

    let failed = opskit(&config, &["repeat", "-n", "3", "--", "exit", "4"]);
    assert_eq!(failed.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&failed.stdout);
    assert!(stdout.contains("repeat: run=1 passed=0 failed=1"));
}
