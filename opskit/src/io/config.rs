//! Backup configuration stored in `opskit.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retention::RetentionPolicy;
use crate::io::process::ProcessLimits;

pub const DEFAULT_CONFIG_FILE: &str = "opskit.toml";
pub const INSTANCE_PLACEHOLDER: &str = "{instance}";
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Backup configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpskitConfig {
    /// Directory holding one subdirectory of artifacts per instance.
    pub backup_root: PathBuf,

    /// Instances that are never exported (matched case-insensitively).
    pub excluded_instances: Vec<String>,

    pub retention: RetentionPolicy,

    pub virt: VirtConfig,
}

/// How to drive the virtualization CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VirtConfig {
    /// Executable, e.g. `wsl.exe`.
    pub program: String,

    /// Arguments that print one instance name per line.
    pub list_args: Vec<String>,

    /// Arguments for an export; `{instance}` and `{path}` are substituted.
    pub export_args: Vec<String>,

    /// Per-invocation wall-clock budget in seconds.
    pub timeout_secs: u64,

    /// Keep at most this many bytes of CLI stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for VirtConfig {
    fn default() -> Self {
        Self {
            program: "wsl.exe".to_string(),
            list_args: vec!["--list".to_string(), "--quiet".to_string()],
            export_args: vec![
                "--export".to_string(),
                INSTANCE_PLACEHOLDER.to_string(),
                PATH_PLACEHOLDER.to_string(),
            ],
            timeout_secs: 60 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl VirtConfig {
    pub fn limits(&self) -> ProcessLimits {
        ProcessLimits::new(
            Duration::from_secs(self.timeout_secs),
            self.output_limit_bytes,
        )
    }

    /// Export arguments with placeholders filled in.
    pub fn render_export_args(&self, instance: &str, path: &Path) -> Vec<String> {
        let path = path.display().to_string();
        self.export_args
            .iter()
            .map(|arg| {
                arg.replace(INSTANCE_PLACEHOLDER, instance)
                    .replace(PATH_PLACEHOLDER, &path)
            })
            .collect()
    }
}

impl Default for OpskitConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("backups"),
            excluded_instances: vec![
                "docker-desktop".to_string(),
                "docker-desktop-data".to_string(),
            ],
            retention: RetentionPolicy::default(),
            virt: VirtConfig::default(),
        }
    }
}

impl OpskitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backup_root.as_os_str().is_empty() {
            return Err(anyhow!("backup_root must be non-empty"));
        }
        if self.virt.program.trim().is_empty() {
            return Err(anyhow!("virt.program must be non-empty"));
        }
        for placeholder in [INSTANCE_PLACEHOLDER, PATH_PLACEHOLDER] {
            if !self.virt.export_args.iter().any(|arg| arg.contains(placeholder)) {
                return Err(anyhow!("virt.export_args must contain {placeholder}"));
            }
        }
        if self.virt.timeout_secs == 0 {
            return Err(anyhow!("virt.timeout_secs must be > 0"));
        }
        if self.virt.output_limit_bytes == 0 {
            return Err(anyhow!("virt.output_limit_bytes must be > 0"));
        }
        self.retention.validate()?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OpskitConfig::default()`.
pub fn load_config(path: &Path) -> Result<OpskitConfig> {
    if !path.exists() {
        let cfg = OpskitConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OpskitConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OpskitConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retention::RetentionError;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OpskitConfig::default());
        assert_eq!(cfg.retention.keep_count, 3);
        assert_eq!(cfg.retention.keep_age_days, 5.0);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("opskit.toml");
        let cfg = OpskitConfig {
            excluded_instances: vec!["scratch".to_string()],
            ..OpskitConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_and_accepts_integer_days() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("opskit.toml");
        fs::write(&path, "backup_root = \"/srv/wsl\"\n[retention]\nkeep_age_days = 7\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.backup_root, PathBuf::from("/srv/wsl"));
        assert_eq!(cfg.retention.keep_age_days, 7.0);
        assert_eq!(cfg.retention.keep_count, 3);
        assert_eq!(cfg.virt, VirtConfig::default());
    }

    #[test]
    fn negative_retention_fails_load_without_clamping() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("opskit.toml");
        fs::write(&path, "[retention]\nkeep_count = -2\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(
            err.chain()
                .any(|cause| cause.downcast_ref::<RetentionError>().is_some())
        );
    }

    #[test]
    fn export_args_need_both_placeholders() {
        let mut cfg = OpskitConfig::default();
        cfg.virt.export_args = vec!["--export".to_string(), "{instance}".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn export_args_are_rendered() {
        let virt = VirtConfig::default();
        let args = virt.render_export_args("Ubuntu", Path::new("/b/Ubuntu/x.tar"));
        assert_eq!(args, vec!["--export", "Ubuntu", "/b/Ubuntu/x.tar"]);
    }
}
