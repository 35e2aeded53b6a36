//! Bootstrap configuration (`bootstrap.toml`).
//!
//! Relative `source_dir` and `build_root` are resolved against the directory
//! holding the config file, so the driver behaves the same from any cwd.
//! Keys missing from a `[stage1]`/`[stage2]` table keep that stage's
//! built-in default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "bootstrap.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// CMake source directory (the one holding the top-level CMakeLists.txt).
    pub source_dir: PathBuf,
    /// Parent of `stage1/`, `stage2/`, `logs/` and `bootstrap.json`.
    pub build_root: PathBuf,
    /// CMake executable.
    pub cmake: String,
    /// CMake generator passed as `-G`.
    pub generator: String,
    /// Parallel build jobs; `None` leaves the choice to the generator.
    pub jobs: Option<u32>,
    /// Extra environment for every child process.
    pub env: BTreeMap<String, String>,
    /// Time limit per step in seconds.
    pub timeout_secs: u64,
    /// Bytes of stdout/stderr kept in memory per step. The log file gets all of stdout.
    pub output_limit_bytes: usize,
    #[serde(deserialize_with = "stage1_with_defaults")]
    pub stage1: StageConfig,
    #[serde(deserialize_with = "stage2_with_defaults")]
    pub stage2: StageConfig,
}

/// Settings for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    /// Extra configure arguments, e.g. `-DCMAKE_BUILD_TYPE=Release`.
    pub cache_args: Vec<String>,
    /// Build targets; empty builds the default target.
    pub targets: Vec<String>,
    /// Files that must exist under the stage build directory afterwards.
    pub expected_outputs: Vec<PathBuf>,
    /// C compiler, relative to the stage-1 build directory. Stage 2 only.
    pub c_compiler: Option<PathBuf>,
    /// C++ compiler, relative to the stage-1 build directory. Stage 2 only.
    pub cxx_compiler: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("llvm"),
            build_root: PathBuf::from("build"),
            cmake: "cmake".to_string(),
            generator: "Ninja".to_string(),
            jobs: None,
            env: BTreeMap::new(),
            timeout_secs: 4 * 60 * 60,
            output_limit_bytes: 200_000,
            stage1: StageConfig::stage1_defaults(),
            stage2: StageConfig::stage2_defaults(),
        }
    }
}

impl StageConfig {
    pub fn stage1_defaults() -> Self {
        Self {
            cache_args: vec!["-DCMAKE_BUILD_TYPE=Release".to_string()],
            targets: vec!["clang".to_string()],
            expected_outputs: vec![PathBuf::from("bin/clang"), PathBuf::from("bin/clang++")],
            c_compiler: None,
            cxx_compiler: None,
        }
    }

    pub fn stage2_defaults() -> Self {
        Self {
            cache_args: vec!["-DCMAKE_BUILD_TYPE=Release".to_string()],
            targets: vec!["clang".to_string()],
            expected_outputs: vec![PathBuf::from("bin/clang")],
            c_compiler: Some(PathBuf::from("bin/clang")),
            cxx_compiler: Some(PathBuf::from("bin/clang++")),
        }
    }
}

/// A `[stageN]` table as written; absent keys fall back to the stage default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StageTable {
    cache_args: Option<Vec<String>>,
    targets: Option<Vec<String>>,
    expected_outputs: Option<Vec<PathBuf>>,
    c_compiler: Option<PathBuf>,
    cxx_compiler: Option<PathBuf>,
}

impl StageTable {
    fn apply(self, mut base: StageConfig) -> StageConfig {
        if let Some(cache_args) = self.cache_args {
            base.cache_args = cache_args;
        }
        if let Some(targets) = self.targets {
            base.targets = targets;
        }
        if let Some(expected_outputs) = self.expected_outputs {
            base.expected_outputs = expected_outputs;
        }
        if let Some(c_compiler) = self.c_compiler {
            base.c_compiler = Some(c_compiler);
        }
        if let Some(cxx_compiler) = self.cxx_compiler {
            base.cxx_compiler = Some(cxx_compiler);
        }
        base
    }
}

fn stage1_with_defaults<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StageConfig, D::Error> {
    Ok(StageTable::deserialize(deserializer)?.apply(StageConfig::stage1_defaults()))
}

fn stage2_with_defaults<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StageConfig, D::Error> {
    Ok(StageTable::deserialize(deserializer)?.apply(StageConfig::stage2_defaults()))
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            bail!("source_dir must be set");
        }
        if self.build_root.as_os_str().is_empty() {
            bail!("build_root must be set");
        }
        if self.cmake.trim().is_empty() {
            bail!("cmake must be non-empty");
        }
        if self.generator.trim().is_empty() {
            bail!("generator must be non-empty");
        }
        if self.jobs == Some(0) {
            bail!("jobs must be > 0 when set");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be > 0");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be > 0");
        }
        if self.stage1.c_compiler.is_some() || self.stage1.cxx_compiler.is_some() {
            bail!("stage1 uses the host compiler; set c_compiler/cxx_compiler under [stage2]");
        }
        if self.stage2.c_compiler.is_none() || self.stage2.cxx_compiler.is_none() {
            bail!("stage2.c_compiler and stage2.cxx_compiler must be set");
        }
        for (stage, cfg) in [("stage1", &self.stage1), ("stage2", &self.stage2)] {
            if let Some(path) = cfg.expected_outputs.iter().find(|path| path.is_absolute()) {
                bail!(
                    "{stage}.expected_outputs must be relative to the build directory: {}",
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Make relative directories absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.source_dir.is_relative() {
            self.source_dir = base.join(&self.source_dir);
        }
        if self.build_root.is_relative() {
            self.build_root = base.join(&self.build_root);
        }
    }
}

/// Load, resolve and validate a config file. Unlike `opskit.toml` there is
/// no useful default source tree, so a missing file is an error.
pub fn load_config(path: &Path) -> Result<BootstrapConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: BootstrapConfig =
        toml::from_str(&contents).with_context(|| format!("parse config {}", path.display()))?;
    let absolute =
        std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))?;
    let base = absolute.parent().unwrap_or(Path::new("/"));
    config.resolve_paths(base);
    config
        .validate()
        .with_context(|| format!("validate config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        BootstrapConfig::default().validate().expect("valid");
    }

    #[test]
    fn partial_file_keeps_defaults_and_resolves_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"
source_dir = "src/llvm"
jobs = 8

[env]
CCACHE_DIR = "/tmp/ccache"

[stage2]
targets = ["clang", "lld"]
"#,
        )
        .expect("write");

        let config = load_config(&path).expect("load");

        assert_eq!(config.source_dir, temp.path().join("src/llvm"));
        assert_eq!(config.build_root, temp.path().join("build"));
        assert_eq!(config.jobs, Some(8));
        assert_eq!(config.env["CCACHE_DIR"], "/tmp/ccache");
        assert_eq!(config.stage2.targets, vec!["clang", "lld"]);
        assert_eq!(config.stage2.expected_outputs, vec![PathBuf::from("bin/clang")]);
        assert_eq!(config.stage2.c_compiler, Some(PathBuf::from("bin/clang")));
        assert_eq!(config.stage2.cxx_compiler, Some(PathBuf::from("bin/clang++")));
        assert_eq!(config.stage1, StageConfig::stage1_defaults());
    }

    #[test]
    fn stage_table_overrides_only_given_keys() {
        let config: BootstrapConfig = toml::from_str(
            r#"
[stage1]
expected_outputs = []

[stage2]
cxx_compiler = "bin/clang-19++"
"#,
        )
        .expect("parse");

        assert!(config.stage1.expected_outputs.is_empty());
        assert_eq!(config.stage1.targets, vec!["clang"]);
        assert_eq!(config.stage2.c_compiler, Some(PathBuf::from("bin/clang")));
        assert_eq!(config.stage2.cxx_compiler, Some(PathBuf::from("bin/clang-19++")));
        config.validate().expect("valid");
    }

    #[test]
    fn unknown_stage_key_is_rejected() {
        let parsed: Result<BootstrapConfig, _> = toml::from_str("[stage2]\ntarget = [\"clang\"]\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn absolute_paths_are_left_alone() {
        let mut config = BootstrapConfig {
            build_root: PathBuf::from("/scratch/build"),
            ..BootstrapConfig::default()
        };
        config.resolve_paths(Path::new("/home/me"));
        assert_eq!(config.build_root, PathBuf::from("/scratch/build"));
        assert_eq!(config.source_dir, PathBuf::from("/home/me/llvm"));
    }

    #[test]
    fn rejects_invalid_settings() {
        let zero_jobs = BootstrapConfig {
            jobs: Some(0),
            ..BootstrapConfig::default()
        };
        assert!(zero_jobs.validate().is_err());

        let mut no_compiler = BootstrapConfig::default();
        no_compiler.stage2.cxx_compiler = None;
        assert!(no_compiler.validate().is_err());

        let mut absolute_output = BootstrapConfig::default();
        absolute_output.stage1.expected_outputs = vec![PathBuf::from("/usr/bin/clang")];
        let err = absolute_output.validate().expect_err("absolute");
        assert!(err.to_string().contains("stage1.expected_outputs"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_config(&temp.path().join("missing.toml")).is_err());
    }
}
