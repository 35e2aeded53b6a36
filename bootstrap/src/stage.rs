//! Stage and step model plus CMake command construction.
//!
//! Everything here is pure: commands are described as [`PlannedCommand`]s so
//! `bootstrap plan` can print exactly what `bootstrap run` would execute.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::config::{BootstrapConfig, StageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Stage1,
    Stage2,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Stage1, Stage::Stage2];

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Stage::Stage1),
            2 => Some(Stage::Stage2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Stage1 => "stage1",
            Stage::Stage2 => "stage2",
        }
    }

    pub fn config(self, config: &BootstrapConfig) -> &StageConfig {
        match self {
            Stage::Stage1 => &config.stage1,
            Stage::Stage2 => &config.stage2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Configure,
    Build,
    Check,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Step::Configure => "configure",
            Step::Build => "build",
            Step::Check => "check",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command the driver will run for one stage step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub stage: Stage,
    pub step: Step,
    pub program: String,
    pub args: Vec<String>,
}

impl PlannedCommand {
    pub fn to_command(&self, env: &BTreeMap<String, String>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(env);
        cmd
    }

    /// Shell-like rendering for logs and `plan` output. Quoting is cosmetic.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn build_dir(config: &BootstrapConfig, stage: Stage) -> PathBuf {
    config.build_root.join(stage.name())
}

pub fn logs_dir(build_root: &Path) -> PathBuf {
    build_root.join("logs")
}

/// `<build_root>/logs/<stage>.<step>.log`
pub fn log_path(build_root: &Path, stage: Stage, step: Step) -> PathBuf {
    logs_dir(build_root).join(format!("{}.{}.log", stage.name(), step.name()))
}

/// Compiler paths for stage 2, resolved against the stage-1 build directory.
pub fn stage2_compilers(config: &BootstrapConfig) -> Vec<(&'static str, PathBuf)> {
    let stage1_dir = build_dir(config, Stage::Stage1);
    [
        ("CMAKE_C_COMPILER", config.stage2.c_compiler.as_ref()),
        ("CMAKE_CXX_COMPILER", config.stage2.cxx_compiler.as_ref()),
    ]
    .into_iter()
    .filter_map(|(var, path)| path.map(|path| (var, stage1_dir.join(path))))
    .collect()
}

/// `cmake -G <generator> -S <source> -B <build_dir> <cache_args...>`, with
/// stage 2 pointed at the stage-1 compilers.
pub fn configure_command(config: &BootstrapConfig, stage: Stage) -> PlannedCommand {
    let mut args = vec![
        "-G".to_string(),
        config.generator.clone(),
        "-S".to_string(),
        config.source_dir.display().to_string(),
        "-B".to_string(),
        build_dir(config, stage).display().to_string(),
    ];
    args.extend(stage.config(config).cache_args.iter().cloned());
    if stage == Stage::Stage2 {
        for (var, path) in stage2_compilers(config) {
            args.push(format!("-D{var}={}", path.display()));
        }
    }
    PlannedCommand {
        stage,
        step: Step::Configure,
        program: config.cmake.clone(),
        args,
    }
}

/// `cmake --build <build_dir> [--target <t>...] [-j <jobs>]`
pub fn build_command(config: &BootstrapConfig, stage: Stage) -> PlannedCommand {
    let mut args = vec![
        "--build".to_string(),
        build_dir(config, stage).display().to_string(),
    ];
    let targets = &stage.config(config).targets;
    if !targets.is_empty() {
        args.push("--target".to_string());
        args.extend(targets.iter().cloned());
    }
    if let Some(jobs) = config.jobs {
        args.push("-j".to_string());
        args.push(jobs.to_string());
    }
    PlannedCommand {
        stage,
        step: Step::Build,
        program: config.cmake.clone(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BootstrapConfig {
        BootstrapConfig {
            source_dir: PathBuf::from("/src/llvm"),
            build_root: PathBuf::from("/out"),
            jobs: Some(16),
            ..BootstrapConfig::default()
        }
    }

    #[test]
    fn stage1_configure_uses_host_compiler() {
        let cmd = configure_command(&config(), Stage::Stage1);
        assert_eq!(cmd.program, "cmake");
        assert_eq!(
            cmd.args,
            vec![
                "-G",
                "Ninja",
                "-S",
                "/src/llvm",
                "-B",
                "/out/stage1",
                "-DCMAKE_BUILD_TYPE=Release"
            ]
        );
    }

    #[test]
    fn stage2_configure_points_at_stage1_outputs() {
        let cmd = configure_command(&config(), Stage::Stage2);
        assert!(cmd.args.contains(&"/out/stage2".to_string()));
        assert!(
            cmd.args
                .contains(&"-DCMAKE_C_COMPILER=/out/stage1/bin/clang".to_string())
        );
        assert!(
            cmd.args
                .contains(&"-DCMAKE_CXX_COMPILER=/out/stage1/bin/clang++".to_string())
        );
    }

    #[test]
    fn build_command_lists_targets_and_jobs() {
        let mut cfg = config();
        cfg.stage1.targets = vec!["clang".to_string(), "lld".to_string()];
        let cmd = build_command(&cfg, Stage::Stage1);
        assert_eq!(
            cmd.args,
            vec!["--build", "/out/stage1", "--target", "clang", "lld", "-j", "16"]
        );

        cfg.stage1.targets.clear();
        cfg.jobs = None;
        assert_eq!(
            build_command(&cfg, Stage::Stage1).args,
            vec!["--build", "/out/stage1"]
        );
    }

    #[test]
    fn log_paths_name_stage_and_step() {
        assert_eq!(
            log_path(Path::new("/out"), Stage::Stage2, Step::Build),
            PathBuf::from("/out/logs/stage2.build.log")
        );
    }

    #[test]
    fn display_quotes_whitespace() {
        let cmd = PlannedCommand {
            stage: Stage::Stage1,
            step: Step::Configure,
            program: "cmake".to_string(),
            args: vec!["-G".to_string(), "Unix Makefiles".to_string()],
        };
        assert_eq!(cmd.display(), "cmake -G 'Unix Makefiles'");
    }

    #[test]
    fn stage_numbers() {
        assert_eq!(Stage::from_number(1), Some(Stage::Stage1));
        assert_eq!(Stage::from_number(2), Some(Stage::Stage2));
        assert_eq!(Stage::from_number(3), None);
    }
}
