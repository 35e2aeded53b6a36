//! Linear stage sequencing for `bootstrap run`.
//!
//! Each stage runs configure, build, then the expected-output check. The
//! first failing step aborts the run; every step attempted (failed or not)
//! is recorded so the summary can be written regardless.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use opskit::io::process::{ProcessLimits, run_command};

use crate::check::{OutputCheck, check_outputs, missing};
use crate::config::BootstrapConfig;
use crate::stage::{
    PlannedCommand, Stage, Step, build_command, build_dir, configure_command, log_path,
    stage2_compilers,
};

/// One attempted step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub stage: Stage,
    pub step: Step,
    /// Rendered command line; `None` for the output check.
    pub command: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub passed: bool,
    pub duration_secs: f64,
    /// Per-step log, when the step ran a command.
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputCheck>,
}

/// Run `stages` in order, appending a record per attempted step.
///
/// `records` is filled in even when this returns an error, so callers can
/// persist what happened before the failure.
#[instrument(skip_all, fields(build_root = %config.build_root.display()))]
pub fn run_stages(
    config: &BootstrapConfig,
    stages: &[Stage],
    records: &mut Vec<StepRecord>,
) -> Result<()> {
    fs::create_dir_all(&config.build_root)
        .with_context(|| format!("create {}", config.build_root.display()))?;
    for &stage in stages {
        run_stage(config, stage, records)?;
    }
    Ok(())
}

fn run_stage(config: &BootstrapConfig, stage: Stage, records: &mut Vec<StepRecord>) -> Result<()> {
    info!(%stage, "stage starting");
    if stage == Stage::Stage2 {
        let absent: Vec<String> = stage2_compilers(config)
            .into_iter()
            .filter(|(_, path)| !path.is_file())
            .map(|(_, path)| path.display().to_string())
            .collect();
        if !absent.is_empty() {
            bail!(
                "{stage} configure: stage1 compiler missing: {} (run stage 1 first)",
                absent.join(", ")
            );
        }
    }

    for planned in [configure_command(config, stage), build_command(config, stage)] {
        let record = run_step(config, &planned)?;
        let passed = record.passed;
        let exit_code = record.exit_code;
        let timed_out = record.timed_out;
        let log = record.log.clone().unwrap_or_default();
        records.push(record);
        if !passed {
            if timed_out {
                bail!("{stage} {} timed out; see {log}", planned.step);
            }
            bail!(
                "{stage} {} failed (exit code {}); see {log}",
                planned.step,
                exit_code.map_or_else(|| "none".to_string(), |code| code.to_string())
            );
        }
    }

    let started = Instant::now();
    let outputs = check_outputs(
        &build_dir(config, stage),
        &stage.config(config).expected_outputs,
    );
    let absent: Vec<String> = missing(&outputs)
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    records.push(StepRecord {
        stage,
        step: Step::Check,
        command: None,
        exit_code: None,
        timed_out: false,
        passed: absent.is_empty(),
        duration_secs: secs(started.elapsed()),
        log: None,
        outputs,
    });
    if !absent.is_empty() {
        bail!("{stage} check: missing outputs: {}", absent.join(", "));
    }
    info!(%stage, "stage complete");
    Ok(())
}

#[instrument(skip_all, fields(stage = %planned.stage, step = %planned.step))]
fn run_step(config: &BootstrapConfig, planned: &PlannedCommand) -> Result<StepRecord> {
    let log = log_path(&config.build_root, planned.stage, planned.step);
    let limits = ProcessLimits::new(
        Duration::from_secs(config.timeout_secs),
        config.output_limit_bytes,
    );
    info!(command = %planned.display(), "running");

    let started = Instant::now();
    let output = run_command(planned.to_command(&config.env), limits, Some(&log))
        .with_context(|| format!("{} {}", planned.stage, planned.step))?;
    let duration = started.elapsed();

    append_log_footer(&log, planned, &output.stderr, output.timed_out)?;

    let passed = output.success();
    if !passed {
        warn!(
            exit_code = ?output.status.code(),
            timed_out = output.timed_out,
            stderr = %output.stderr_tail(),
            "step failed"
        );
    }
    Ok(StepRecord {
        stage: planned.stage,
        step: planned.step,
        command: Some(planned.display()),
        exit_code: output.status.code(),
        timed_out: output.timed_out,
        passed,
        duration_secs: secs(duration),
        log: Some(log.display().to_string()),
        outputs: Vec::new(),
    })
}

/// The log holds streamed stdout; add the command line and stderr after it.
fn append_log_footer(
    log: &Path,
    planned: &PlannedCommand,
    stderr: &[u8],
    timed_out: bool,
) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(log)
        .with_context(|| format!("open {}", log.display()))?;
    let mut footer = format!("\n=== command ===\n{}\n=== stderr ===\n", planned.display());
    footer.push_str(&String::from_utf8_lossy(stderr));
    if timed_out {
        footer.push_str("\n[timed out]\n");
    }
    file.write_all(footer.as_bytes())
        .with_context(|| format!("write {}", log.display()))
}

fn secs(duration: Duration) -> f64 {
    duration.as_millis() as f64 / 1000.0
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_util::{fake_cmake, fake_config};

    #[test]
    fn runs_both_stages_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = fake_config(temp.path(), &fake_cmake(temp.path(), 0));
        let mut records = Vec::new();

        run_stages(&config, &Stage::ALL, &mut records).expect("run");

        let steps: Vec<(Stage, Step)> = records.iter().map(|r| (r.stage, r.step)).collect();
        assert_eq!(
            steps,
            vec![
                (Stage::Stage1, Step::Configure),
                (Stage::Stage1, Step::Build),
                (Stage::Stage1, Step::Check),
                (Stage::Stage2, Step::Configure),
                (Stage::Stage2, Step::Build),
                (Stage::Stage2, Step::Check),
            ]
        );
        assert!(records.iter().all(|r| r.passed));

        let configure_log = fs::read_to_string(log_path(
            &config.build_root,
            Stage::Stage2,
            Step::Configure,
        ))
        .expect("log");
        assert!(configure_log.contains("-DCMAKE_C_COMPILER="));
        assert!(configure_log.contains("BOOTSTRAP_MARKER=on"));
        assert!(configure_log.contains("=== stderr ==="));
    }

    #[test]
    fn build_failure_aborts_with_stage_and_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = fake_config(temp.path(), &fake_cmake(temp.path(), 7));
        let mut records = Vec::new();

        let err = run_stages(&config, &Stage::ALL, &mut records).expect_err("fails");

        let message = format!("{err:#}");
        assert!(message.contains("stage1 build failed (exit code 7)"), "{message}");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].exit_code, Some(7));
        assert!(!records[1].passed);
    }

    #[test]
    fn missing_output_fails_the_check_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = fake_config(temp.path(), &fake_cmake(temp.path(), 0));
        config.stage1.expected_outputs.push("bin/lld".into());
        let mut records = Vec::new();

        let err = run_stages(&config, &[Stage::Stage1], &mut records).expect_err("fails");

        assert!(format!("{err:#}").contains("stage1 check: missing outputs: bin/lld"));
        let check = records.last().expect("record");
        assert_eq!(check.step, Step::Check);
        assert!(!check.passed);
    }

    #[test]
    fn stage2_alone_requires_stage1_compilers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = fake_config(temp.path(), &fake_cmake(temp.path(), 0));
        let mut records = Vec::new();

        let err = run_stages(&config, &[Stage::Stage2], &mut records).expect_err("fails");

        assert!(format!("{err:#}").contains("stage1 compiler missing"));
        assert!(records.is_empty());
    }
}
