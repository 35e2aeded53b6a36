//! Command repetition for `opskit repeat`.
//!
//! Runs the same shell command a fixed number of times, judging each
//! iteration by exit status. Useful for shaking out flaky tests.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{ProcessLimits, run_command};

/// Settings for a repeat run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatConfig {
    /// Number of iterations to run (at least 1).
    pub count: u32,
    /// Keep running after a failed iteration.
    pub keep_going: bool,
}

/// Result of a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationResult {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl IterationResult {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Reason why `run_repeat` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatStop {
    /// Every requested iteration ran.
    Completed,
    /// An iteration failed and `keep_going` was off.
    FailedAt {
        iter: u32,
        exit_code: Option<i32>,
        timed_out: bool,
    },
}

/// Summary of a repeat invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatOutcome {
    pub iterations_run: u32,
    pub passed: u32,
    pub failed: u32,
    /// First failing iteration, if any.
    pub first_failure: Option<u32>,
    pub stop: RepeatStop,
}

impl RepeatOutcome {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs one iteration of the command under test.
pub trait IterationRunner {
    fn run_iteration(&self, iter: u32) -> Result<IterationResult>;
}

/// Runs `<shell> -c <script>` per iteration.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    pub shell: String,
    pub script: String,
    pub limits: ProcessLimits,
    /// When set, each iteration's output goes to `<log_dir>/iter-<n>.log`.
    pub log_dir: Option<PathBuf>,
}

impl ShellRunner {
    fn log_path(&self, iter: u32) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("iter-{iter}.log")))
    }
}

impl IterationRunner for ShellRunner {
    #[instrument(skip_all, fields(iter = iter))]
    fn run_iteration(&self, iter: u32) -> Result<IterationResult> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.script);
        let log_path = self.log_path(iter);

        let started = Instant::now();
        let output = run_command(cmd, self.limits, log_path.as_deref())?;
        let duration = started.elapsed();

        if let Some(path) = &log_path {
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .with_context(|| format!("open {}", path.display()))?;
            let mut tail = String::from("\n=== stderr ===\n");
            tail.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.timed_out {
                tail.push_str("\n[timed out]\n");
            }
            file.write_all(tail.as_bytes())
                .with_context(|| format!("write {}", path.display()))?;
        }

        Ok(IterationResult {
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            duration,
        })
    }
}

/// Run `config.count` iterations, stopping at the first failure unless
/// `config.keep_going` is set. `on_iteration` sees each result as it lands.
///
/// Errors from the runner itself (e.g. the shell cannot be spawned) abort the
/// run; a non-zero exit status is an iteration failure, not an error.
pub fn run_repeat<R: IterationRunner, F: FnMut(u32, &IterationResult)>(
    runner: &R,
    config: &RepeatConfig,
    mut on_iteration: F,
) -> Result<RepeatOutcome> {
    if config.count == 0 {
        bail!("count must be > 0");
    }

    let mut outcome = RepeatOutcome {
        iterations_run: 0,
        passed: 0,
        failed: 0,
        first_failure: None,
        stop: RepeatStop::Completed,
    };

    for iter in 1..=config.count {
        debug!(iter, count = config.count, "starting iteration");
        let result = runner
            .run_iteration(iter)
            .with_context(|| format!("iteration {iter}"))?;
        outcome.iterations_run += 1;
        on_iteration(iter, &result);

        if result.passed() {
            outcome.passed += 1;
            continue;
        }

        outcome.failed += 1;
        outcome.first_failure.get_or_insert(iter);
        warn!(iter, exit_code = ?result.exit_code, timed_out = result.timed_out, "iteration failed");
        if !config.keep_going {
            outcome.stop = RepeatStop::FailedAt {
                iter,
                exit_code: result.exit_code,
                timed_out: result.timed_out,
            };
            break;
        }
    }

    info!(
        run = outcome.iterations_run,
        passed = outcome.passed,
        failed = outcome.failed,
        "repeat finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn pass() -> IterationResult {
        IterationResult {
            exit_code: Some(0),
            timed_out: false,
            duration: Duration::from_millis(5),
        }
    }

    fn fail(code: i32) -> IterationResult {
        IterationResult {
            exit_code: Some(code),
            ..pass()
        }
    }

    #[test]
    fn runs_all_iterations_when_passing() {
        let runner = ScriptedRunner::new(vec![pass(), pass(), pass()]);
        let mut seen = Vec::new();
        let outcome = run_repeat(
            &runner,
            &RepeatConfig {
                count: 3,
                keep_going: false,
            },
            |iter, _| seen.push(iter),
        )
        .expect("repeat");

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(outcome.stop, RepeatStop::Completed);
        assert_eq!(outcome.passed, 3);
        assert!(outcome.success());
    }

    #[test]
    fn stops_at_first_failure() {
        let runner = ScriptedRunner::new(vec![pass(), fail(2), pass()]);
        let outcome = run_repeat(
            &runner,
            &RepeatConfig {
                count: 3,
                keep_going: false,
            },
            |_, _| {},
        )
        .expect("repeat");

        assert_eq!(runner.calls(), vec![1, 2]);
        assert_eq!(
            outcome.stop,
            RepeatStop::FailedAt {
                iter: 2,
                exit_code: Some(2),
                timed_out: false
            }
        );
        assert!(!outcome.success());
    }

    #[test]
    fn keep_going_counts_every_failure() {
        let runner = ScriptedRunner::new(vec![fail(1), pass(), fail(1)]);
        let outcome = run_repeat(
            &runner,
            &RepeatConfig {
                count: 3,
                keep_going: true,
            },
            |_, _| {},
        )
        .expect("repeat");

        assert_eq!(outcome.iterations_run, 3);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.first_failure, Some(1));
        assert_eq!(outcome.stop, RepeatStop::Completed);
    }

    #[test]
    fn zero_count_is_rejected() {
        let runner = ScriptedRunner::new(Vec::new());
        let config = RepeatConfig {
            count: 0,
            keep_going: false,
        };
        assert!(run_repeat(&runner, &config, |_, _| {}).is_err());
    }

    #[test]
    fn shell_runner_judges_exit_status_and_writes_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let counter = temp.path().join("count");
        let runner = ShellRunner {
            shell: "sh".to_string(),
            // Fails on the second run only.
            script: format!(
                "echo x >> '{0}'; echo run; [ $(wc -l < '{0}') -ne 2 ]",
                counter.display()
            ),
            limits: ProcessLimits::new(Duration::from_secs(5), 4096),
            log_dir: Some(temp.path().join("logs")),
        };

        let outcome = run_repeat(
            &runner,
            &RepeatConfig {
                count: 3,
                keep_going: true,
            },
            |_, _| {},
        )
        .expect("repeat");

        assert_eq!(outcome.passed, 2);
        assert_eq!(outcome.first_failure, Some(2));
        let log = std::fs::read_to_string(temp.path().join("logs").join("iter-1.log"))
            .expect("read log");
        assert!(log.starts_with("run\n"));
        assert!(log.contains("=== stderr ==="));
    }
}
