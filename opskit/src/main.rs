//! Backup, retention and test-loop tooling for virtualized Linux instances.
//!
//! Reads `opskit.toml` (or `--config`) for the backup root, retention policy
//! and virtualization CLI, then runs one pass and exits with a stable code
//! from [`opskit::exit_codes`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use opskit::backup::{BackupOptions, BackupReport, ExportStatus, run_backup};
use opskit::core::retention::RetentionPolicy;
use opskit::exit_codes;
use opskit::io::config::{DEFAULT_CONFIG_FILE, OpskitConfig, load_config, write_config};
use opskit::io::process::ProcessLimits;
use opskit::io::store::FsRemover;
use opskit::io::virt::CliVirtualizer;
use opskit::logging;
use opskit::prune::{PruneReport, prune_root};
use opskit::repeat::{RepeatConfig, RepeatStop, ShellRunner, run_repeat};

#[derive(Parser)]
#[command(
    name = "opskit",
    version,
    about = "Backup, retention and test-loop tooling for virtualized Linux instances"
)]
struct Cli {
    /// Config file (TOML). Missing file means built-in defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Append a transcript of diagnostics to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Export every non-excluded instance, then apply retention.
    Backup {
        /// Show what would be exported and deleted without doing it.
        #[arg(long)]
        dry_run: bool,
        /// Export only; do not delete old artifacts.
        #[arg(long)]
        skip_prune: bool,
    },
    /// Apply retention to existing artifacts without exporting.
    Prune {
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        overrides: RetentionOverrides,
    },
    /// Print the keep/obsolete classification per instance as JSON.
    Plan {
        #[command(flatten)]
        overrides: RetentionOverrides,
    },
    /// Run a shell command repeatedly and report failures.
    Repeat {
        /// Number of iterations.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,
        /// Shell used as `<shell> -c <command>`.
        #[arg(long, default_value = "sh")]
        shell: String,
        /// Per-iteration time limit in seconds.
        #[arg(long, default_value_t = 30 * 60)]
        timeout_secs: u64,
        /// Keep running after a failing iteration.
        #[arg(long)]
        keep_going: bool,
        /// Write per-iteration output to `<dir>/iter-<n>.log`.
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Command to run; joined with spaces and passed to the shell.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// Command-line overrides for the configured retention policy.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
struct RetentionOverrides {
    /// Keep at least this many newest artifacts per instance.
    #[arg(long, allow_negative_numbers = true)]
    keep_count: Option<i64>,
    /// Keep artifacts younger than this many days.
    #[arg(long, allow_negative_numbers = true)]
    keep_age_days: Option<f64>,
}

impl RetentionOverrides {
    fn apply(self, mut policy: RetentionPolicy) -> RetentionPolicy {
        if let Some(keep_count) = self.keep_count {
            policy.keep_count = keep_count;
        }
        if let Some(keep_age_days) = self.keep_age_days {
            policy.keep_age_days = keep_age_days;
        }
        policy
    }
}

const REPEAT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let default_filter = if cli.log_file.is_some() {
        "info"
    } else {
        "warn"
    };
    logging::init(default_filter, cli.log_file.as_deref())?;

    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Backup {
            dry_run,
            skip_prune,
        } => cmd_backup(
            &cli.config,
            BackupOptions {
                dry_run,
                skip_prune,
            },
        ),
        Command::Prune { dry_run, overrides } => cmd_prune(&cli.config, overrides, dry_run),
        Command::Plan { overrides } => cmd_plan(&cli.config, overrides),
        Command::Repeat {
            count,
            shell,
            timeout_secs,
            keep_going,
            log_dir,
            command,
        } => cmd_repeat(
            ShellRunner {
                shell,
                script: command.join(" "),
                limits: ProcessLimits::new(
                    Duration::from_secs(timeout_secs),
                    REPEAT_OUTPUT_LIMIT_BYTES,
                ),
                log_dir,
            },
            RepeatConfig { count, keep_going },
        ),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("init: config={} status=exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &OpskitConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("init: config={} status=written", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_backup(config_path: &Path, options: BackupOptions) -> Result<i32> {
    let config = load_config(config_path)?;
    let virtualizer = CliVirtualizer::new(config.virt.clone());
    let report = run_backup(&config, &virtualizer, &FsRemover, Utc::now(), options)?;
    print_backup(&report);
    Ok(if report.has_failures() {
        exit_codes::PARTIAL
    } else {
        exit_codes::OK
    })
}

fn cmd_prune(config_path: &Path, overrides: RetentionOverrides, dry_run: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let policy = overrides.apply(config.retention);
    let report = prune_root(&config.backup_root, &policy, Utc::now(), &FsRemover, dry_run)?;
    print_prune(&report);
    Ok(prune_exit_code(&report))
}

fn cmd_plan(config_path: &Path, overrides: RetentionOverrides) -> Result<i32> {
    let config = load_config(config_path)?;
    let policy = overrides.apply(config.retention);
    let report = prune_root(&config.backup_root, &policy, Utc::now(), &FsRemover, true)?;
    let json = serde_json::to_string_pretty(&report).context("serialize plan")?;
    println!("{json}");
    Ok(prune_exit_code(&report))
}

/// `PARTIAL` when any group could not be scanned or pruned.
fn prune_exit_code(report: &PruneReport) -> i32 {
    if report.has_failures() {
        exit_codes::PARTIAL
    } else {
        exit_codes::OK
    }
}

fn cmd_repeat(runner: ShellRunner, config: RepeatConfig) -> Result<i32> {
    if runner.script.trim().is_empty() {
        bail!("repeat command must be non-empty");
    }
    let outcome = run_repeat(&runner, &config, |iter, result| {
        println!(
            "repeat: iter={}/{} passed={} exit_code={:?} timed_out={} duration_ms={}",
            iter,
            config.count,
            result.passed(),
            result.exit_code,
            result.timed_out,
            result.duration.as_millis()
        );
    })?;
    println!(
        "repeat: run={} passed={} failed={}",
        outcome.iterations_run, outcome.passed, outcome.failed
    );
    if let RepeatStop::FailedAt { iter, .. } = outcome.stop {
        println!("repeat: stopped at iter={iter}");
    }
    Ok(if outcome.success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn print_backup(report: &BackupReport) {
    for instance in &report.excluded {
        println!("backup: instance={instance} status=excluded");
    }
    for export in &report.exports {
        match &export.status {
            ExportStatus::Exported => println!(
                "backup: instance={} status=exported path={}",
                export.instance,
                export.path.display()
            ),
            ExportStatus::Planned => println!(
                "backup: instance={} status=planned path={}",
                export.instance,
                export.path.display()
            ),
            ExportStatus::Failed { error } => {
                println!("backup: instance={} status=failed", export.instance);
                eprintln!("warning: export of {} failed: {}", export.instance, error);
            }
        }
    }
    if let Some(prune) = &report.prune {
        print_prune(prune);
    }
}

fn print_prune(report: &PruneReport) {
    let verb = if report.dry_run { "would_delete" } else { "deleted" };
    for group in &report.groups {
        if let Some(error) = &group.error {
            println!("prune: instance={} status=error", group.instance);
            eprintln!("warning: prune of {} skipped: {}", group.instance, error);
            continue;
        }
        let removed = if report.dry_run {
            &group.obsolete
        } else {
            &group.deleted
        };
        for path in removed {
            println!(
                "prune: instance={} {}={}",
                group.instance,
                verb,
                path.display()
            );
        }
        for failure in &group.failed {
            println!(
                "prune: instance={} failed={}",
                group.instance,
                failure.path.display()
            );
            eprintln!("warning: {}", failure.error);
        }
        println!(
            "prune: instance={} kept={} {}={} failed={}",
            group.instance,
            group.kept.len(),
            verb,
            removed.len(),
            group.failed.len()
        );
    }
}
