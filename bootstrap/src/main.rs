//! Two-stage compiler bootstrap driver.
//!
//! Stage 1 builds the compiler with the host toolchain; stage 2 rebuilds it
//! with the stage-1 binaries. Both are driven through CMake as configured in
//! `bootstrap.toml`.

mod check;
mod config;
mod run;
mod stage;
mod summary;
#[cfg(all(test, unix))]
mod test_util;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use opskit::{exit_codes, logging};

use crate::config::{BootstrapConfig, DEFAULT_CONFIG_FILE, load_config};
use crate::stage::{Stage, build_command, build_dir, configure_command};
use crate::summary::{SummaryInput, write_summary};

#[derive(Parser)]
#[command(name = "bootstrap", version, about = "Two-stage compiler bootstrap driver")]
struct Cli {
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
    /// Configure, build and check each stage.
    Run {
        /// Run only this stage (1 or 2).
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
        stage: Option<u8>,
    },
    /// Print the commands `run` would execute.
    Plan {
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
        stage: Option<u8>,
    },
    /// Remove the build root.
    Clean,
}

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
    logging::init("info", cli.log_file.as_deref())?;
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Run { stage } => cmd_run(&cli.config, &config, &stages(stage)),
        Command::Plan { stage } => cmd_plan(&config, &stages(stage)),
        Command::Clean => cmd_clean(&config),
    }
}

fn stages(selected: Option<u8>) -> Vec<Stage> {
    match selected.and_then(Stage::from_number) {
        Some(stage) => vec![stage],
        None => Stage::ALL.to_vec(),
    }
}

fn cmd_run(config_path: &Path, config: &BootstrapConfig, stages: &[Stage]) -> Result<i32> {
    let started_at = Utc::now();
    let mut steps = Vec::new();
    let result = run::run_stages(config, stages, &mut steps);
    let error = result.as_ref().err().map(|err| format!("{err:#}"));

    let summary = write_summary(
        &config.build_root,
        SummaryInput {
            config_path,
            stages,
            steps,
            error: error.clone(),
            started_at,
            finished_at: Utc::now(),
        },
    )?;
    println!("bootstrap: summary={}", summary.display());

    match error {
        None => {
            for &stage in stages {
                println!(
                    "bootstrap: stage={stage} status=ok dir={}",
                    build_dir(config, stage).display()
                );
            }
            Ok(exit_codes::OK)
        }
        Some(message) => {
            eprintln!("error: {message}");
            Ok(exit_codes::FAILED)
        }
    }
}

fn cmd_plan(config: &BootstrapConfig, stages: &[Stage]) -> Result<i32> {
    for &stage in stages {
        for planned in [configure_command(config, stage), build_command(config, stage)] {
            println!("{stage} {}: {}", planned.step, planned.display());
        }
        let expected = &stage.config(config).expected_outputs;
        if !expected.is_empty() {
            let listed: Vec<String> = expected.iter().map(|p| p.display().to_string()).collect();
            println!("{stage} check: {}", listed.join(" "));
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_clean(config: &BootstrapConfig) -> Result<i32> {
    let root = &config.build_root;
    if config.source_dir.starts_with(root) {
        bail!(
            "refusing to remove {}: it contains source_dir {}",
            root.display(),
            config.source_dir.display()
        );
    }
    if !root.exists() {
        println!("bootstrap: clean dir={} status=absent", root.display());
        return Ok(exit_codes::OK);
    }
    fs::remove_dir_all(root).with_context(|| format!("remove {}", root.display()))?;
    println!("bootstrap: clean dir={} status=removed", root.display());
    Ok(exit_codes::OK)
}
