//! Virtualization CLI adapter.
//!
//! The [`Virtualizer`] trait decouples the backup pass from the actual CLI
//! (`wsl.exe` by default). Tests use scripted virtualizers that write fake
//! artifacts without spawning processes.

use std::path::Path;
use std::process::Command;

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::core::instances::parse_instance_list;
use crate::io::config::VirtConfig;
use crate::io::process::run_command;

/// Abstraction over the virtualization tool.
pub trait Virtualizer {
    /// Names of all instances known to the host.
    fn list_instances(&self) -> Result<Vec<String>>;

    /// Export `instance` to `dest`. Must leave a file at `dest` on success.
    fn export(&self, instance: &str, dest: &Path) -> Result<()>;
}

/// Virtualizer that shells out to the configured CLI.
#[derive(Debug, Clone)]
pub struct CliVirtualizer {
    config: VirtConfig,
}

impl CliVirtualizer {
    pub fn new(config: VirtConfig) -> Self {
        Self { config }
    }
}

impl Virtualizer for CliVirtualizer {
    #[instrument(skip_all, fields(program = %self.config.program))]
    fn list_instances(&self) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.list_args);
        let output = run_command(cmd, self.config.limits(), None)?;
        if !output.success() {
            bail!(
                "{} {} failed (exit {:?}, timed_out={}): {}",
                self.config.program,
                self.config.list_args.join(" "),
                output.status.code(),
                output.timed_out,
                output.stderr_tail()
            );
        }
        Ok(parse_instance_list(&output.stdout))
    }

    #[instrument(skip_all, fields(program = %self.config.program, instance = %instance))]
    fn export(&self, instance: &str, dest: &Path) -> Result<()> {
        info!(dest = %dest.display(), "exporting instance");
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.config.render_export_args(instance, dest));
        let output = run_command(cmd, self.config.limits(), None)?;
        if output.timed_out {
            bail!(
                "export of {instance} timed out after {}s",
                self.config.timeout_secs
            );
        }
        if !output.status.success() {
            bail!(
                "export of {instance} failed (exit {:?}): {}",
                output.status.code(),
                output.stderr_tail()
            );
        }
        if !dest.is_file() {
            bail!(
                "export of {instance} reported success but {} is missing",
                dest.display()
            );
        }
        Ok(())
    }
}
