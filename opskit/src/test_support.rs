//! Test-only helpers: fixed timestamps, on-disk artifacts, scripted adapters.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, TimeZone, Utc};

use crate::core::naming::artifact_file_name;
use crate::core::types::BackupArtifact;
use crate::io::store::{FsRemover, Remover};
use crate::io::virt::Virtualizer;
use crate::repeat::{IterationResult, IterationRunner};

/// Whole-hour UTC timestamp.
pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid test timestamp {year}-{month}-{day}T{hour}"))
}

/// Write an artifact for `instance` into `dir`, named and stamped at `at`.
pub fn touch_artifact(dir: &Path, instance: &str, at: DateTime<Utc>) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(artifact_file_name(instance, at));
    let mut file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
    file.write_all(b"tar").context("write artifact")?;
    file.set_modified(SystemTime::from(at))
        .with_context(|| format!("set mtime {}", path.display()))?;
    Ok(path)
}

/// Virtualizer that writes small fake artifacts instead of calling a CLI.
pub struct ScriptedVirtualizer {
    instances: Vec<String>,
    failing: Vec<String>,
    list_error: Option<String>,
    stamp: DateTime<Utc>,
    exported: RefCell<Vec<String>>,
}

impl ScriptedVirtualizer {
    /// Exports stamp their files with `stamp` as modification time.
    pub fn new(instances: &[&str], stamp: DateTime<Utc>) -> Self {
        Self {
            instances: instances.iter().map(|name| name.to_string()).collect(),
            failing: Vec::new(),
            list_error: None,
            stamp,
            exported: RefCell::new(Vec::new()),
        }
    }

    /// Make exports of `instance` fail.
    pub fn failing(mut self, instance: &str) -> Self {
        self.failing.push(instance.to_string());
        self
    }

    /// Make instance listing fail.
    pub fn list_fails(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    /// Instances exported so far, in call order.
    pub fn exported(&self) -> Vec<String> {
        self.exported.borrow().clone()
    }
}

impl Virtualizer for ScriptedVirtualizer {
    fn list_instances(&self) -> Result<Vec<String>> {
        if let Some(message) = &self.list_error {
            return Err(anyhow!("{message}"));
        }
        Ok(self.instances.clone())
    }

    fn export(&self, instance: &str, dest: &Path) -> Result<()> {
        self.exported.borrow_mut().push(instance.to_string());
        if self.failing.iter().any(|name| name == instance) {
            bail!("scripted export failure for {instance}");
        }
        let mut file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
        file.write_all(b"tar").context("write export")?;
        file.set_modified(SystemTime::from(self.stamp))
            .context("set export mtime")?;
        Ok(())
    }
}

/// Remover that deletes real files but refuses the paths it was told to.
#[derive(Default)]
pub struct RecordingRemover {
    refuse: Vec<PathBuf>,
    attempts: RefCell<Vec<PathBuf>>,
}

impl RecordingRemover {
    pub fn refusing(paths: &[PathBuf]) -> Self {
        Self {
            refuse: paths.to_vec(),
            attempts: RefCell::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<PathBuf> {
        self.attempts.borrow().clone()
    }
}

impl Remover for RecordingRemover {
    fn remove(&self, artifact: &BackupArtifact) -> Result<()> {
        self.attempts.borrow_mut().push(artifact.path.clone());
        if self.refuse.contains(&artifact.path) {
            bail!("permission denied: {}", artifact.path.display());
        }
        FsRemover.remove(artifact)
    }
}

/// Iteration runner that replays scripted results.
pub struct ScriptedRunner {
    results: RefCell<VecDeque<IterationResult>>,
    calls: RefCell<Vec<u32>>,
}

impl ScriptedRunner {
    pub fn new(results: Vec<IterationResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.borrow().clone()
    }
}

impl IterationRunner for ScriptedRunner {
    fn run_iteration(&self, iter: u32) -> Result<IterationResult> {
        self.calls.borrow_mut().push(iter);
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted result for iteration {iter}"))
    }
}
