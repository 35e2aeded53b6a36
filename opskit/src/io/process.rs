//! Child process execution with a timeout and bounded output capture.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Limits applied to a single child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Kill the child after this long.
    pub timeout: Duration,
    /// Keep at most this many bytes of each stream in memory.
    pub output_limit_bytes: usize,
}

impl ProcessLimits {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// True when the child exited zero within its time budget.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Last non-empty stderr line, for one-line failure messages.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_default()
    }

    /// Human-readable transcript of both streams, with truncation notices.
    pub fn transcript(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str("\n[timed out]");
        }
        buf.push('\n');
        buf
    }
}

type SharedTee = Option<BufWriter<File>>;
type ReaderResult = Result<(Vec<u8>, usize)>;

/// How long to keep draining pipes after a timeout kill.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Run `cmd` to completion or until `limits.timeout`, capturing both streams.
///
/// Streams are drained on reader threads while the child runs, so a chatty
/// child cannot deadlock on a full pipe. When `tee_path` is set each stdout
/// line is also appended to that file as soon as it arrives.
///
/// On Unix the child leads its own process group and a timeout kills the
/// whole group, so grandchildren (`sh -c`, build tools) die with it. Pipes
/// still held open after that are abandoned once `KILL_GRACE` passes.
#[instrument(skip_all, fields(
    program = ?cmd.get_program(),
    timeout_secs = limits.timeout.as_secs(),
    teeing = tee_path.is_some(),
))]
pub fn run_command(
    mut cmd: Command,
    limits: ProcessLimits,
    tee_path: Option<&Path>,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let tee: SharedTee = match tee_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create log file {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return Err(err).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_rx = spawn_reader(move || read_lines_limited(stdout, limit, tee));
    let stderr_rx = spawn_reader(move || read_limited(stderr, limit));

    let mut timed_out = false;
    let status = match child
        .wait_timeout(limits.timeout)
        .context("wait for command")?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child);
            child.wait().context("wait command after kill")?
        }
    };

    let grace = timed_out.then_some(KILL_GRACE);
    let (stdout, stdout_truncated) = collect_reader(&stdout_rx, grace).context("read stdout")?;
    let (stderr, stderr_truncated) = collect_reader(&stderr_rx, grace).context("read stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_reader<F>(read: F) -> Receiver<ReaderResult>
where
    F: FnOnce() -> ReaderResult + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller gave up on this stream.
        let _ = tx.send(read());
    });
    rx
}

/// Wait for a reader's result, or at most `grace` when set.
fn collect_reader(rx: &Receiver<ReaderResult>, grace: Option<Duration>) -> ReaderResult {
    let received = match grace {
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        Some(grace) => rx.recv_timeout(grace),
    };
    match received {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("output pipe still open after kill, abandoning reader");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Kill the child's process group, then the child itself.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(exit_code = ?status.code(), "process group kill failed"),
            Err(err) => warn!(err = %err, "process group kill failed"),
        }
    }
    if let Err(err) = child.kill() {
        debug!(err = %err, "child already gone");
    }
}

/// Append `chunk` to `buf` up to `limit`, returning how many bytes were dropped.
fn keep_bounded(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> usize {
    let remaining = limit.saturating_sub(buf.len());
    let keep = chunk.len().min(remaining);
    buf.extend_from_slice(&chunk[..keep]);
    chunk.len() - keep
}

fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    mut tee: SharedTee,
) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }
        if let Some(writer) = tee.as_mut()
            && let Err(err) = writer.write_all(&line).and_then(|()| writer.flush())
        {
            warn!(err = %err, "failed to write log file");
        }
        truncated += keep_bounded(&mut collected, &line, limit);
    }

    Ok((collected, truncated))
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        truncated += keep_bounded(&mut buf, &chunk[..n], limit);
    }

    Ok((buf, truncated))
}
