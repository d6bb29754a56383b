//! Deadline-bearing external process execution.
//!
//! The executor spawns the test command through `sh -c "<cmd> 2>&1"`, so
//! stdout and stderr arrive combined, streams the output to the
//! controlling terminal live while accumulating it, and enforces the
//! request deadline. The deadline check fires at one-second granularity;
//! an absent deadline disables enforcement entirely and the run goes to
//! completion.
//!
//! Two interchangeable strategies implement the same contract:
//!
//! - [`Strategy::Cooperative`] awaits the child on the Tokio runtime,
//!   alternating between a non-blocking wait and a one-second
//!   deadline-check sleep;
//! - [`Strategy::Threaded`] streams and waits on a dedicated worker
//!   thread while the caller polls a channel at one-second granularity,
//!   SIGKILLing the child on expiry as a best-effort cleanup.
//!
//! In both, a child that merely exits non-zero is not an error: the
//! combined output is returned verbatim (UTF-8, invalid sequences
//! replaced). Only spawn failure and deadline expiry are typed errors,
//! and a timeout still carries the partial output captured so far.

use std::io;
use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::error::{DaemonError, Result};
use crate::types::{ExecutionRequest, ExecutionResult};

/// Granularity of the deadline check in both strategies.
const DEADLINE_TICK: Duration = Duration::from_secs(1);

/// How long the threaded strategy waits for the worker to surrender
/// partial output after the child has been killed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Concurrency strategy for process execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Single-runtime cooperative suspension (the default).
    #[default]
    Cooperative,
    /// Dedicated worker thread polled by the caller.
    Threaded,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cooperative" => Ok(Self::Cooperative),
            "threaded" => Ok(Self::Threaded),
            other => Err(format!(
                "expected 'cooperative' or 'threaded', got '{other}'"
            )),
        }
    }
}

/// Spawns test commands and enforces their deadlines.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    strategy: Strategy,
    runner_prefix: String,
}

impl CommandExecutor {
    /// Creates an executor with the given strategy and runner prefix.
    ///
    /// The prefix (e.g. `bundle exec`) is prepended to every command
    /// line; an empty prefix runs the command as-is.
    #[must_use]
    pub fn new(strategy: Strategy, runner_prefix: impl Into<String>) -> Self {
        Self {
            strategy,
            runner_prefix: runner_prefix.into(),
        }
    }

    /// The configured strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Executes a request to completion or deadline.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::Spawn`] if the shell could not be started;
    /// - [`DaemonError::Timeout`] if the deadline elapsed first, with the
    ///   partial output captured up to that point.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let command_line = self.shell_line(&request.command);
        debug!(
            label = %request.label,
            strategy = ?self.strategy,
            deadline_secs = request.deadline.map(|d| d.as_secs()),
            "executing"
        );

        match self.strategy {
            Strategy::Cooperative => execute_cooperative(command_line, request.deadline).await,
            Strategy::Threaded => {
                let deadline = request.deadline;
                tokio::task::spawn_blocking(move || execute_threaded(&command_line, deadline))
                    .await
                    .map_err(|e| {
                        DaemonError::Io(io::Error::other(format!("executor task failed: {e}")))
                    })?
            }
        }
    }

    /// Builds the full shell command line with the runner prefix and the
    /// stderr-merging redirection.
    fn shell_line(&self, command: &str) -> String {
        if self.runner_prefix.is_empty() {
            format!("{command} 2>&1")
        } else {
            format!("{} {command} 2>&1", self.runner_prefix)
        }
    }
}

/// Runs the command on the Tokio runtime, suspending between a
/// non-blocking wait on the child and the periodic deadline check.
async fn execute_cooperative(
    command_line: String,
    deadline: Option<Duration>,
) -> Result<ExecutionResult> {
    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg(&command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    // The shell gets its own process group so a deadline kill reaches
    // every process still holding the output pipe.
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| DaemonError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DaemonError::Io(io::Error::other("child stdout was not captured")))?;
    let reader = tokio::spawn(stream_output(stdout));

    let started = Instant::now();
    let status = loop {
        // Non-blocking wait, handing control back every tick so the
        // deadline can be checked. `Child::wait` is cancel safe.
        match tokio::time::timeout(DEADLINE_TICK, child.wait()).await {
            Ok(Ok(status)) => break Some(status),
            // The child went away during teardown; whatever output was
            // captured is the result, not a second error.
            Ok(Err(e)) => {
                warn!(error = %e, "child vanished while waiting");
                break None;
            }
            Err(_tick) => {
                if let Some(limit) = deadline {
                    if started.elapsed() >= limit {
                        trace!(deadline_secs = limit.as_secs(), "deadline elapsed, killing child");
                        if let Some(pid) = child.id() {
                            terminate_child(pid);
                        }
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        let partial = reader.await.unwrap_or_default();
                        return Err(timeout_error(limit, partial));
                    }
                }
            }
        }
    };

    let collected = reader.await.unwrap_or_default();
    Ok(ExecutionResult {
        raw_output: into_utf8(collected),
        exited_normally: status.is_some_and(|s| s.success()),
        timed_out: false,
    })
}

/// Runs the command with a dedicated worker thread streaming and waiting,
/// while this (blocking) caller polls for completion at one-second
/// granularity.
fn execute_threaded(command_line: &str, deadline: Option<Duration>) -> Result<ExecutionResult> {
    use std::sync::mpsc;

    let mut command = std::process::Command::new("sh");
    command
        .arg("-c")
        .arg(command_line)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|source| DaemonError::Spawn {
        command: command_line.to_string(),
        source,
    })?;

    let child_id = child.id();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DaemonError::Io(io::Error::other("child stdout was not captured")))?;

    let (tx, rx) = mpsc::channel();
    let worker = std::thread::spawn(move || {
        let collected = stream_output_blocking(stdout);
        let status = child.wait();
        let _ = tx.send((collected, status));
    });

    let started = Instant::now();
    loop {
        match rx.recv_timeout(DEADLINE_TICK) {
            Ok((collected, status)) => {
                let _ = worker.join();
                let exited_normally = match status {
                    Ok(status) => status.success(),
                    Err(e) => {
                        warn!(error = %e, "child vanished while waiting");
                        false
                    }
                };
                return Ok(ExecutionResult {
                    raw_output: into_utf8(collected),
                    exited_normally,
                    timed_out: false,
                });
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(limit) = deadline {
                    if started.elapsed() >= limit {
                        trace!(deadline_secs = limit.as_secs(), "deadline elapsed, killing child");
                        terminate_child(child_id);
                        // The kill unblocks the worker; give it a moment to
                        // surrender what it captured.
                        let partial = rx
                            .recv_timeout(KILL_GRACE)
                            .map(|(collected, _)| collected)
                            .unwrap_or_default();
                        let _ = worker.join();
                        return Err(timeout_error(limit, partial));
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(DaemonError::Io(io::Error::other(
                    "process worker thread terminated unexpectedly",
                )));
            }
        }
    }
}

/// Builds the timeout error carrying the partial output.
fn timeout_error(limit: Duration, partial: Vec<u8>) -> DaemonError {
    DaemonError::Timeout {
        deadline_secs: limit.as_secs(),
        partial: ExecutionResult {
            raw_output: into_utf8(partial),
            exited_normally: false,
            timed_out: true,
        },
    }
}

/// Streams child output to the terminal while collecting it (async).
async fn stream_output(mut stdout: tokio::process::ChildStdout) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let mut terminal = tokio::io::stdout();

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = terminal.write_all(&buf[..n]).await;
                let _ = terminal.flush().await;
                collected.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                warn!(error = %e, "error reading child output");
                break;
            }
        }
    }

    collected
}

/// Streams child output to the terminal while collecting it (blocking).
fn stream_output_blocking(mut stdout: std::process::ChildStdout) -> Vec<u8> {
    use std::io::{Read, Write};

    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let terminal = std::io::stdout();

    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let mut lock = terminal.lock();
                let _ = lock.write_all(&buf[..n]);
                let _ = lock.flush();
                collected.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                warn!(error = %e, "error reading child output");
                break;
            }
        }
    }

    collected
}

/// Decodes captured bytes, replacing invalid UTF-8 sequences.
fn into_utf8(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kills a child's whole process group by PID, best effort.
///
/// The child was spawned as its own group leader, so the negative PID
/// reaches the shell and anything it spawned.
#[cfg(unix)]
fn terminate_child(pid: u32) {
    // SAFETY: kill(2) with a valid-or-stale PGID; worst case is ESRCH.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_child(_pid: u32) {}
