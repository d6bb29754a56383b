//! Error types for the testwatch daemon.
//!
//! This module defines the error taxonomy used throughout the crate. Every
//! per-run error (spawn failure, timeout, unresolved test file, vanished
//! watched path) is caught at the command-loop boundary and converted to a
//! one-line message; only the loss of the background poll loop is fatal.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::ExecutionResult;

/// Errors that can occur during daemon operations.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The external test program could not be started. Fatal to that
    /// single run only.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The deadline elapsed before the child finished. The partial output
    /// captured up to that point is retained so callers can decide whether
    /// it is still usable.
    #[error("timed out after {deadline_secs}s")]
    Timeout {
        deadline_secs: u64,
        partial: ExecutionResult,
    },

    /// No test file matched the derived filename. Reported, not fatal.
    #[error("test file not found: {filename}")]
    Resolution { filename: String },

    /// A watched path could not be stat'ed. Triggers a delete
    /// notification for that path only.
    #[error("cannot stat watched path: {}", path.display())]
    WatchStat { path: PathBuf },

    /// The background poll loop is no longer running. The liveness
    /// guarantee is broken, so the process should terminate.
    #[error("background poll loop is not running")]
    ReactorStopped,

    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Whether this error must terminate the interactive session.
    ///
    /// Everything except the loss of the poll loop is reported and
    /// survived.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReactorStopped)
    }
}

/// A specialized `Result` type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
