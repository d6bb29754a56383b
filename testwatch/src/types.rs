//! Core data types for the testwatch daemon.
//!
//! This module defines the records that flow through the
//! watch-detect-execute-classify pipeline: the request handed to the
//! executor, the raw result it produces, and the parsed summary record
//! with its derived classification.

use std::time::Duration;

/// Which test runner invocation to use for whole-suite runs.
///
/// Toggled by the operator with the `rails`/`r` command. `Default` runs the
/// plain all-tests command; `AlternateRunner` runs the alternate suite
/// command (a `rake test`-style task runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Plain test runner invocation.
    #[default]
    Default,
    /// Alternate task-runner invocation for the full suite.
    AlternateRunner,
}

impl RunMode {
    /// Returns the other mode.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Default => Self::AlternateRunner,
            Self::AlternateRunner => Self::Default,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "false"),
            Self::AlternateRunner => write!(f, "true"),
        }
    }
}

/// A single request for external process execution.
///
/// Immutable once submitted to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The command line to run (before the runner prefix and the
    /// stderr-merging redirection are applied).
    pub command: String,

    /// Maximum wall-clock duration the run may take. `None` disables
    /// deadline enforcement entirely; reserved for explicit opt-out such
    /// as whole-suite runs.
    pub deadline: Option<Duration>,

    /// Human-readable label for prompts and logging.
    pub label: String,
}

impl ExecutionRequest {
    /// Creates a request with a deadline.
    #[must_use]
    pub fn new(command: impl Into<String>, deadline: Option<Duration>) -> Self {
        let command = command.into();
        let label = command.clone();
        Self {
            command,
            deadline,
            label,
        }
    }
}

/// The raw outcome of one external process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Combined stdout/stderr, UTF-8 with invalid sequences replaced.
    pub raw_output: String,

    /// Whether the child exited with a zero status. A non-zero exit is
    /// not an error condition; the output is returned verbatim either way.
    pub exited_normally: bool,

    /// Whether the deadline elapsed before the child finished. When set,
    /// `raw_output` holds whatever partial output was captured.
    pub timed_out: bool,
}

/// Classification of a parsed test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Zero failures and zero errors, with at least one counter non-zero.
    Success,
    /// Success with at least one pending test.
    PartialSuccess,
    /// Failures or errors present, or no results line matched at all.
    Failure,
}

/// A structured summary of one test run, accumulated over every results
/// line found in the captured output.
///
/// All counters default to zero; an output with no results line parses to
/// the all-zero record, which classifies as failure (a crashed or silent
/// runner is not a success).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TestResultRecord {
    pub tests: u64,
    pub assertions: u64,
    pub failures: u64,
    pub errors: u64,
    pub pendings: u64,
    pub omissions: u64,
    pub notifications: u64,

    /// Sum of every reported `Finished tests in <float>s,` value.
    pub elapsed_secs: f64,
}

impl TestResultRecord {
    /// Whether every one of the seven counters is zero.
    ///
    /// Elapsed time is not a counter and does not participate.
    #[must_use]
    pub fn all_counters_zero(&self) -> bool {
        self.tests == 0
            && self.assertions == 0
            && self.failures == 0
            && self.errors == 0
            && self.pendings == 0
            && self.omissions == 0
            && self.notifications == 0
    }

    /// Two-step success rule: an all-zero record is a failure (nothing
    /// ran); otherwise success means no errors and no failures.
    #[must_use]
    pub fn success(&self) -> bool {
        let mut success = !self.all_counters_zero();
        if success {
            success = self.errors == 0 && self.failures == 0;
        }
        success
    }

    /// A successful run with at least one pending test.
    ///
    /// Invariant: `partial_success()` implies `success()`.
    #[must_use]
    pub fn partial_success(&self) -> bool {
        self.success() && self.pendings != 0
    }

    /// Derives the classification from the success flags.
    #[must_use]
    pub fn classification(&self) -> Classification {
        if self.partial_success() {
            Classification::PartialSuccess
        } else if self.success() {
            Classification::Success
        } else {
            Classification::Failure
        }
    }
}

impl std::fmt::Display for TestResultRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tests, {} assertions, {} failures, {} errors, {} pendings, \
             {} omissions, {} notifications in {}s",
            self.tests,
            self.assertions,
            self.failures,
            self.errors,
            self.pendings,
            self.omissions,
            self.notifications,
            self.elapsed_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_toggles_both_ways() {
        assert_eq!(RunMode::Default.toggled(), RunMode::AlternateRunner);
        assert_eq!(RunMode::AlternateRunner.toggled(), RunMode::Default);
    }

    #[test]
    fn run_mode_displays_as_flag() {
        assert_eq!(RunMode::Default.to_string(), "false");
        assert_eq!(RunMode::AlternateRunner.to_string(), "true");
    }

    #[test]
    fn clean_run_is_success_not_partial() {
        let record = TestResultRecord {
            tests: 10,
            assertions: 20,
            ..Default::default()
        };
        assert!(record.success());
        assert!(!record.partial_success());
        assert_eq!(record.classification(), Classification::Success);
    }

    #[test]
    fn pendings_make_a_success_partial() {
        let record = TestResultRecord {
            tests: 10,
            assertions: 20,
            pendings: 2,
            ..Default::default()
        };
        assert!(record.success());
        assert!(record.partial_success());
        assert_eq!(record.classification(), Classification::PartialSuccess);
    }

    #[test]
    fn all_zero_record_is_failure() {
        let record = TestResultRecord::default();
        assert!(record.all_counters_zero());
        assert!(!record.success());
        assert_eq!(record.classification(), Classification::Failure);
    }

    #[test]
    fn failures_gate_success() {
        let record = TestResultRecord {
            tests: 10,
            assertions: 20,
            failures: 1,
            ..Default::default()
        };
        assert!(!record.success());
        assert!(!record.partial_success());
        assert_eq!(record.classification(), Classification::Failure);
    }

    #[test]
    fn errors_gate_success() {
        let record = TestResultRecord {
            tests: 3,
            assertions: 4,
            errors: 2,
            ..Default::default()
        };
        assert!(!record.success());
        assert_eq!(record.classification(), Classification::Failure);
    }

    #[test]
    fn pendings_never_rescue_a_failure() {
        let record = TestResultRecord {
            tests: 10,
            failures: 1,
            pendings: 3,
            ..Default::default()
        };
        assert!(!record.partial_success(), "partial implies success");
    }

    #[test]
    fn elapsed_does_not_affect_zero_check() {
        let record = TestResultRecord {
            elapsed_secs: 1.5,
            ..Default::default()
        };
        assert!(record.all_counters_zero());
        assert!(!record.success());
    }

    #[test]
    fn display_lists_all_counters() {
        let record = TestResultRecord {
            tests: 5,
            assertions: 7,
            elapsed_secs: 0.42,
            ..Default::default()
        };
        let shown = record.to_string();
        assert!(shown.contains("5 tests"));
        assert!(shown.contains("7 assertions"));
        assert!(shown.contains("0.42s"));
    }
}
