//! Configuration module for the testwatch daemon.
//!
//! This module handles parsing configuration from environment variables,
//! with command-line flags applied on top by `main`.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TESTWATCH_ROOT` | No | current dir | Source tree to watch |
//! | `TESTWATCH_POLL_INTERVAL_MS` | No | 500 | Watch poll cadence (must be > 0) |
//! | `TESTWATCH_GRACE_SECS` | No | 1 | Trigger-gate auto-release window |
//! | `TESTWATCH_DEADLINE_SECS` | No | 120 | Per-run deadline; 0 disables |
//! | `TESTWATCH_SOURCE_EXT` | No | `rb` | Source file extension |
//! | `TESTWATCH_TEST_SUFFIX` | No | `_test` | Test filename suffix |
//! | `TESTWATCH_STRATEGY` | No | `cooperative` | `cooperative` or `threaded` |
//! | `TESTWATCH_USE_FS_EVENTS` | No | false | OS file events instead of polling |
//! | `TESTWATCH_RUNNER_PREFIX` | No | `bundle exec` | Prepended to every command |
//! | `TESTWATCH_FILE_CMD` | No | `ruby -I test {file}` | Single-file command template |
//! | `TESTWATCH_ALL_CMD` | No | `ruby -I test test/all.rb` | Whole-suite command |
//! | `TESTWATCH_ALL_CMD_ALT` | No | `rake test` | Whole-suite command in alternate mode |
//!
//! # Example
//!
//! ```no_run
//! use testwatch::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Watching: {}", config.root.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::executor::Strategy;

/// Default watch poll cadence in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default trigger-gate auto-release window in seconds.
const DEFAULT_GRACE_SECS: u64 = 1;

/// Default per-run deadline in seconds. Zero disables enforcement.
const DEFAULT_DEADLINE_SECS: u64 = 120;

/// Default source file extension.
const DEFAULT_SOURCE_EXT: &str = "rb";

/// Default test filename suffix, inserted before the extension.
const DEFAULT_TEST_SUFFIX: &str = "_test";

/// Default prefix prepended to every spawned command line.
const DEFAULT_RUNNER_PREFIX: &str = "bundle exec";

/// Default single-file command template. `{file}` is replaced with the
/// test file path.
const DEFAULT_FILE_CMD: &str = "ruby -I test {file}";

/// Default whole-suite command.
const DEFAULT_ALL_CMD: &str = "ruby -I test test/all.rb";

/// Default whole-suite command in alternate-runner mode.
const DEFAULT_ALL_CMD_ALT: &str = "rake test";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine the current working directory.
    #[error("failed to determine working directory")]
    NoWorkingDirectory,
}

/// Configuration for the testwatch daemon.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the source tree to watch.
    pub root: PathBuf,

    /// Cadence of the background watch poll loop.
    pub poll_interval: Duration,

    /// Trigger-gate auto-release window.
    pub grace: Duration,

    /// Per-run deadline in seconds. Zero disables timeout enforcement.
    pub deadline_secs: u64,

    /// Source file extension (without the dot).
    pub source_ext: String,

    /// Test filename suffix, inserted before the extension
    /// (`a.rb` -> `a_test.rb`).
    pub test_suffix: String,

    /// Concurrency strategy for process execution.
    pub strategy: Strategy,

    /// Use the OS file-event backend instead of the polling registry.
    pub use_fs_events: bool,

    /// Prefix prepended to every spawned command line.
    pub runner_prefix: String,

    /// Single-file command template with a `{file}` placeholder.
    pub file_cmd: String,

    /// Whole-suite command for the default run mode.
    pub all_cmd: String,

    /// Whole-suite command for the alternate run mode.
    pub all_cmd_alt: String,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a variable is set but cannot be parsed,
    /// or if no root is configured and the working directory cannot be
    /// determined.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests supply their own lookup so they
    /// never touch process-wide environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let root = match lookup("TESTWATCH_ROOT") {
            Some(val) => PathBuf::from(val),
            None => env::current_dir().map_err(|_| ConfigError::NoWorkingDirectory)?,
        };

        let poll_interval_ms = parse_positive(&lookup, "TESTWATCH_POLL_INTERVAL_MS")?
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let grace_secs =
            parse_positive(&lookup, "TESTWATCH_GRACE_SECS")?.unwrap_or(DEFAULT_GRACE_SECS);

        // Zero is meaningful here: it disables deadline enforcement.
        let deadline_secs = match lookup("TESTWATCH_DEADLINE_SECS") {
            Some(val) => val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "TESTWATCH_DEADLINE_SECS".to_string(),
                message: format!("expected non-negative integer, got '{val}'"),
            })?,
            None => DEFAULT_DEADLINE_SECS,
        };

        let source_ext = lookup("TESTWATCH_SOURCE_EXT")
            .map(|val| val.trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_SOURCE_EXT.to_string());
        if source_ext.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "TESTWATCH_SOURCE_EXT".to_string(),
                message: "extension must not be empty".to_string(),
            });
        }

        let test_suffix =
            lookup("TESTWATCH_TEST_SUFFIX").unwrap_or_else(|| DEFAULT_TEST_SUFFIX.to_string());
        if test_suffix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "TESTWATCH_TEST_SUFFIX".to_string(),
                message: "suffix must not be empty".to_string(),
            });
        }

        let strategy = match lookup("TESTWATCH_STRATEGY") {
            Some(val) => val
                .parse::<Strategy>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "TESTWATCH_STRATEGY".to_string(),
                    message,
                })?,
            None => Strategy::default(),
        };

        let use_fs_events = match lookup("TESTWATCH_USE_FS_EVENTS") {
            Some(val) => match val.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "TESTWATCH_USE_FS_EVENTS".to_string(),
                        message: format!("expected boolean, got '{val}'"),
                    })
                }
            },
            None => false,
        };

        let runner_prefix =
            lookup("TESTWATCH_RUNNER_PREFIX").unwrap_or_else(|| DEFAULT_RUNNER_PREFIX.to_string());

        let file_cmd = lookup("TESTWATCH_FILE_CMD").unwrap_or_else(|| DEFAULT_FILE_CMD.to_string());
        if !file_cmd.contains("{file}") {
            return Err(ConfigError::InvalidValue {
                key: "TESTWATCH_FILE_CMD".to_string(),
                message: "template must contain a {file} placeholder".to_string(),
            });
        }

        let all_cmd = lookup("TESTWATCH_ALL_CMD").unwrap_or_else(|| DEFAULT_ALL_CMD.to_string());
        let all_cmd_alt =
            lookup("TESTWATCH_ALL_CMD_ALT").unwrap_or_else(|| DEFAULT_ALL_CMD_ALT.to_string());

        Ok(Self {
            root,
            poll_interval: Duration::from_millis(poll_interval_ms),
            grace: Duration::from_secs(grace_secs),
            deadline_secs,
            source_ext,
            test_suffix,
            strategy,
            use_fs_events,
            runner_prefix,
            file_cmd,
            all_cmd,
            all_cmd_alt,
        })
    }

    /// The per-run deadline, or `None` when enforcement is disabled.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        if self.deadline_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.deadline_secs))
        }
    }

    /// Expands the single-file command template for a test file path.
    #[must_use]
    pub fn file_command(&self, path: &str) -> String {
        self.file_cmd.replace("{file}", path)
    }
}

/// Parses an optional positive integer variable.
fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(key) {
        Some(val) => {
            let parsed = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected positive integer, got '{val}'"),
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "value must be greater than 0".to_string(),
                });
            }
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[("TESTWATCH_ROOT", "/tmp/app")])).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/app"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.grace, Duration::from_secs(1));
        assert_eq!(config.deadline_secs, 120);
        assert_eq!(config.source_ext, "rb");
        assert_eq!(config.test_suffix, "_test");
        assert_eq!(config.strategy, Strategy::Cooperative);
        assert!(!config.use_fs_events);
        assert_eq!(config.runner_prefix, "bundle exec");
        assert_eq!(config.all_cmd, "ruby -I test test/all.rb");
        assert_eq!(config.all_cmd_alt, "rake test");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/srv/code"),
            ("TESTWATCH_POLL_INTERVAL_MS", "250"),
            ("TESTWATCH_GRACE_SECS", "2"),
            ("TESTWATCH_DEADLINE_SECS", "30"),
            ("TESTWATCH_SOURCE_EXT", ".py"),
            ("TESTWATCH_TEST_SUFFIX", "_spec"),
            ("TESTWATCH_STRATEGY", "threaded"),
            ("TESTWATCH_USE_FS_EVENTS", "true"),
            ("TESTWATCH_RUNNER_PREFIX", "poetry run"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.grace, Duration::from_secs(2));
        assert_eq!(config.deadline(), Some(Duration::from_secs(30)));
        assert_eq!(config.source_ext, "py", "leading dot is stripped");
        assert_eq!(config.test_suffix, "_spec");
        assert_eq!(config.strategy, Strategy::Threaded);
        assert!(config.use_fs_events);
        assert_eq!(config.runner_prefix, "poetry run");
    }

    #[test]
    fn zero_deadline_disables_enforcement() {
        let config = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/tmp"),
            ("TESTWATCH_DEADLINE_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.deadline(), None);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/tmp"),
            ("TESTWATCH_POLL_INTERVAL_MS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TESTWATCH_POLL_INTERVAL_MS"));
    }

    #[test]
    fn garbage_interval_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/tmp"),
            ("TESTWATCH_POLL_INTERVAL_MS", "fast"),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for TESTWATCH_POLL_INTERVAL_MS: expected positive integer, got 'fast'"
        );
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/tmp"),
            ("TESTWATCH_STRATEGY", "fibers"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TESTWATCH_STRATEGY"));
    }

    #[test]
    fn bad_boolean_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/tmp"),
            ("TESTWATCH_USE_FS_EVENTS", "maybe"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("expected boolean"));
    }

    #[test]
    fn file_cmd_requires_placeholder() {
        let err = Config::from_lookup(lookup_from(&[
            ("TESTWATCH_ROOT", "/tmp"),
            ("TESTWATCH_FILE_CMD", "ruby -I test"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("{file}"));
    }

    #[test]
    fn file_command_expands_template() {
        let config = Config::from_lookup(lookup_from(&[("TESTWATCH_ROOT", "/tmp")])).unwrap();
        assert_eq!(
            config.file_command("test/a_test.rb"),
            "ruby -I test test/a_test.rb"
        );
    }
}
