//! Testwatch - interactive file-watch test runner.
//!
//! This crate provides a daemon that watches a source tree, maps changed
//! files to their test files, runs those tests as external subprocesses
//! under a deadline, parses the textual result summary, and surfaces the
//! classification through a desktop notification and a color-coded
//! terminal line. A line-oriented command loop lets the operator run the
//! whole suite, re-run the last test, toggle the runner mode, refresh
//! the watch list, or name a file to test directly.
//!
//! # Pipeline
//!
//! Watch detection ([`watcher`], optionally [`events`]) feeds the trigger
//! gate ([`gate`]), changed files resolve to test files ([`resolver`]),
//! the executor spawns and deadline-guards the run ([`executor`]), the
//! parser classifies the output ([`results`]), and the session records it
//! and notifies ([`session`], [`notifier`]). The command loop
//! ([`commands`]) drives all of it.
//!
//! # Modules
//!
//! - [`types`]: request, result, and classification records
//! - [`config`]: configuration from environment variables
//! - [`error`]: the daemon error taxonomy
//! - [`watcher`]: polling watch registry and background loop
//! - [`events`]: OS file-event backend feeding the same registry
//! - [`gate`]: per-key debounce with timed auto-release
//! - [`executor`]: process execution with two deadline strategies
//! - [`resolver`]: file-to-test-file resolution
//! - [`results`]: result-summary parsing and classification
//! - [`session`]: interactive session state
//! - [`notifier`]: desktop and terminal notification boundary
//! - [`commands`]: the operator command loop

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod notifier;
pub mod resolver;
pub mod results;
pub mod session;
pub mod types;
pub mod watcher;

pub use commands::{parse_command, Command, CommandLoop, TestTrigger};
pub use config::{Config, ConfigError};
pub use error::{DaemonError, Result};
pub use events::{EventError, EventWatcher};
pub use executor::{CommandExecutor, Strategy};
pub use gate::TriggerGate;
pub use notifier::Notifier;
pub use resolver::TestResolver;
pub use results::parse;
pub use session::Session;
pub use types::{Classification, ExecutionRequest, ExecutionResult, RunMode, TestResultRecord};
pub use watcher::{spawn_poll_loop, ChangeHandler, WatchRegistry};
