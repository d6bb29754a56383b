//! Interactive command loop for the testwatch daemon.
//!
//! Reads newline-terminated operator commands from standard input and
//! drives the rest of the pipeline. Recognized words, checked
//! case-insensitively in fixed priority order (first match wins):
//! `help`, `show`, `rails`/`r`, `refresh`/`ref`, `all`/`a`, `last`/`l`,
//! `notify`/`n`; any other input is treated as a filename, with the
//! source extension appended when missing.
//!
//! The loop is a two-state machine: `Idle` while waiting for input or
//! watch triggers, `Testing` while a run executes. Watch triggers arrive
//! through a channel fed by the registry's handlers and are debounced by
//! the trigger gate. Every per-run error is converted to a one-line
//! message and the prompt is re-printed; only a dead poll loop
//! terminates the session.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{DaemonError, Result};
use crate::events::EventWatcher;
use crate::executor::CommandExecutor;
use crate::gate::TriggerGate;
use crate::notifier::Notifier;
use crate::resolver::TestResolver;
use crate::results;
use crate::session::Session;
use crate::types::{ExecutionRequest, RunMode};
use crate::watcher::{spawn_poll_loop, ChangeHandler, WatchRegistry};

/// Capacity of the watch-trigger channel.
const TRIGGER_CHANNEL_CAPACITY: usize = 256;

/// Operator prompt, bold white like the rest of the status output.
const PROMPT: &str = "\n\x1b[01;37mWatching files. Enter command: \x1b[00m";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the command list.
    Help,
    /// Print the current run mode.
    Show,
    /// Toggle the alternate-runner mode.
    ToggleRunMode,
    /// Re-scan the watch list.
    Refresh,
    /// Run the whole suite.
    RunAll,
    /// Re-run the last command.
    RunLast,
    /// Re-show the last result without running anything.
    NotifyLast,
    /// Anything else: a file to test.
    TestFile(String),
}

/// Parses one operator line, checking the recognized words in priority
/// order.
#[must_use]
pub fn parse_command(line: &str) -> Command {
    if has_word(line, &["help"]) {
        Command::Help
    } else if has_word(line, &["show"]) {
        Command::Show
    } else if has_word(line, &["rails", "r"]) {
        Command::ToggleRunMode
    } else if has_word(line, &["refresh", "ref"]) {
        Command::Refresh
    } else if has_word(line, &["all", "a"]) {
        Command::RunAll
    } else if has_word(line, &["last", "l"]) {
        Command::RunLast
    } else if has_word(line, &["notify", "n"]) {
        Command::NotifyLast
    } else {
        Command::TestFile(line.trim().to_string())
    }
}

/// Case-insensitive word match: the line contains one of `words` as a
/// whole token, where tokens are runs of alphanumerics and underscores.
fn has_word(line: &str, words: &[&str]) -> bool {
    line.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .any(|token| words.iter().any(|word| token.eq_ignore_ascii_case(word)))
}

/// The command loop's two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Testing,
}

/// One resolved turn of the event loop: operator input or a watch
/// trigger.
enum Turn {
    Line(std::io::Result<Option<String>>),
    Trigger(Option<PathBuf>),
}

/// Watch handler that forwards changed paths into the trigger channel.
///
/// Kept deliberately tiny: resolution and execution happen on the
/// command loop, serialized with operator input.
pub struct TestTrigger {
    tx: mpsc::Sender<PathBuf>,
}

impl TestTrigger {
    /// Creates a trigger feeding the given channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<PathBuf>) -> Self {
        Self { tx }
    }
}

impl ChangeHandler for TestTrigger {
    fn on_file_changed(&self, path: &Path) {
        // A full channel drops the trigger; the next change re-fires.
        let _ = self.tx.try_send(path.to_path_buf());
    }

    fn on_file_deleted(&self, path: &Path) {
        // Deletions fire a run too: the matching test should now fail.
        let _ = self.tx.try_send(path.to_path_buf());
    }
}

/// The interactive front end driving the whole pipeline.
pub struct CommandLoop {
    config: Config,
    registry: Arc<WatchRegistry>,
    gate: TriggerGate,
    executor: CommandExecutor,
    resolver: TestResolver,
    notifier: Notifier,
    session: Session,
    trigger: Arc<TestTrigger>,
    trigger_rx: mpsc::Receiver<PathBuf>,
    poll_handle: JoinHandle<()>,
    /// Kept alive for the subscription when OS file events are enabled.
    #[allow(dead_code)]
    event_backend: Option<EventWatcher>,
    state: LoopState,
}

impl CommandLoop {
    /// Wires up the pipeline and starts the background poll loop.
    ///
    /// Must be called from within a Tokio runtime. When OS file events
    /// are enabled and the backend fails to start, the daemon falls back
    /// to polling alone.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(WatchRegistry::new());
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let trigger = Arc::new(TestTrigger::new(trigger_tx));

        let event_backend = if config.use_fs_events {
            match EventWatcher::new(config.root.clone(), &config.source_ext, Arc::clone(&registry))
            {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!(error = %e, "file-event backend unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };

        // The poll loop always runs; with the event backend active it
        // doubles as a catch-all for missed events, and the registry's
        // stored mtimes keep the two from double-firing.
        let poll_handle = spawn_poll_loop(Arc::clone(&registry), config.poll_interval);

        Self {
            gate: TriggerGate::new(config.grace),
            executor: CommandExecutor::new(config.strategy, config.runner_prefix.clone()),
            resolver: TestResolver::new(
                config.root.clone(),
                config.source_ext.clone(),
                config.test_suffix.clone(),
            ),
            notifier: Notifier::new(),
            session: Session::new(),
            registry,
            trigger,
            trigger_rx,
            poll_handle,
            event_backend,
            config,
            state: LoopState::Idle,
        }
    }

    /// Runs the interactive session until stdin closes or a fatal error
    /// breaks the liveness guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::ReactorStopped`] when the background poll
    /// loop has died; per-run errors never escape.
    pub async fn run(mut self) -> Result<()> {
        println!("\n  Watching files under {}", self.config.root.display());
        self.refresh_watch_list();
        self.print_prompt();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            // Resolve the select to a value first so the borrow on the
            // trigger channel ends before any handler touches `self`.
            let turn = tokio::select! {
                line = lines.next_line() => Turn::Line(line),
                path = self.trigger_rx.recv() => Turn::Trigger(path),
            };

            match turn {
                Turn::Line(Ok(Some(line))) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        self.handle_command(&line).await?;
                    }
                    self.print_prompt();
                }
                Turn::Line(Ok(None)) => {
                    debug!("stdin closed, leaving command loop");
                    break;
                }
                Turn::Line(Err(e)) => {
                    warn!(error = %e, "error reading operator input");
                    break;
                }
                Turn::Trigger(Some(path)) => {
                    debug!(path = %path.display(), "watch trigger");
                    self.test_file(&path).await?;
                    self.print_prompt();
                }
                Turn::Trigger(None) => {
                    debug!("trigger channel closed, leaving command loop");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Dispatches one parsed operator command.
    async fn handle_command(&mut self, line: &str) -> Result<()> {
        match parse_command(line) {
            Command::Help => {
                self.print_help();
                Ok(())
            }
            Command::Show => {
                println!("Alternate runner = {}", self.session.run_mode());
                Ok(())
            }
            Command::ToggleRunMode => {
                let mode = self.session.toggle_run_mode();
                println!("Changed alternate runner to {mode}");
                Ok(())
            }
            Command::Refresh => {
                self.refresh_watch_list();
                Ok(())
            }
            Command::RunAll => self.run_all().await,
            Command::RunLast => self.run_last().await,
            Command::NotifyLast => {
                if !self.session.notify_last(&self.notifier) {
                    println!("\n  No results yet...\n");
                }
                Ok(())
            }
            Command::TestFile(name) => {
                let named = self.resolver.ensure_source_ext(&name);
                self.test_file(Path::new(&named)).await
            }
        }
    }

    /// Runs the whole suite with the command for the current run mode.
    ///
    /// Suite runs are deliberately deadline-free: the operator asked for
    /// them and expects them to take a while.
    async fn run_all(&mut self) -> Result<()> {
        println!("\nRunning all tests...");
        let command = match self.session.run_mode() {
            RunMode::AlternateRunner => self.config.all_cmd_alt.clone(),
            RunMode::Default => self.config.all_cmd.clone(),
        };
        println!("Command: {command}");
        self.execute_and_record(&command, None).await
    }

    /// Re-executes the last command, if any run happened yet.
    async fn run_last(&mut self) -> Result<()> {
        let Some(command) = self.session.last_command().map(str::to_string) else {
            println!("\n  No test run yet...\n");
            return Ok(());
        };

        println!("Running last test...");
        println!("Command: {command}");
        let deadline = self.deadline_for(&command);
        self.execute_and_record(&command, deadline).await
    }

    /// Tests a changed or operator-named file: debounce, resolve, run.
    async fn test_file(&mut self, file: &Path) -> Result<()> {
        let key = file.to_string_lossy().into_owned();
        if !self.gate.try_enter(&key) {
            debug!(key = %key, "suppressed, already being tested");
            return Ok(());
        }

        println!("Testing file: {}...", file.display());
        self.refresh_watch_list();

        match self.resolver.resolve(file) {
            Ok(test_files) => {
                if self.resolver.is_test_file(file) {
                    println!("Already a test file !");
                } else {
                    println!("Running these files: {test_files:?}");
                }
                for test_file in test_files {
                    self.run_test_file(&test_file).await?;
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                println!("\n  {e}\n");
                Ok(())
            }
        }
    }

    /// Runs one resolved test file under the configured deadline.
    async fn run_test_file(&mut self, path: &Path) -> Result<()> {
        println!("Running {}...", path.display());
        let command = self.config.file_command(&path.to_string_lossy());
        println!("Command: {command}");
        self.execute_and_record(&command, self.config.deadline())
            .await
    }

    /// Executes a command, parses its output, and records the result.
    ///
    /// Per-run errors are printed and survived; a timed-out run keeps its
    /// partial output, which is still parsed and recorded.
    async fn execute_and_record(
        &mut self,
        command: &str,
        deadline: Option<Duration>,
    ) -> Result<()> {
        if self.poll_handle.is_finished() {
            return Err(DaemonError::ReactorStopped);
        }

        self.state = LoopState::Testing;
        self.session.begin_testing(command);

        let request = ExecutionRequest::new(command, deadline);
        let outcome = self.executor.execute(&request).await;

        self.state = LoopState::Idle;
        self.session.finish_testing();

        match outcome {
            Ok(result) => {
                let record = results::parse(&result.raw_output);
                self.session.record_result(command, record, &self.notifier);
                Ok(())
            }
            Err(DaemonError::Timeout {
                deadline_secs,
                partial,
            }) => {
                println!("\n  Run timed out after {deadline_secs}s; keeping partial output.\n");
                let record = results::parse(&partial.raw_output);
                self.session.record_result(command, record, &self.notifier);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                println!("\n  {e}\n");
                Ok(())
            }
        }
    }

    /// Suite commands re-run deadline-free; everything else gets the
    /// configured deadline.
    fn deadline_for(&self, command: &str) -> Option<Duration> {
        if command == self.config.all_cmd || command == self.config.all_cmd_alt {
            None
        } else {
            self.config.deadline()
        }
    }

    /// Re-scans the tree and watches every source file, printing newly
    /// added paths like the initial scan does.
    fn refresh_watch_list(&self) {
        println!("Refreshing file list...");
        for file in self.resolver.source_files() {
            let known = self.registry.is_watched(&file);
            let handler: Arc<dyn ChangeHandler> = self.trigger.clone();
            match self.registry.watch(&file, handler) {
                Ok(()) => {
                    if !known {
                        print!("{}...", file.display());
                    }
                }
                Err(e) => {
                    println!("Not watching {}... ({e})", file.display());
                }
            }
        }
        println!();
        let _ = std::io::stdout().flush();
    }

    fn print_prompt(&self) {
        print!("{PROMPT}");
        let _ = std::io::stdout().flush();
    }

    fn print_help(&self) {
        println!(
            "Available commands:
    'rails' or 'r'      toggle the alternate runner for suite runs.
    'refresh' or 'ref'  refresh the watch file list.
    'show'              show the current run mode.
    'all' or 'a'        run all tests now.
    'last' or 'l'       run the last test again.
    'notify' or 'n'     show the last test results.
    anything else       treated as a file name to test."
        );
    }
}
