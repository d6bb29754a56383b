//! Testwatch - interactive file-watch test runner.
//!
//! This binary watches a source tree and runs the matching tests whenever
//! a file changes, while taking line-oriented commands on stdin.
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use testwatch::commands::CommandLoop;
use testwatch::config::Config;
use testwatch::executor::Strategy;

/// Testwatch - interactive file-watch test runner.
///
/// Watches a source tree, resolves changed files to their test files,
/// runs them, and reports the classified result.
#[derive(Parser, Debug)]
#[command(name = "testwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TESTWATCH_ROOT              Source tree to watch (default: current dir)
    TESTWATCH_POLL_INTERVAL_MS  Watch poll cadence (default: 500)
    TESTWATCH_GRACE_SECS        Debounce auto-release window (default: 1)
    TESTWATCH_DEADLINE_SECS     Per-run deadline, 0 disables (default: 120)
    TESTWATCH_SOURCE_EXT        Source file extension (default: rb)
    TESTWATCH_TEST_SUFFIX       Test filename suffix (default: _test)
    TESTWATCH_STRATEGY          cooperative | threaded (default: cooperative)
    TESTWATCH_USE_FS_EVENTS     OS file events instead of polling (default: false)
    TESTWATCH_RUNNER_PREFIX     Prefix for every command (default: bundle exec)

COMMANDS (typed at the prompt):
    help, show, rails|r, refresh|ref, all|a, last|l, notify|n,
    or any file name to test it.
")]
struct Cli {
    /// Source tree to watch (overrides TESTWATCH_ROOT).
    #[arg(long)]
    root: Option<PathBuf>,

    /// Execution strategy: cooperative or threaded.
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Use OS file events instead of the polling loop.
    #[arg(long)]
    fs_events: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run_daemon(cli))
}

/// Runs the daemon until stdin closes, a shutdown signal arrives, or the
/// liveness guarantee breaks.
async fn run_daemon(cli: Cli) -> Result<()> {
    init_logging();

    info!("Starting testwatch");

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    if cli.fs_events {
        config.use_fs_events = true;
    }

    info!(
        root = %config.root.display(),
        strategy = ?config.strategy,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        deadline_secs = config.deadline_secs,
        "Configuration loaded"
    );

    let command_loop = CommandLoop::new(config);

    tokio::select! {
        result = command_loop.run() => {
            result.context("command loop failed")?;
        }
        () = wait_for_shutdown() => {
            info!("Shutdown signal received");
        }
    }

    info!("Testwatch stopped");
    Ok(())
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr: stdout belongs to the streamed test output and the
/// operator prompt.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    debug!("shutdown signal handled");
}
