//! Notification boundary: desktop notifier and terminal status line.
//!
//! The desktop side shells out to the platform notification program
//! (`notify-send` on Linux, `growlnotify` on macOS); the body carries all
//! seven counters and the icon tracks the classification. Failure to
//! invoke the external program is swallowed: notification is best-effort
//! and never fatal. Other platforms skip the desktop side entirely.
//!
//! The terminal side prints a single color-coded status line (green
//! success, yellow partial, red failure) with a local timestamp.

use std::process::Command;

use chrono::Local;
use tracing::debug;

use crate::types::{Classification, TestResultRecord};

const GREEN: &str = "\x1b[01;32m";
const YELLOW: &str = "\x1b[01;33m";
const RED: &str = "\x1b[01;31m";
const RESET: &str = "\x1b[0m";

/// Reports test results to the operator.
#[derive(Debug, Clone)]
pub struct Notifier {
    desktop: bool,
    terminal: bool,
}

impl Notifier {
    /// A notifier with both the desktop and terminal sides active.
    #[must_use]
    pub fn new() -> Self {
        Self {
            desktop: true,
            terminal: true,
        }
    }

    /// A notifier with every side disabled, for tests.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            desktop: false,
            terminal: false,
        }
    }

    /// Reports one result: desktop notification (best effort) followed by
    /// the terminal status line.
    pub fn notify(&self, result: &TestResultRecord) {
        let classification = result.classification();

        if self.desktop {
            send_desktop(result, classification);
        }
        if self.terminal {
            print_terminal(result, classification);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Invokes the platform notification program; failures are logged and
/// swallowed.
fn send_desktop(result: &TestResultRecord, classification: Classification) {
    let Some((program, args)) = desktop_command(result, classification) else {
        return;
    };

    match Command::new(&program).args(&args).status() {
        Ok(status) if status.success() => {}
        Ok(status) => debug!(%program, %status, "desktop notifier exited non-zero"),
        Err(e) => debug!(%program, error = %e, "desktop notifier unavailable"),
    }
}

/// Builds the platform notification invocation, `None` where no desktop
/// notifier is wired up.
#[cfg(target_os = "linux")]
fn desktop_command(
    result: &TestResultRecord,
    classification: Classification,
) -> Option<(String, Vec<String>)> {
    let timestamp = Local::now().format("%T");
    Some((
        "notify-send".to_string(),
        vec![
            "--hint".to_string(),
            "int:transient:1".to_string(),
            "-i".to_string(),
            icon_for(classification).to_string(),
            format!("Testing results [{timestamp}]"),
            body(result),
        ],
    ))
}

#[cfg(target_os = "macos")]
fn desktop_command(
    result: &TestResultRecord,
    classification: Classification,
) -> Option<(String, Vec<String>)> {
    Some((
        "growlnotify".to_string(),
        vec![
            "--image".to_string(),
            format!("{}.png", icon_for(classification)),
            "-m".to_string(),
            format!("Testing results [{} secs]", result.elapsed_secs),
            body(result),
        ],
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn desktop_command(
    _result: &TestResultRecord,
    _classification: Classification,
) -> Option<(String, Vec<String>)> {
    None
}

/// The notification icon for a classification.
fn icon_for(classification: Classification) -> &'static str {
    match classification {
        Classification::Success => "gtk-ok",
        Classification::PartialSuccess => "gtk-preferences",
        Classification::Failure => "gtk-cancel",
    }
}

/// The notification body, carrying all seven counters.
fn body(result: &TestResultRecord) -> String {
    format!(
        "{} tests, {} assertions, {} failures, {} errors\n\
         {} pendings, {} omissions, {} notifications",
        result.tests,
        result.assertions,
        result.failures,
        result.errors,
        result.pendings,
        result.omissions,
        result.notifications
    )
}

/// Prints the color-coded status line.
fn print_terminal(result: &TestResultRecord, classification: Classification) {
    let banner = match classification {
        Classification::PartialSuccess => format!("{YELLOW} Partial success !! {RESET}"),
        Classification::Success => format!("{GREEN} Success !! {RESET}"),
        Classification::Failure => format!("{RED} Error !! {RESET}"),
    };
    println!("\n{banner}[{}] {result}", Local::now().format("%T"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(failures: u64, pendings: u64) -> TestResultRecord {
        TestResultRecord {
            tests: 5,
            assertions: 7,
            failures,
            pendings,
            elapsed_secs: 0.42,
            ..Default::default()
        }
    }

    #[test]
    fn icons_track_classification() {
        assert_eq!(icon_for(Classification::Success), "gtk-ok");
        assert_eq!(icon_for(Classification::PartialSuccess), "gtk-preferences");
        assert_eq!(icon_for(Classification::Failure), "gtk-cancel");
    }

    #[test]
    fn body_carries_all_seven_counters() {
        let text = body(&TestResultRecord {
            tests: 1,
            assertions: 2,
            failures: 3,
            errors: 4,
            pendings: 5,
            omissions: 6,
            notifications: 7,
            elapsed_secs: 0.0,
        });
        assert!(text.contains("1 tests"));
        assert!(text.contains("2 assertions"));
        assert!(text.contains("3 failures"));
        assert!(text.contains("4 errors"));
        assert!(text.contains("5 pendings"));
        assert!(text.contains("6 omissions"));
        assert!(text.contains("7 notifications"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_invocation_uses_notify_send_with_icon() {
        let (program, args) = desktop_command(&record(0, 0), Classification::Success)
            .expect("linux has a desktop notifier");
        assert_eq!(program, "notify-send");
        assert!(args.contains(&"gtk-ok".to_string()));
        assert!(args.iter().any(|a| a.contains("5 tests")));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn macos_invocation_uses_growlnotify_with_image() {
        let (program, args) = desktop_command(&record(0, 0), Classification::Failure)
            .expect("macos has a desktop notifier");
        assert_eq!(program, "growlnotify");
        assert!(args.contains(&"gtk-cancel.png".to_string()));
    }

    #[test]
    fn disabled_notifier_is_silent() {
        // Smoke test: must not shell out or print.
        Notifier::disabled().notify(&record(1, 0));
    }
}
