//! Session state for the testwatch daemon.
//!
//! One [`Session`] lives for the daemon's whole run, owned by the command
//! loop and passed by reference wherever it is needed; there are no
//! ambient globals. Mutation is single-writer: only the command loop's
//! active run records results. Torn down on process exit, never
//! persisted.

use crate::notifier::Notifier;
use crate::types::{RunMode, TestResultRecord};

/// Process-wide interactive session state.
#[derive(Debug, Default)]
pub struct Session {
    last_command: Option<String>,
    last_result: Option<TestResultRecord>,
    run_mode: RunMode,
    currently_testing: Option<String>,
}

impl Session {
    /// Creates a fresh session: no command run yet, default run mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current run mode.
    #[must_use]
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// Flips the run mode and returns the new value.
    pub fn toggle_run_mode(&mut self) -> RunMode {
        self.run_mode = self.run_mode.toggled();
        self.run_mode
    }

    /// The last executed command, if any run happened yet.
    #[must_use]
    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    /// The most recent parsed result, if any.
    #[must_use]
    pub fn last_result(&self) -> Option<&TestResultRecord> {
        self.last_result.as_ref()
    }

    /// What is being tested right now, if anything.
    #[must_use]
    pub fn currently_testing(&self) -> Option<&str> {
        self.currently_testing.as_deref()
    }

    /// Marks a run as active.
    pub fn begin_testing(&mut self, label: &str) {
        self.currently_testing = Some(label.to_string());
    }

    /// Marks the active run as finished.
    pub fn finish_testing(&mut self) {
        self.currently_testing = None;
    }

    /// Stores the command and its parsed result, then invokes the
    /// notifier boundary exactly once.
    pub fn record_result(&mut self, command: &str, result: TestResultRecord, notifier: &Notifier) {
        self.last_command = Some(command.to_string());
        self.last_result = Some(result);
        notifier.notify(&result);
    }

    /// Re-invokes the notifier on the stored result without re-running
    /// anything. Returns `false` when there is nothing stored yet.
    pub fn notify_last(&self, notifier: &Notifier) -> bool {
        match &self.last_result {
            Some(result) => {
                notifier.notify(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> TestResultRecord {
        TestResultRecord {
            tests: 5,
            assertions: 7,
            ..Default::default()
        }
    }

    #[test]
    fn fresh_session_has_no_history() {
        let session = Session::new();
        assert_eq!(session.last_command(), None);
        assert!(session.last_result().is_none());
        assert_eq!(session.run_mode(), RunMode::Default);
        assert_eq!(session.currently_testing(), None);
    }

    #[test]
    fn toggle_flips_and_reports_the_new_mode() {
        let mut session = Session::new();
        assert_eq!(session.toggle_run_mode(), RunMode::AlternateRunner);
        assert_eq!(session.run_mode(), RunMode::AlternateRunner);
        assert_eq!(session.toggle_run_mode(), RunMode::Default);
    }

    #[test]
    fn record_result_stores_command_and_result() {
        let mut session = Session::new();
        session.record_result(
            "ruby -I test a_test.rb",
            sample_result(),
            &Notifier::disabled(),
        );

        assert_eq!(session.last_command(), Some("ruby -I test a_test.rb"));
        assert_eq!(session.last_result(), Some(&sample_result()));
    }

    #[test]
    fn record_result_overwrites_previous_run() {
        let mut session = Session::new();
        let notifier = Notifier::disabled();
        session.record_result("first", sample_result(), &notifier);

        let second = TestResultRecord {
            failures: 1,
            ..sample_result()
        };
        session.record_result("second", second, &notifier);

        assert_eq!(session.last_command(), Some("second"));
        assert_eq!(session.last_result().map(|r| r.failures), Some(1));
    }

    #[test]
    fn notify_last_without_history_reports_nothing() {
        let session = Session::new();
        assert!(!session.notify_last(&Notifier::disabled()));
    }

    #[test]
    fn notify_last_replays_the_stored_result() {
        let mut session = Session::new();
        let notifier = Notifier::disabled();
        session.record_result("cmd", sample_result(), &notifier);
        assert!(session.notify_last(&notifier));
        assert_eq!(
            session.last_command(),
            Some("cmd"),
            "replay does not change history"
        );
    }

    #[test]
    fn testing_marker_tracks_the_active_run() {
        let mut session = Session::new();
        session.begin_testing("lib/a.rb");
        assert_eq!(session.currently_testing(), Some("lib/a.rb"));
        session.finish_testing();
        assert_eq!(session.currently_testing(), None);
    }
}
