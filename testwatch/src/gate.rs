//! Trigger gate for debouncing test runs.
//!
//! File-watch backends can fire several notifications for one logical
//! save. The gate admits at most one run per key at a time: `try_enter`
//! succeeds once, and the key is re-armed by a timer a fixed grace window
//! after admission.
//!
//! The release timer fires regardless of whether the admitted run has
//! finished, so a run that outlives the grace window can be re-triggered
//! while still executing. That timing is deliberate and load-bearing;
//! do not replace the timer with a completion-based release.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::trace;

/// Default grace window before a key is re-armed.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

/// Admits at most one in-flight run per key, with timed auto-release.
///
/// Keys are plain strings (watched paths or resolved test filenames).
/// Cloning shares the underlying in-flight set, so the gate can be handed
/// to watch callbacks and the command loop alike.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    grace: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl TriggerGate {
    /// Creates a gate with the given grace window.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Tries to admit a run for `key`.
    ///
    /// Returns `true` and marks the key in-flight if it is not already;
    /// returns `false` otherwise. On admission an auto-release fires
    /// after the grace window, independent of run completion.
    ///
    /// Must be called from within a Tokio runtime (the auto-release is a
    /// spawned timer task).
    pub fn try_enter(&self, key: &str) -> bool {
        let admitted = lock_set(&self.in_flight).insert(key.to_string());

        if admitted {
            trace!(key, grace_ms = self.grace.as_millis() as u64, "admitted");
            let in_flight = Arc::clone(&self.in_flight);
            let key = key.to_string();
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                lock_set(&in_flight).remove(&key);
                trace!(key = %key, "auto-released");
            });
        } else {
            trace!(key, "suppressed, already in flight");
        }

        admitted
    }

    /// Clears the in-flight flag for `key` immediately.
    ///
    /// Harmless if the auto-release already fired.
    pub fn release(&self, key: &str) {
        lock_set(&self.in_flight).remove(key);
    }

    /// Whether `key` is currently marked in-flight.
    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock_set(&self.in_flight).contains(key)
    }
}

/// Locks the shared set, recovering from a poisoned lock. The set stays
/// usable even if a timer task panicked mid-update.
fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Default for TriggerGate {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn first_entry_is_admitted_second_is_suppressed() {
        let gate = TriggerGate::new(Duration::from_millis(50));
        assert!(gate.try_enter("lib/a.rb"));
        assert!(!gate.try_enter("lib/a.rb"));
        assert!(gate.is_in_flight("lib/a.rb"));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let gate = TriggerGate::new(Duration::from_millis(50));
        assert!(gate.try_enter("lib/a.rb"));
        assert!(gate.try_enter("lib/b.rb"));
    }

    #[tokio::test]
    async fn auto_release_rearms_after_grace_window() {
        let gate = TriggerGate::new(Duration::from_millis(30));
        assert!(gate.try_enter("lib/a.rb"));
        assert!(!gate.try_enter("lib/a.rb"));

        sleep(Duration::from_millis(100)).await;

        assert!(
            gate.try_enter("lib/a.rb"),
            "third attempt after the window is admitted again"
        );
    }

    #[tokio::test]
    async fn auto_release_fires_even_while_run_is_active() {
        // The timer is deliberately independent of run completion; nothing
        // here marks the run finished, yet the key re-arms.
        let gate = TriggerGate::new(Duration::from_millis(30));
        assert!(gate.try_enter("lib/a.rb"));
        sleep(Duration::from_millis(100)).await;
        assert!(!gate.is_in_flight("lib/a.rb"));
    }

    #[tokio::test]
    async fn manual_release_rearms_immediately() {
        let gate = TriggerGate::new(Duration::from_secs(60));
        assert!(gate.try_enter("lib/a.rb"));
        gate.release("lib/a.rb");
        assert!(gate.try_enter("lib/a.rb"));
    }

    #[tokio::test]
    async fn release_of_unknown_key_is_harmless() {
        let gate = TriggerGate::default();
        gate.release("never/entered.rb");
        assert!(!gate.is_in_flight("never/entered.rb"));
    }

    #[tokio::test]
    async fn clones_share_the_in_flight_set() {
        let gate = TriggerGate::new(Duration::from_secs(60));
        let other = gate.clone();
        assert!(gate.try_enter("lib/a.rb"));
        assert!(!other.try_enter("lib/a.rb"));
    }
}
