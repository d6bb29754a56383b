//! Polling watch registry for the testwatch daemon.
//!
//! The registry tracks a set of watched paths with their last observed
//! modification times and the handlers interested in each. A background
//! loop calls [`WatchRegistry::poll_once`] on a fixed sub-second cadence;
//! every path whose current modification time differs from the stored one
//! produces a change notification for each of its handlers, after which
//! the stored time is updated so the same physical change never notifies
//! twice. Detection therefore lags a real change by at most one poll
//! interval.
//!
//! A path that can no longer be stat'ed produces a delete notification
//! and is dropped, then immediately re-tried once: some editors replace a
//! file by deleting and recreating it, and the rebind picks the new inode
//! up. Stat errors are non-fatal and only ever drop the single path
//! concerned.
//!
//! The registry's map is the only state shared between the poll loop and
//! the command loop and sits behind a mutex; the poll loop writes, the
//! command loop reads and adds during refresh. An OS file-event backend
//! (see [`crate::events`]) can feed the same registry through
//! [`WatchRegistry::notify_changed`] / [`WatchRegistry::notify_deleted`]
//! with the identical notification contract.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{DaemonError, Result};

/// Capability interface for parties interested in a watched path.
///
/// Handlers must be cheap and non-blocking; the well-known implementation
/// forwards the path into a channel for the command loop to act on.
pub trait ChangeHandler: Send + Sync {
    /// The watched file's modification time changed.
    fn on_file_changed(&self, path: &Path);

    /// The watched file could no longer be stat'ed.
    fn on_file_deleted(&self, path: &Path);
}

/// A tracked path: last observed mtime plus its interested handlers.
struct WatchedFile {
    mtime: SystemTime,
    watchers: Vec<Arc<dyn ChangeHandler>>,
}

/// What a poll cycle decided to tell the handlers, dispatched after the
/// registry lock is released.
enum Notification {
    Changed(PathBuf, Vec<Arc<dyn ChangeHandler>>),
    Deleted(PathBuf, Vec<Arc<dyn ChangeHandler>>),
}

/// Registry of watched paths, shared between the poll loop and the
/// command loop.
#[derive(Default)]
pub struct WatchRegistry {
    entries: Mutex<HashMap<PathBuf, WatchedFile>>,
}

impl WatchRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a path, capturing the current modification
    /// time.
    ///
    /// Re-registration of the same `(path, handler)` pair is a no-op that
    /// refreshes the stored time.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::WatchStat`] when the path cannot be
    /// stat'ed; callers log and skip that path.
    pub fn watch(&self, path: &Path, watcher: Arc<dyn ChangeHandler>) -> Result<()> {
        let mtime = stat_mtime(path).ok_or_else(|| DaemonError::WatchStat {
            path: path.to_path_buf(),
        })?;

        let mut entries = lock_entries(&self.entries);
        match entries.get_mut(path) {
            Some(entry) => {
                entry.mtime = mtime;
                if !entry
                    .watchers
                    .iter()
                    .any(|existing| Arc::ptr_eq(existing, &watcher))
                {
                    entry.watchers.push(watcher);
                }
            }
            None => {
                trace!(path = %path.display(), "watching");
                entries.insert(
                    path.to_path_buf(),
                    WatchedFile {
                        mtime,
                        watchers: vec![watcher],
                    },
                );
            }
        }
        Ok(())
    }

    /// Removes all handlers for a path and stops tracking it.
    pub fn unwatch(&self, path: &Path) {
        lock_entries(&self.entries).remove(path);
    }

    /// Whether a path is currently tracked.
    #[must_use]
    pub fn is_watched(&self, path: &Path) -> bool {
        lock_entries(&self.entries).contains_key(path)
    }

    /// Number of tracked paths.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    /// Number of handlers registered for a path.
    #[must_use]
    pub fn watcher_count(&self, path: &Path) -> usize {
        lock_entries(&self.entries)
            .get(path)
            .map(|entry| entry.watchers.len())
            .unwrap_or(0)
    }

    /// Runs one detection cycle over every tracked path.
    ///
    /// Returns the number of notifications delivered.
    pub fn poll_once(&self) -> usize {
        let notifications = {
            let mut entries = lock_entries(&self.entries);
            let mut pending = Vec::new();
            let paths: Vec<PathBuf> = entries.keys().cloned().collect();

            for path in paths {
                match stat_mtime(&path) {
                    Some(current) => {
                        if let Some(entry) = entries.get_mut(&path) {
                            if entry.mtime != current {
                                entry.mtime = current;
                                pending.push(Notification::Changed(
                                    path.clone(),
                                    entry.watchers.clone(),
                                ));
                            }
                        }
                    }
                    None => {
                        if let Some(removed) = entries.remove(&path) {
                            warn!(path = %path.display(), "watched path vanished");
                            // Editors often delete-then-recreate; rebind if
                            // the path is already back.
                            if let Some(mtime) = stat_mtime(&path) {
                                debug!(path = %path.display(), "rebinding recreated file");
                                entries.insert(
                                    path.clone(),
                                    WatchedFile {
                                        mtime,
                                        watchers: removed.watchers.clone(),
                                    },
                                );
                            }
                            pending.push(Notification::Deleted(path, removed.watchers));
                        }
                    }
                }
            }
            pending
        };

        dispatch(notifications)
    }

    /// Delivers a change notification for a tracked path, refreshing its
    /// stored time. Used by the OS file-event backend; untracked paths
    /// are ignored, preserving the polling contract.
    pub fn notify_changed(&self, path: &Path) -> usize {
        let notification = {
            let mut entries = lock_entries(&self.entries);
            match entries.get_mut(path) {
                Some(entry) => match stat_mtime(path) {
                    Some(current) => {
                        entry.mtime = current;
                        Some(Notification::Changed(
                            path.to_path_buf(),
                            entry.watchers.clone(),
                        ))
                    }
                    // Changed and already gone again; treat as deleted.
                    None => entries
                        .remove(path)
                        .map(|removed| Notification::Deleted(path.to_path_buf(), removed.watchers)),
                },
                None => None,
            }
        };

        dispatch(notification)
    }

    /// Delivers a delete notification for a tracked path, with the same
    /// drop-and-rebind behavior as the poll cycle.
    pub fn notify_deleted(&self, path: &Path) -> usize {
        let notification = {
            let mut entries = lock_entries(&self.entries);
            entries.remove(path).map(|removed| {
                if let Some(mtime) = stat_mtime(path) {
                    debug!(path = %path.display(), "rebinding recreated file");
                    entries.insert(
                        path.to_path_buf(),
                        WatchedFile {
                            mtime,
                            watchers: removed.watchers.clone(),
                        },
                    );
                }
                Notification::Deleted(path.to_path_buf(), removed.watchers)
            })
        };

        dispatch(notification)
    }
}

/// Spawns the background poll loop.
///
/// The returned handle doubles as the liveness probe: the command loop
/// checks it before every run and treats a finished handle as
/// [`DaemonError::ReactorStopped`].
pub fn spawn_poll_loop(registry: Arc<WatchRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "poll loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.poll_once();
        }
    })
}

/// Calls the handlers for a batch of notifications, outside the registry
/// lock.
fn dispatch(notifications: impl IntoIterator<Item = Notification>) -> usize {
    let mut delivered = 0;
    for notification in notifications {
        match notification {
            Notification::Changed(path, watchers) => {
                for watcher in watchers {
                    watcher.on_file_changed(&path);
                    delivered += 1;
                }
            }
            Notification::Deleted(path, watchers) => {
                for watcher in watchers {
                    watcher.on_file_deleted(&path);
                    delivered += 1;
                }
            }
        }
    }
    delivered
}

/// Stats a path's modification time, `None` on any error.
fn stat_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Locks the entry map, recovering from a poisoned lock.
fn lock_entries(
    entries: &Mutex<HashMap<PathBuf, WatchedFile>>,
) -> MutexGuard<'_, HashMap<PathBuf, WatchedFile>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        changed: Mutex<Vec<PathBuf>>,
        deleted: Mutex<Vec<PathBuf>>,
    }

    impl Recorder {
        fn changed_paths(&self) -> Vec<PathBuf> {
            self.changed.lock().unwrap().clone()
        }

        fn deleted_paths(&self) -> Vec<PathBuf> {
            self.deleted.lock().unwrap().clone()
        }
    }

    impl ChangeHandler for Recorder {
        fn on_file_changed(&self, path: &Path) {
            self.changed.lock().unwrap().push(path.to_path_buf());
        }

        fn on_file_deleted(&self, path: &Path) {
            self.deleted.lock().unwrap().push(path.to_path_buf());
        }
    }

    fn touch(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).expect("create file");
        file.write_all(content.as_bytes()).expect("write content");
        path
    }

    /// Rewrites a file after a short pause so the mtime visibly moves.
    fn modify(path: &Path, content: &str) {
        std::thread::sleep(Duration::from_millis(30));
        fs::write(path, content).expect("rewrite file");
    }

    #[test]
    fn watch_tracks_and_is_idempotent_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "x");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());

        registry.watch(&path, recorder.clone()).unwrap();
        registry.watch(&path, recorder.clone()).unwrap();

        assert!(registry.is_watched(&path));
        assert_eq!(registry.watched_count(), 1);
        assert_eq!(registry.watcher_count(&path), 1, "same pair not duplicated");
    }

    #[test]
    fn distinct_handlers_stack_on_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "x");
        let registry = WatchRegistry::new();

        registry.watch(&path, Arc::new(Recorder::default())).unwrap();
        registry.watch(&path, Arc::new(Recorder::default())).unwrap();

        assert_eq!(registry.watcher_count(&path), 2);
    }

    #[test]
    fn watching_a_missing_path_is_a_stat_error() {
        let registry = WatchRegistry::new();
        let err = registry
            .watch(Path::new("/nonexistent/a.rb"), Arc::new(Recorder::default()))
            .unwrap_err();
        assert!(matches!(err, DaemonError::WatchStat { .. }));
    }

    #[test]
    fn poll_detects_a_modification_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "v1");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.watch(&path, recorder.clone()).unwrap();

        assert_eq!(registry.poll_once(), 0, "no change yet");

        modify(&path, "v2");
        assert_eq!(registry.poll_once(), 1);
        assert_eq!(recorder.changed_paths(), vec![path.clone()]);

        assert_eq!(
            registry.poll_once(),
            0,
            "stored time updated, same change never re-notifies"
        );
    }

    #[test]
    fn every_handler_for_a_path_is_notified() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "v1");
        let registry = WatchRegistry::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        registry.watch(&path, first.clone()).unwrap();
        registry.watch(&path, second.clone()).unwrap();

        modify(&path, "v2");
        assert_eq!(registry.poll_once(), 2);
        assert_eq!(first.changed_paths().len(), 1);
        assert_eq!(second.changed_paths().len(), 1);
    }

    #[test]
    fn deletion_notifies_and_drops_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "v1");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.watch(&path, recorder.clone()).unwrap();

        fs::remove_file(&path).unwrap();
        assert_eq!(registry.poll_once(), 1);
        assert_eq!(recorder.deleted_paths(), vec![path.clone()]);
        assert!(!registry.is_watched(&path), "vanished path is dropped");
    }

    #[test]
    fn other_paths_survive_one_paths_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let gone = touch(&dir, "gone.rb", "x");
        let kept = touch(&dir, "kept.rb", "x");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.watch(&gone, recorder.clone()).unwrap();
        registry.watch(&kept, recorder.clone()).unwrap();

        fs::remove_file(&gone).unwrap();
        registry.poll_once();

        assert!(!registry.is_watched(&gone));
        assert!(registry.is_watched(&kept));
    }

    #[test]
    fn replaced_file_reports_a_change() {
        // Delete-then-recreate completed between polls looks like a
        // modification, which is exactly what should trigger a run.
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "v1");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.watch(&path, recorder.clone()).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        fs::remove_file(&path).unwrap();
        touch(&dir, "a.rb", "v2");

        registry.poll_once();
        assert_eq!(recorder.changed_paths(), vec![path.clone()]);
        assert!(registry.is_watched(&path));
    }

    #[test]
    fn notify_deleted_rebinds_a_recreated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "v2");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.watch(&path, recorder.clone()).unwrap();

        // The file still exists when the delete event arrives, so the
        // registry re-arms it with its watchers intact.
        assert_eq!(registry.notify_deleted(&path), 1);
        assert_eq!(recorder.deleted_paths(), vec![path.clone()]);
        assert!(registry.is_watched(&path));
        assert_eq!(registry.watcher_count(&path), 1);
    }

    #[test]
    fn notify_changed_ignores_untracked_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "x");
        let registry = WatchRegistry::new();
        assert_eq!(registry.notify_changed(&path), 0);
    }

    #[test]
    fn notify_changed_delivers_for_tracked_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "x");
        let registry = WatchRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.watch(&path, recorder.clone()).unwrap();

        assert_eq!(registry.notify_changed(&path), 1);
        assert_eq!(recorder.changed_paths(), vec![path]);
    }

    #[test]
    fn unwatch_stops_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "x");
        let registry = WatchRegistry::new();
        registry.watch(&path, Arc::new(Recorder::default())).unwrap();

        registry.unwatch(&path);
        assert!(!registry.is_watched(&path));

        modify(&path, "v2");
        assert_eq!(registry.poll_once(), 0);
    }

    #[tokio::test]
    async fn poll_loop_detects_changes_in_the_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(&dir, "a.rb", "v1");
        let registry = Arc::new(WatchRegistry::new());
        let recorder = Arc::new(Recorder::default());
        registry.watch(&path, recorder.clone()).unwrap();

        let handle = spawn_poll_loop(Arc::clone(&registry), Duration::from_millis(20));

        modify(&path, "v2");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!handle.is_finished(), "loop keeps running");
        assert_eq!(recorder.changed_paths(), vec![path]);
        handle.abort();
    }
}
