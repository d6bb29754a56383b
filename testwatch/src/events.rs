//! OS file-event backend for the watch registry.
//!
//! An alternative to the polling loop: the [`notify`] crate delivers file
//! system events which are translated into the same change/delete
//! notifications the polling cycle produces, through
//! [`WatchRegistry::notify_changed`] and
//! [`WatchRegistry::notify_deleted`]. Paths the registry does not track
//! are ignored, so the notification contract is identical to polling.
//!
//! The notify callback is kept lightweight: it only filters events and
//! forwards them through an internal channel to a dedicated async task,
//! which touches the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{
    event::{CreateKind, ModifyKind, RemoveKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::watcher::WatchRegistry;

/// Capacity of the internal event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Errors that can occur while setting up the event backend.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create file-event watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The watch root does not exist or is inaccessible.
    #[error("watch root does not exist: {0}")]
    RootNotFound(PathBuf),
}

/// Internal events from the notify callback, processed by the async task.
#[derive(Debug)]
enum InternalEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// File-event source feeding a [`WatchRegistry`].
///
/// Dropping the source stops the watch subscription.
pub struct EventWatcher {
    /// Kept alive to maintain the subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    root: PathBuf,
}

impl EventWatcher {
    /// Starts watching `root` recursively, forwarding events for
    /// `source_ext` files into the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the root does not exist or the OS watcher
    /// cannot be initialized.
    pub fn new(
        root: PathBuf,
        source_ext: &str,
        registry: Arc<WatchRegistry>,
    ) -> Result<Self, EventError> {
        if !root.exists() {
            return Err(EventError::RootNotFound(root));
        }

        let (internal_tx, internal_rx) = mpsc::channel::<InternalEvent>(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            process_internal_events(internal_rx, registry).await;
        });

        let dot_ext = format!(".{}", source_ext.trim_start_matches('.'));
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                handle_notify_event(res, &dot_ext, &internal_tx);
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        debug!(root = %root.display(), "file-event backend started");

        Ok(Self { watcher, root })
    }

    /// The root directory being watched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Filters a raw notify event and forwards the relevant paths.
///
/// Runs on the notify thread; must not block.
fn handle_notify_event(
    res: Result<Event, notify::Error>,
    dot_ext: &str,
    internal_tx: &mpsc::Sender<InternalEvent>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "file-event watcher error");
            return;
        }
    };

    for path in &event.paths {
        if !relevant_path(path, dot_ext) {
            continue;
        }

        let internal = match event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any) => Some(InternalEvent::Changed(path.clone())),
            EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
                Some(InternalEvent::Removed(path.clone()))
            }
            _ => {
                trace!(kind = ?event.kind, path = %path.display(), "ignoring event kind");
                None
            }
        };

        if let Some(evt) = internal {
            // try_send keeps the notify thread unblocked; a full channel
            // drops the event, which the next poll-style refresh covers.
            if let Err(e) = internal_tx.try_send(evt) {
                warn!(error = %e, "event channel full, dropping event");
            }
        }
    }
}

/// Whether a path carries the watched source extension.
fn relevant_path(path: &Path, dot_ext: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(dot_ext))
        .unwrap_or(false)
}

/// Async task translating internal events into registry notifications.
async fn process_internal_events(
    mut rx: mpsc::Receiver<InternalEvent>,
    registry: Arc<WatchRegistry>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            InternalEvent::Changed(path) => {
                registry.notify_changed(&path);
            }
            InternalEvent::Removed(path) => {
                registry.notify_deleted(&path);
            }
        }
    }

    debug!("file-event processor shutting down");
}
