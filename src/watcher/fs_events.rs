//! Optional file-system wake-up for the poll loop.
//!
//! Uses the `notify` crate to watch the message directory. A create or
//! modify event on a message file wakes the sleeping poll loop so the next
//! scan runs immediately instead of at the next tick. The scan remains the
//! only source of truth; a missed or spurious event only changes latency.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::watcher::scanner::MESSAGE_EXTENSION;
use crate::{AppError, Result};

/// Keeps the OS watch alive; dropping it stops wake-ups.
pub struct DirectoryWake {
    _watcher: RecommendedWatcher,
}

impl DirectoryWake {
    /// Watch `dir` and signal `wake` on message-file events.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the `notify` watcher cannot be created or
    /// cannot watch `dir`.
    pub fn start(dir: &Path, wake: Arc<Notify>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_message_event(&event) => {
                    debug!(paths = ?event.paths, "file-system event, waking poll loop");
                    wake.notify_one();
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "file watcher error"),
            },
        )
        .map_err(|err| AppError::Io(format!("failed to create watcher: {err}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| AppError::Io(format!("failed to watch directory: {err}")))?;

        Ok(Self { _watcher: watcher })
    }
}

/// Whether a notify event may have produced a new message file.
fn is_message_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == MESSAGE_EXTENSION))
}
