//! The poll loop: scan, dedup, filter, dispatch, sleep.
//!
//! A [`Watcher`] moves through `Created → Running → Stopping → Stopped`
//! exactly once. Handlers are registered while `Created`; [`Watcher::run`]
//! seeds the seen-set with every message already present and then polls
//! until [`Watcher::request_stop`] is called from any thread or task.
//!
//! The loop only suspends in the end-of-cycle sleep. A stop request wakes
//! that sleep immediately; a stop requested mid-dispatch takes effect once
//! the current batch has been handed to every handler.
//!
//! Startup seeding and every poll cycle run on the blocking pool through
//! `spawn_blocking`, so directory reads and slow handlers never hold up
//! other tasks on the async runtime.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::WatcherConfig;
use crate::models::{FilterCriteria, Message};
use crate::watcher::filter;
use crate::watcher::fs_events::DirectoryWake;
use crate::watcher::handlers::{FnHandler, HandlerRegistry, MessageHandler};
use crate::watcher::scanner;
use crate::watcher::seen::SeenSet;
use crate::{AppError, Result};

/// Consecutive scan failures after which failures are logged as errors.
pub const SCAN_FAILURE_ESCALATION: usize = 3;

/// Lifecycle state of a [`Watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Constructed; handlers may be registered.
    Created,
    /// Poll loop active.
    Running,
    /// Stop requested; the loop is finishing its current step.
    Stopping,
    /// Loop finished. The instance cannot be started again.
    Stopped,
}

impl Display for WatcherState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Poll cycles started.
    pub cycles: usize,
    /// Messages handed to the handler registry.
    pub dispatched: usize,
    /// New messages rejected by the filter.
    pub filtered_out: usize,
    /// Parse failures, counted per attempt.
    pub malformed: usize,
    /// Cycles whose directory listing failed.
    pub scan_failures: usize,
    /// Individual handler invocations that failed.
    pub handler_failures: usize,
    /// Malformed files still present and awaiting a retry, as of the last
    /// completed scan.
    pub pending_malformed: usize,
}

/// Watches one directory and dispatches new, matching messages.
pub struct Watcher {
    path: PathBuf,
    poll_interval: Duration,
    fs_events: bool,
    criteria: RwLock<FilterCriteria>,
    handlers: Mutex<HandlerRegistry>,
    seen: SeenSet,
    state: Mutex<WatcherState>,
    stats: Mutex<WatcherStats>,
    cancel: CancellationToken,
}

/// Per-run bookkeeping that never leaves the loop.
#[derive(Default)]
struct LoopState {
    consecutive_scan_failures: usize,
    reported_malformed: HashSet<String>,
}

impl Watcher {
    /// Build a watcher from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the poll interval is not positive or the
    /// watched path is missing or not a directory.
    pub fn new(config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            poll_interval: config.poll_interval(),
            path: config.path,
            fs_events: config.fs_events,
            criteria: RwLock::new(config.filter),
            handlers: Mutex::new(HandlerRegistry::new()),
            seen: SeenSet::new(),
            state: Mutex::new(WatcherState::Created),
            stats: Mutex::new(WatcherStats::default()),
            cancel: CancellationToken::new(),
        })
    }

    /// Watched directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time slept between poll cycles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WatcherState {
        *self.lock_state()
    }

    /// Number of identities recorded as seen.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Snapshot of the run counters.
    #[must_use]
    pub fn stats(&self) -> WatcherStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently attached filter criteria.
    #[must_use]
    pub fn filter(&self) -> FilterCriteria {
        self.criteria
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the filter criteria. Takes effect at the next poll cycle.
    ///
    /// Messages already seen stay seen and never dispatch, whatever the
    /// new criteria say.
    pub fn set_filter(&self, criteria: FilterCriteria) {
        info!(filter = %criteria, "filter set");
        *self
            .criteria
            .write()
            .unwrap_or_else(PoisonError::into_inner) = criteria;
    }

    /// Register a handler. Only allowed before the watcher starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the watcher has left the
    /// `Created` state.
    pub fn register(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let state = self.lock_state();
        if *state != WatcherState::Created {
            return Err(AppError::InvalidTransition(format!(
                "cannot register handler {} on a {} watcher",
                handler.name(),
                *state
            )));
        }
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(handler);
        Ok(())
    }

    /// Register a named closure as a handler.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the watcher has left the
    /// `Created` state.
    pub fn register_fn<F>(&self, name: impl Into<String>, func: F) -> Result<()>
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnHandler::new(name, func)))
    }

    /// Request the loop to stop. Safe to call from any thread.
    ///
    /// A running loop leaves its sleep immediately. Stopping a watcher that
    /// never started moves it straight to `Stopped`. Repeated requests while
    /// stopping are accepted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the watcher is already
    /// `Stopped`.
    pub fn request_stop(&self) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            WatcherState::Created => {
                *state = WatcherState::Stopped;
                self.cancel.cancel();
                info!("watcher stopped before it started");
                Ok(())
            }
            WatcherState::Running => {
                *state = WatcherState::Stopping;
                self.cancel.cancel();
                info!("stop requested");
                Ok(())
            }
            WatcherState::Stopping => Ok(()),
            WatcherState::Stopped => Err(AppError::InvalidTransition(
                "watcher is already stopped".into(),
            )),
        }
    }

    /// Run the poll loop until a stop is requested.
    ///
    /// Every message present when this is called is recorded as seen and
    /// never dispatched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the watcher is not in the
    /// `Created` state, and `AppError::Config` if the startup snapshot of the
    /// watched directory cannot be taken. In both cases the loop never runs.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        let registry = tokio::task::spawn_blocking(move || this.start())
            .await
            .map_err(|err| AppError::Io(format!("startup task failed: {err}")))??;
        let span = info_span!("watch_loop", path = %self.path.display());
        self.poll_until_stopped(&Arc::new(registry))
            .instrument(span)
            .await;
        Ok(())
    }

    /// Run the loop on a background task until `shutdown` resolves, then
    /// request a stop and wait for the loop to finish.
    ///
    /// A shutdown that arrives before the loop has started leaves the
    /// watcher `Stopped` and still counts as a clean exit.
    ///
    /// # Errors
    ///
    /// Returns startup errors from [`Watcher::run`] when the loop ends before
    /// `shutdown` resolves, and `AppError::Io` if the loop task panics.
    pub async fn run_until<F>(self: &Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let runner = Arc::clone(self);
        let mut handle = tokio::spawn(async move { runner.run().await });

        tokio::select! {
            () = shutdown => {
                info!("shutdown requested");
                if let Err(err) = self.request_stop() {
                    debug!(%err, "watcher already stopped at shutdown");
                }
            }
            joined = &mut handle => {
                // The loop only ends on its own when startup failed.
                return joined.map_err(|err| AppError::Io(format!("watch task failed: {err}")))?;
            }
        }

        let outcome = handle
            .await
            .map_err(|err| AppError::Io(format!("watch task failed: {err}")))?;
        match outcome {
            // The stop won the race against startup.
            Err(AppError::InvalidTransition(reason)) => {
                debug!(%reason, "watcher stopped before it started");
                Ok(())
            }
            other => other,
        }
    }

    /// `Created → Running`, seeding the seen-set on the way.
    fn start(&self) -> Result<HandlerRegistry> {
        let mut state = self.lock_state();
        if *state != WatcherState::Created {
            return Err(AppError::InvalidTransition(format!(
                "cannot start a {} watcher",
                *state
            )));
        }

        let existing = match scanner::snapshot_identities(&self.path) {
            Ok(existing) => existing,
            Err(err) => {
                *state = WatcherState::Stopped;
                return Err(AppError::Config(format!("startup snapshot failed: {err}")));
            }
        };
        let seeded = existing.len();
        self.seen.seed(existing);

        let registry = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        *state = WatcherState::Running;
        drop(state);

        info!(
            path = %self.path.display(),
            poll_interval = ?self.poll_interval,
            handlers = registry.len(),
            seeded,
            filter = %self.filter(),
            "watcher started"
        );
        if registry.is_empty() {
            warn!("no handlers registered; new messages will only be logged");
        }

        Ok(registry)
    }

    async fn poll_until_stopped(self: &Arc<Self>, registry: &Arc<HandlerRegistry>) {
        let wake = Arc::new(Notify::new());
        let _fs_wake = if self.fs_events {
            match DirectoryWake::start(&self.path, Arc::clone(&wake)) {
                Ok(fs_wake) => Some(fs_wake),
                Err(err) => {
                    warn!(%err, "file-system events unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };

        let mut loop_state = LoopState::default();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let this = Arc::clone(self);
            let cycle_registry = Arc::clone(registry);
            let span = Span::current();
            let cycle = tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                let mut state = loop_state;
                this.poll_cycle(&cycle_registry, &mut state);
                state
            });
            loop_state = match cycle.await {
                Ok(state) => state,
                Err(err) => {
                    error!(%err, "poll cycle task failed");
                    LoopState::default()
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
                () = wake.notified() => {}
            }
        }

        *self.lock_state() = WatcherState::Stopped;
        let stats = self.stats();
        info!(
            cycles = stats.cycles,
            dispatched = stats.dispatched,
            seen = self.seen.len(),
            "watcher stopped"
        );
    }

    /// One scan → novelty → filter → dispatch pass.
    fn poll_cycle(&self, registry: &HandlerRegistry, loop_state: &mut LoopState) {
        self.record(|s| s.cycles += 1);

        let candidates = match scanner::list_candidates(&self.path) {
            Ok(candidates) => {
                if loop_state.consecutive_scan_failures > 0 {
                    info!(
                        failures = loop_state.consecutive_scan_failures,
                        "watched directory readable again"
                    );
                }
                loop_state.consecutive_scan_failures = 0;
                candidates
            }
            Err(err) => {
                loop_state.consecutive_scan_failures += 1;
                self.record(|s| s.scan_failures += 1);
                let consecutive = loop_state.consecutive_scan_failures;
                if consecutive >= SCAN_FAILURE_ESCALATION {
                    error!(%err, consecutive, "scan keeps failing, retrying next cycle");
                } else {
                    warn!(%err, consecutive, "scan failed, retrying next cycle");
                }
                return;
            }
        };

        let present: HashSet<String> = candidates.iter().map(|c| c.identity.clone()).collect();
        let criteria = self.filter();

        for candidate in candidates {
            if !self.seen.is_new(&candidate.identity) {
                continue;
            }

            let message = match candidate.load() {
                None => continue,
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    self.record(|s| s.malformed += 1);
                    // Partially written files usually parse on the next cycle;
                    // only the first failure per file is worth a warning.
                    if loop_state
                        .reported_malformed
                        .insert(candidate.identity.clone())
                    {
                        warn!(identity = %candidate.identity, %err, "skipping malformed message");
                    } else {
                        debug!(identity = %candidate.identity, %err, "message still malformed");
                    }
                    continue;
                }
            };

            if !self.seen.insert_if_new(&message.identity) {
                continue;
            }
            loop_state.reported_malformed.remove(&message.identity);

            if !filter::matches(&message, &criteria) {
                self.record(|s| s.filtered_out += 1);
                debug!(identity = %message.identity, "message filtered out");
                continue;
            }

            info!(
                identity = %message.identity,
                sender = %message.sender,
                priority = %message.priority,
                subject = %message.subject,
                "new message"
            );
            let report = registry.dispatch(&message);
            self.record(|s| {
                s.dispatched += 1;
                s.handler_failures += report.failed;
            });
        }

        // Deleted malformed files will never be retried.
        loop_state
            .reported_malformed
            .retain(|identity| present.contains(identity));
        let pending = loop_state.reported_malformed.len();
        self.record(|s| s.pending_malformed = pending);
    }

    fn record(&self, update: impl FnOnce(&mut WatcherStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut *stats);
    }

    fn lock_state(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
