//! In-memory record of message identities already processed.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Set of identities seen by one watcher run.
///
/// The set only grows. [`insert_if_new`](Self::insert_if_new) checks and
/// marks under a single lock so an identity can never be claimed twice.
#[derive(Debug, Default)]
pub struct SeenSet {
    inner: Mutex<HashSet<String>>,
}

impl SeenSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `identity` has not been recorded yet.
    #[must_use]
    pub fn is_new(&self, identity: &str) -> bool {
        !self.lock().contains(identity)
    }

    /// Record `identity` as seen.
    pub fn mark_seen(&self, identity: &str) {
        self.lock().insert(identity.to_owned());
    }

    /// Record `identity` and report whether this call was the first to do so.
    #[must_use]
    pub fn insert_if_new(&self, identity: &str) -> bool {
        self.lock().insert(identity.to_owned())
    }

    /// Record every identity from a startup snapshot.
    pub fn seed<I, S>(&self, identities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().extend(identities.into_iter().map(Into::into));
    }

    /// Number of recorded identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave a HashSet half-inserted in
    // a way that matters here, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
