//! Registry of cache paths with work in flight.
//!
//! A path is registered before its write job is queued and released when the
//! job ends, whatever the outcome. Readers call
//! [`PendingWrites::wait_until_clear`] before touching a cache file.
//!
//! Each entry owns a `watch` sender that is never sent on; dropping it when
//! the entry is released wakes every subscribed waiter. A waiter subscribes
//! while holding the map lock, so a release between the check and the await
//! cannot be missed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

struct Entry {
    /// Number of outstanding guards for this path
    holders: usize,
    /// Dropped when the last holder releases the path
    released: watch::Sender<()>,
}

/// Set of paths currently being written (or decoded), with wait semantics.
///
/// Shared via `Arc`; guards keep a handle so they can release on drop.
#[derive(Default)]
pub struct PendingWrites {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        // No invariant spans a panic inside the critical sections
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `path` as in flight.
    ///
    /// Overlapping writers of one path are counted; the path clears when the
    /// last guard is dropped.
    pub fn begin_write(self: &Arc<Self>, path: impl Into<PathBuf>) -> PendingWriteGuard {
        let path = path.into();
        {
            let mut entries = self.lock();
            entries
                .entry(path.clone())
                .and_modify(|e| e.holders += 1)
                .or_insert_with(|| Entry {
                    holders: 1,
                    released: watch::channel(()).0,
                });
        }
        PendingWriteGuard {
            registry: Arc::clone(self),
            path: Some(path),
        }
    }

    /// Claim `path` exclusively.
    ///
    /// Returns `None` if the path is already in flight.
    pub fn try_begin(self: &Arc<Self>, path: impl Into<PathBuf>) -> Option<PendingWriteGuard> {
        let path = path.into();
        {
            let mut entries = self.lock();
            if entries.contains_key(&path) {
                return None;
            }
            entries.insert(
                path.clone(),
                Entry {
                    holders: 1,
                    released: watch::channel(()).0,
                },
            );
        }
        Some(PendingWriteGuard {
            registry: Arc::clone(self),
            path: Some(path),
        })
    }

    /// Release one hold on `path`.
    ///
    /// Normally invoked by dropping a [`PendingWriteGuard`]. Releasing a path
    /// that is not registered is a no-op.
    pub fn end_write(&self, path: &Path) {
        let released = {
            let mut entries = self.lock();
            let last = match entries.get_mut(path) {
                Some(entry) => {
                    entry.holders -= 1;
                    entry.holders == 0
                }
                None => false,
            };
            if last {
                entries.remove(path)
            } else {
                None
            }
        };
        // Waiters wake once the sender is dropped, outside the lock
        drop(released);
    }

    /// Wait until `path` is no longer in flight.
    ///
    /// Returns immediately when nothing is pending for the path.
    pub async fn wait_until_clear(&self, path: &Path) {
        let mut receiver = {
            let entries = self.lock();
            match entries.get(path) {
                Some(entry) => entry.released.subscribe(),
                None => return,
            }
        };
        // `changed` only errors once the sender is gone
        while receiver.changed().await.is_ok() {}
    }

    /// Whether `path` is currently in flight.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    /// Number of distinct paths in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Hold on a pending path; releases it on drop.
#[must_use = "dropping the guard immediately releases the path"]
pub struct PendingWriteGuard {
    registry: Arc<PendingWrites>,
    path: Option<PathBuf>,
}

impl PendingWriteGuard {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Release the path now.
    pub fn release(mut self) {
        if let Some(path) = self.path.take() {
            self.registry.end_write(&path);
        }
    }
}

impl Drop for PendingWriteGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            self.registry.end_write(&path);
        }
    }
}

impl std::fmt::Debug for PendingWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWriteGuard")
            .field("path", &self.path)
            .finish()
    }
}
