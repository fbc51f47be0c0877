//! On-disk tile cache.
//!
//! # Components
//!
//! - [`CacheKey`] / [`key_to_path`]: where a decoded tile lives on disk
//! - [`codec`]: the binary tile format, with ROI-aware partial reads
//! - [`PendingWrites`]: which cache paths are being written right now
//! - [`WriteScheduler`]: the small worker pool that persists decoded tiles
//!
//! ```text
//!  request ──► CacheKey ──► path ──► PendingWrites::wait_until_clear
//!                                          │
//!                         ┌────────────────┴───────────────┐
//!                         ▼                                ▼
//!                  file exists:                      file missing:
//!                  codec::read_roi               decode, serve from memory,
//!                                                WriteScheduler ► codec::write
//! ```

pub mod codec;
mod key;
mod pending;
mod scheduler;

use std::path::Path;

use tracing::debug;

use crate::error::TileError;

pub use codec::{CacheHeader, HEADER_SIZE};
pub use key::{key_to_path, CacheKey, CACHE_FILE_EXTENSION};
pub use pending::{PendingWriteGuard, PendingWrites};
pub use scheduler::{default_worker_count, WriteJob, WriteScheduler, MAX_DEFAULT_WORKERS};

// =============================================================================
// Maintenance
// =============================================================================

/// Remove cache files and leftover temporary files from `cache_dir`.
///
/// Other files are left alone. A missing directory counts as empty.
/// Returns the number of files removed.
pub async fn purge_dir(cache_dir: &Path) -> Result<usize, TileError> {
    let mut entries = match tokio::fs::read_dir(cache_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(TileError::io(cache_dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| TileError::io(cache_dir, e))?
    {
        let path = entry.path();
        let is_cache_file = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == CACHE_FILE_EXTENSION || ext == codec::TEMP_FILE_SUFFIX);
        if !is_cache_file || !path.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TileError::io(&path, e)),
        }
    }

    debug!(cache_dir = %cache_dir.display(), removed, "Purged tile cache");
    Ok(removed)
}
