//! Tile cache coordinator.
//!
//! The coordinator is the main entry point for tile reads. It orchestrates:
//! - Cache key and path derivation
//! - Waiting for in-flight writes of the same tile
//! - Partial reads from existing cache files
//! - Decoding on a miss and serving the region from memory
//! - Background persistence of the full decoded component
//!
//! # Request States
//!
//! ```text
//!              ┌──────────────────────┐
//!              │ wait for pending     │
//!   read() ───►│ write on this path   │
//!              └──────────┬───────────┘
//!                         │
//!          ┌──────────────┴──────────────┐
//!          ▼                             ▼
//!     file present                  file missing
//!   codec::read_roi           claim decode (single-flight)
//!      (hit)                  decode ─► extract ROI
//!                             schedule write ─► [await write]
//!                                  (miss)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{codec, purge_dir, CacheKey, PendingWrites, WriteScheduler};
use crate::config::{CacheConfig, PersistMode};
use crate::decode::{DecodeEngine, DecodedComponent, ImageInfo};
use crate::error::{DecodeError, TileError};
use crate::raster::{extract_roi, PixelType, Raster, Roi};

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one band of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Source image file
    pub source: PathBuf,

    /// Band (image component) index
    pub band: u32,

    /// Element type of the served pixels and of the cache file
    pub pixel_type: PixelType,

    /// Resolution level (0 = full resolution)
    pub resolution: u32,

    /// Quality layers to decode (0 = all)
    pub layer: u32,

    /// Tile to decode; `None` decodes the whole image
    pub tile_index: Option<u32>,

    /// Region to return; `None` returns the full tile
    pub roi: Option<Roi>,
}

impl TileRequest {
    /// Request the full first band of the whole image at full resolution.
    pub fn new(source: impl Into<PathBuf>, pixel_type: PixelType) -> Self {
        Self {
            source: source.into(),
            band: 0,
            pixel_type,
            resolution: 0,
            layer: 0,
            tile_index: None,
            roi: None,
        }
    }

    pub fn with_band(mut self, band: u32) -> Self {
        self.band = band;
        self
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_tile(mut self, tile_index: u32) -> Self {
        self.tile_index = Some(tile_index);
        self
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// The cache key of this request. The quality layer and region are not
    /// part of the key.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.source, self.tile_index, self.resolution, self.band)
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the coordinator.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// The requested region (or full tile)
    pub raster: Raster,

    /// Whether the pixels came from an existing cache file
    pub cache_hit: bool,

    /// Cache file backing this tile
    pub path: PathBuf,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters describing coordinator activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub decodes: u64,
    pub decode_failures: u64,
    pub writes_completed: u64,
    pub writes_failed: u64,
    pub corrupt_recovered: u64,
    pub wait_timeouts: u64,
}

#[derive(Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
    decode_failures: AtomicU64,
    writes_completed: AtomicU64,
    writes_failed: AtomicU64,
    corrupt_recovered: AtomicU64,
    wait_timeouts: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            writes_completed: self.writes_completed.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            corrupt_recovered: self.corrupt_recovered.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Serves tile reads through the on-disk decode cache.
///
/// # Type Parameters
///
/// * `E` - The decode engine used on a cache miss
///
/// # Example
///
/// ```ignore
/// use tile_decode_cache::{CacheConfig, OpenJpegEngine, PixelType, Roi, TileCacheCoordinator, TileRequest};
///
/// let coordinator = TileCacheCoordinator::new(OpenJpegEngine::new(), CacheConfig::new("/var/cache/tiles"))?;
///
/// let request = TileRequest::new("/data/T31UFQ_B04.jp2", PixelType::UInt16)
///     .with_resolution(1)
///     .with_roi(Roi::new(0, 0, 256, 256));
/// let response = coordinator.read(&request).await?;
///
/// println!("{}x{} (cache hit: {})", response.raster.width, response.raster.height, response.cache_hit);
/// coordinator.shutdown().await;
/// ```
pub struct TileCacheCoordinator<E: DecodeEngine> {
    engine: Arc<E>,
    config: CacheConfig,
    /// Paths with a write job queued or running
    writes: Arc<PendingWrites>,
    /// Paths with a decode in progress (single-flight)
    decodes: Arc<PendingWrites>,
    scheduler: WriteScheduler,
    stats: Arc<StatsCounters>,
}

impl<E: DecodeEngine> TileCacheCoordinator<E> {
    /// Create a coordinator, creating the cache directory if needed.
    ///
    /// Starts the write workers, so this must run inside a Tokio runtime.
    pub fn new(engine: E, config: CacheConfig) -> Result<Self, TileError> {
        Self::with_shared_engine(Arc::new(engine), config)
    }

    /// Create a coordinator around an engine shared with other components.
    pub fn with_shared_engine(engine: Arc<E>, config: CacheConfig) -> Result<Self, TileError> {
        config.validate().map_err(TileError::InvalidArgument)?;
        std::fs::create_dir_all(&config.cache_dir)
            .map_err(|e| TileError::io(&config.cache_dir, e))?;

        let scheduler = WriteScheduler::new(config.write_workers);
        debug!(
            cache_dir = %config.cache_dir.display(),
            workers = scheduler.worker_count(),
            "Tile cache coordinator started"
        );

        Ok(Self {
            engine,
            config,
            writes: Arc::new(PendingWrites::new()),
            decodes: Arc::new(PendingWrites::new()),
            scheduler,
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Registry of in-flight cache writes.
    pub fn pending_writes(&self) -> &Arc<PendingWrites> {
        &self.writes
    }

    /// Cache file path for a request.
    pub fn path_for(&self, request: &TileRequest) -> PathBuf {
        request.cache_key().path_in(&self.config.cache_dir)
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Read a tile, using the cache when available.
    ///
    /// On a miss the region is served from the freshly decoded component and
    /// the full component is queued for persistence. With
    /// [`PersistMode::AwaitDurable`] the call returns once the cache file is
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The decode engine fails ([`TileError::DecodeFailed`]); nothing is persisted
    /// - The band does not exist in the decoded image
    /// - The region has negative dimensions
    /// - An existing cache file cannot be read
    pub async fn read(&self, request: &TileRequest) -> Result<TileResponse, TileError> {
        let path = self.path_for(request);

        loop {
            if !self.wait_for_pending_write(&path).await {
                // Another write is stuck on this path; serve without touching it
                let component = self.decode_band(request).await?;
                let raster = extract(&component, request.pixel_type, request.roi)?;
                StatsCounters::bump(&self.stats.misses);
                return Ok(TileResponse {
                    raster,
                    cache_hit: false,
                    path,
                });
            }

            if let Some(raster) = self.read_cached(&path, request).await? {
                StatsCounters::bump(&self.stats.hits);
                debug!(path = %path.display(), "Tile cache hit");
                return Ok(TileResponse {
                    raster,
                    cache_hit: true,
                    path,
                });
            }

            let _decode_claim = if self.config.single_flight {
                match self.decodes.try_begin(&path) {
                    Some(claim) => Some(claim),
                    None => {
                        debug!(path = %path.display(), "Waiting for concurrent decode");
                        self.decodes.wait_until_clear(&path).await;
                        continue;
                    }
                }
            } else {
                None
            };

            return self.serve_miss(path, request).await;
        }
    }

    /// Band count and geometry of `source` at `resolution`, straight from the
    /// engine. Nothing is read from or written to the cache.
    pub async fn describe(&self, source: &Path, resolution: u32) -> Result<ImageInfo, TileError> {
        let engine = Arc::clone(&self.engine);
        let file = source.to_path_buf();
        tokio::task::spawn_blocking(move || engine.describe(&file, resolution))
            .await
            .map_err(|e| TileError::TaskFailed(e.to_string()))?
            .map_err(|error| TileError::DecodeFailed {
                source_file: source.to_path_buf(),
                error,
            })
    }

    /// Stop accepting writes and wait for queued writes to finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Delete every cache file (and leftover temporary file) in the cache directory.
    ///
    /// Returns the number of files removed.
    pub async fn purge(&self) -> Result<usize, TileError> {
        purge_dir(&self.config.cache_dir).await
    }

    async fn serve_miss(
        &self,
        path: PathBuf,
        request: &TileRequest,
    ) -> Result<TileResponse, TileError> {
        StatsCounters::bump(&self.stats.misses);
        debug!(path = %path.display(), "Tile cache miss");

        let component = self.decode_band(request).await?;
        let raster = extract(&component, request.pixel_type, request.roi)?;

        self.schedule_persist(&path, component, request.pixel_type);

        if self.config.persist_mode == PersistMode::AwaitDurable {
            self.wait_for_pending_write(&path).await;
        }

        Ok(TileResponse {
            raster,
            cache_hit: false,
            path,
        })
    }

    /// Wait for a pending write on `path`, up to the configured bound.
    ///
    /// Returns `false` if the wait timed out.
    async fn wait_for_pending_write(&self, path: &Path) -> bool {
        let Some(timeout) = self.config.write_wait_timeout else {
            self.writes.wait_until_clear(path).await;
            return true;
        };
        match tokio::time::timeout(timeout, self.writes.wait_until_clear(path)).await {
            Ok(()) => true,
            Err(_) => {
                StatsCounters::bump(&self.stats.wait_timeouts);
                warn!(
                    path = %path.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Cache write still in flight after timeout"
                );
                false
            }
        }
    }

    /// Read the requested region from an existing cache file.
    ///
    /// Returns `Ok(None)` when there is no usable file.
    async fn read_cached(
        &self,
        path: &Path,
        request: &TileRequest,
    ) -> Result<Option<Raster>, TileError> {
        let file = path.to_path_buf();
        let roi = request.roi;
        let pixel_type = request.pixel_type;
        let result = tokio::task::spawn_blocking(move || codec::read(&file, roi, pixel_type))
            .await
            .map_err(|e| TileError::TaskFailed(e.to_string()))?;

        match result {
            Ok(raster) => Ok(Some(raster)),
            Err(TileError::NotFound(_)) => Ok(None),
            Err(e) if e.is_corrupt_cache() && self.config.recover_corrupt => {
                warn!(path = %path.display(), "Discarding corrupt cache file: {}", e);
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(TileError::io(path, err)),
                }
                StatsCounters::bump(&self.stats.corrupt_recovered);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Decode the request's source and keep only its band.
    async fn decode_band(&self, request: &TileRequest) -> Result<DecodedComponent, TileError> {
        let engine = Arc::clone(&self.engine);
        let source = request.source.clone();
        let (resolution, layer, tile_index) =
            (request.resolution, request.layer, request.tile_index);

        let decoded =
            tokio::task::spawn_blocking(move || engine.decode(&source, resolution, layer, tile_index))
                .await
                .map_err(|e| TileError::TaskFailed(e.to_string()))?;

        let image = decoded.map_err(|error| {
            StatsCounters::bump(&self.stats.decode_failures);
            TileError::DecodeFailed {
                source_file: request.source.clone(),
                error,
            }
        })?;
        StatsCounters::bump(&self.stats.decodes);

        let band_count = image.band_count();
        let component = image
            .into_band(request.band)
            .ok_or(TileError::BandOutOfRange {
                band: request.band,
                band_count,
            })?;

        if !component.is_consistent() {
            StatsCounters::bump(&self.stats.decode_failures);
            return Err(TileError::DecodeFailed {
                source_file: request.source.clone(),
                error: DecodeError::Codec(format!(
                    "band {} has {} samples for {}x{}",
                    request.band,
                    component.pixels.len(),
                    component.width,
                    component.height
                )),
            });
        }
        Ok(component)
    }

    /// Register `path` as pending and queue the write of the full component.
    fn schedule_persist(&self, path: &Path, component: DecodedComponent, pixel_type: PixelType) {
        let guard = self.writes.begin_write(path);
        let stats = Arc::clone(&self.stats);

        let job = move || {
            let path = guard.path();
            match codec::write(
                path,
                component.width,
                component.height,
                &component.pixels,
                pixel_type,
            ) {
                Ok(()) => {
                    StatsCounters::bump(&stats.writes_completed);
                    debug!(path = %path.display(), "Persisted decoded tile");
                }
                Err(e) => {
                    StatsCounters::bump(&stats.writes_failed);
                    warn!(path = %path.display(), "Failed to persist decoded tile: {}", e);
                }
            }
            drop(guard);
        };

        if let Err(e) = self.scheduler.schedule(job) {
            warn!(path = %path.display(), "Cache write not scheduled: {}", e);
        }
    }
}

fn extract(
    component: &DecodedComponent,
    pixel_type: PixelType,
    roi: Option<Roi>,
) -> Result<Raster, TileError> {
    extract_roi(
        &component.pixels,
        component.width,
        component.height,
        pixel_type,
        roi,
    )
}

// =============================================================================
// Tests
// =============================================================================
