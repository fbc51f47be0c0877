//! # Tile Decode Cache
//!
//! An on-disk cache of decoded raster tiles for JPEG 2000 sources.
//!
//! Decoding a JPEG 2000 tile is expensive. The first read of a tile decodes
//! it, serves the requested region from memory and persists the full decoded
//! band as a small binary file in the background. Later reads of any region
//! of that tile read only the bytes they need from the cache file.
//!
//! ## Features
//!
//! - **Deterministic keys**: cache file names derive from the source file
//!   name, tile, resolution level and band
//! - **Partial reads**: a region of interest is read row by row without
//!   loading the whole tile
//! - **Background persistence**: a bounded worker pool writes tiles
//!   atomically (temporary file then rename)
//! - **No torn reads**: readers wait for in-flight writes of the same tile
//! - **Single-flight decodes**: concurrent misses for one tile decode once
//!
//! ## Architecture
//!
//! - [`raster`] - Pixel types, typed buffers and ROI extraction
//! - [`cache`] - Cache keys, file codec, pending-write registry, write scheduler
//! - [`decode`] - Decode engine trait and the OpenJPEG engine
//! - [`tile`] - The coordinator serving tile reads
//! - [`config`] - Library configuration and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tile_decode_cache::{CacheConfig, OpenJpegEngine, PixelType, Roi, TileCacheCoordinator, TileRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tile_decode_cache::TileError> {
//!     let config = CacheConfig::new("/var/cache/tiles");
//!     let coordinator = TileCacheCoordinator::new(OpenJpegEngine::new(), config)?;
//!
//!     let request = TileRequest::new("/data/T31UFQ_B04.jp2", PixelType::UInt16)
//!         .with_roi(Roi::new(512, 512, 256, 256));
//!     let response = coordinator.read(&request).await?;
//!     println!("cache hit: {}", response.cache_hit);
//!
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod raster;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    key_to_path, purge_dir, CacheHeader, CacheKey, PendingWriteGuard, PendingWrites,
    WriteScheduler, CACHE_FILE_EXTENSION, HEADER_SIZE,
};
pub use config::{CacheConfig, Cli, Command, PersistMode};
#[cfg(feature = "openjpeg")]
pub use decode::OpenJpegEngine;
pub use decode::{DecodeEngine, DecodedComponent, DecodedImage, ImageInfo};
pub use error::{DecodeError, TileError};
pub use raster::{extract_roi, PixelType, Raster, Roi, TypedBuffer};
pub use tile::{CacheStats, TileCacheCoordinator, TileRequest, TileResponse};
