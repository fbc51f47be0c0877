//! Tile service layer.
//!
//! This module ties the decode engine to the on-disk cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Caller                  │
//! └────────────────────┬────────────────────┘
//!                      │ TileRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          TileCacheCoordinator           │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ PendingWrites│  │ WriteScheduler  │  │
//! │  │ (writes and  │  │ (background     │  │
//! │  │  decodes)    │  │  persistence)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            │                     │
//!            ▼                     ▼
//! ┌───────────────────┐  ┌───────────────────┐
//! │   DecodeEngine    │  │    cache::codec   │
//! └───────────────────┘  └───────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCacheCoordinator`]: Main entry point for tile reads
//! - [`TileRequest`]: Source, band, resolution, layer, tile and region of a read
//! - [`TileResponse`]: The served raster and whether it was a cache hit
//! - [`CacheStats`]: Activity counters

mod service;

pub use service::{CacheStats, TileCacheCoordinator, TileRequest, TileResponse};
