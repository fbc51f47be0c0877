//! Configuration for the tile decode cache.
//!
//! Two layers:
//! - [`CacheConfig`]: the library-level settings consumed by
//!   [`TileCacheCoordinator`](crate::tile::TileCacheCoordinator)
//! - [`Cli`]: command-line arguments via clap, with `TDC_` environment
//!   variables, converted into a [`CacheConfig`]
//!
//! # Environment Variables
//!
//! - `TDC_CACHE_DIR` - Directory holding cached tiles (required)
//! - `TDC_WRITE_WORKERS` - Persistence worker count (default: half the CPUs, 1-4)
//! - `TDC_WRITE_WAIT_TIMEOUT` - Seconds to wait for an in-flight write (default: 30, 0 = unbounded)
//! - `TDC_FIRE_AND_FORGET` - Return before a fresh tile is persisted (default: false)
//! - `TDC_NO_SINGLE_FLIGHT` - Let concurrent misses for one tile decode independently
//! - `TDC_NO_RECOVER_CORRUPT` - Surface corrupt cache files instead of re-decoding

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::default_worker_count;
use crate::raster::{PixelType, Roi};

// =============================================================================
// Default Values
// =============================================================================

/// Default bound on waiting for an in-flight write, in seconds.
pub const DEFAULT_WRITE_WAIT_TIMEOUT_SECS: u64 = 30;

/// Largest accepted write worker count.
pub const MAX_WRITE_WORKERS: usize = 64;

// =============================================================================
// Library Configuration
// =============================================================================

/// When a freshly decoded tile counts as served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Wait for the cache file to be written before returning the tile
    #[default]
    AwaitDurable,
    /// Return as soon as the tile is extracted; persistence continues in the background
    FireAndForget,
}

/// Settings of a [`TileCacheCoordinator`](crate::tile::TileCacheCoordinator).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding cache files
    pub cache_dir: PathBuf,

    /// Number of persistence workers
    pub write_workers: usize,

    /// Whether a miss waits for its write to complete
    pub persist_mode: PersistMode,

    /// Bound on waiting for another request's write; `None` waits forever
    pub write_wait_timeout: Option<Duration>,

    /// Concurrent misses for the same tile share one decode
    pub single_flight: bool,

    /// Delete and re-decode cache files that fail to parse
    pub recover_corrupt: bool,
}

impl CacheConfig {
    /// Configuration with defaults for everything but the cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            write_workers: default_worker_count(),
            persist_mode: PersistMode::default(),
            write_wait_timeout: Some(Duration::from_secs(DEFAULT_WRITE_WAIT_TIMEOUT_SECS)),
            single_flight: true,
            recover_corrupt: true,
        }
    }

    pub fn with_write_workers(mut self, workers: usize) -> Self {
        self.write_workers = workers;
        self
    }

    pub fn with_persist_mode(mut self, mode: PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }

    pub fn with_write_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_wait_timeout = timeout;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_recover_corrupt(mut self, enabled: bool) -> Self {
        self.recover_corrupt = enabled;
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("Cache directory is required. Set --cache-dir or TDC_CACHE_DIR".to_string());
        }
        if self.cache_dir.exists() && !self.cache_dir.is_dir() {
            return Err(format!(
                "Cache path {} exists but is not a directory",
                self.cache_dir.display()
            ));
        }
        if self.write_workers == 0 || self.write_workers > MAX_WRITE_WORKERS {
            return Err(format!(
                "write_workers must be between 1 and {}",
                MAX_WRITE_WORKERS
            ));
        }
        if self.write_wait_timeout == Some(Duration::ZERO) {
            return Err("write_wait_timeout must be positive (use None to wait forever)".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile decode cache - serve JPEG 2000 tiles through a disk-backed decode cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-decode-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Read one tile through the cache.
    Read(ReadArgs),
    /// Show the header of a cache file.
    Inspect(InspectArgs),
    /// Print the cache file path of a tile.
    Key(KeyArgs),
    /// Delete every cached tile in a cache directory.
    Purge(CacheDirArgs),
}

/// Pixel type names accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelTypeArg {
    Byte,
    Uint16,
    Int16,
    Int32,
}

impl From<PixelTypeArg> for PixelType {
    fn from(arg: PixelTypeArg) -> Self {
        match arg {
            PixelTypeArg::Byte => PixelType::Byte,
            PixelTypeArg::Uint16 => PixelType::UInt16,
            PixelTypeArg::Int16 => PixelType::Int16,
            PixelTypeArg::Int32 => PixelType::Int32,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CacheDirArgs {
    /// Directory holding cached tiles.
    #[arg(long, env = "TDC_CACHE_DIR")]
    pub cache_dir: PathBuf,
}

/// Arguments identifying one tile of a source file.
#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    /// Source JPEG 2000 file.
    pub source: PathBuf,

    /// Band (image component) index.
    #[arg(long, default_value_t = 0)]
    pub band: u32,

    /// Resolution level (0 = full resolution).
    #[arg(long, default_value_t = 0)]
    pub resolution: u32,

    /// Tile index; omit to decode the whole image.
    #[arg(long)]
    pub tile: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    #[command(flatten)]
    pub cache: CacheDirArgs,

    #[command(flatten)]
    pub tile: TileArgs,

    /// Quality layers to decode (0 = all).
    #[arg(long, default_value_t = 0)]
    pub layer: u32,

    /// Element type of the served pixels.
    #[arg(long, value_enum, default_value_t = PixelTypeArg::Uint16)]
    pub pixel_type: PixelTypeArg,

    /// Region of interest as x,y,width,height.
    #[arg(long, value_parser = parse_roi)]
    pub roi: Option<Roi>,

    /// Write the pixels (little endian) to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the result summary as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Persistence worker count.
    #[arg(long, env = "TDC_WRITE_WORKERS")]
    pub write_workers: Option<usize>,

    /// Seconds to wait for another request's write (0 = unbounded).
    #[arg(long, default_value_t = DEFAULT_WRITE_WAIT_TIMEOUT_SECS, env = "TDC_WRITE_WAIT_TIMEOUT")]
    pub write_wait_timeout: u64,

    /// Return before the decoded tile is persisted.
    #[arg(long, default_value_t = false, env = "TDC_FIRE_AND_FORGET")]
    pub fire_and_forget: bool,

    /// Let concurrent misses of one tile decode independently.
    #[arg(long, default_value_t = false, env = "TDC_NO_SINGLE_FLIGHT")]
    pub no_single_flight: bool,

    /// Fail on corrupt cache files instead of re-decoding.
    #[arg(long, default_value_t = false, env = "TDC_NO_RECOVER_CORRUPT")]
    pub no_recover_corrupt: bool,
}

impl ReadArgs {
    /// Build the coordinator configuration from the arguments.
    pub fn cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig::new(&self.cache.cache_dir)
            .with_write_wait_timeout(
                (self.write_wait_timeout > 0).then(|| Duration::from_secs(self.write_wait_timeout)),
            )
            .with_persist_mode(if self.fire_and_forget {
                PersistMode::FireAndForget
            } else {
                PersistMode::AwaitDurable
            })
            .with_single_flight(!self.no_single_flight)
            .with_recover_corrupt(!self.no_recover_corrupt);
        if let Some(workers) = self.write_workers {
            config = config.with_write_workers(workers);
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Cache file to inspect.
    pub path: PathBuf,

    /// Decode the body as this type and report its value range
    /// (inferred from the body length when omitted).
    #[arg(long, value_enum)]
    pub pixel_type: Option<PixelTypeArg>,

    /// Print as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub cache: CacheDirArgs,

    #[command(flatten)]
    pub tile: TileArgs,
}

fn parse_roi(s: &str) -> Result<Roi, String> {
    s.parse::<Roi>().map_err(|e| e.to_string())
}

// =============================================================================
// Tests
// =============================================================================
