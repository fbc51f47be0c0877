//! Cache key and cache file path derivation.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Extension of persisted tile files.
pub const CACHE_FILE_EXTENSION: &str = "raw";

/// Number of digest bytes kept in the file-name checksum.
const CHECKSUM_BYTES: usize = 16;

/// Tile index written into file names when the whole image is decoded.
const WHOLE_IMAGE_TILE: i64 = -1;

/// Identity of one cached decode result.
///
/// The checksum covers only the source *file name*, so computing a key never
/// touches the source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hex-encoded hash of the source file name
    pub source_checksum: String,

    /// Tile index, `-1` for a whole-image decode
    ///
    /// Wider than the `u32` request index so every tile stays non-negative.
    pub tile_index: i64,

    /// Resolution level (0 = full resolution)
    pub resolution: u32,

    /// Band (image component) index
    pub band: u32,
}

impl CacheKey {
    /// Create a key for a source path.
    ///
    /// Only the final path component participates in the checksum.
    pub fn new(source: &Path, tile_index: Option<u32>, resolution: u32, band: u32) -> Self {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| source.to_string_lossy());
        Self {
            source_checksum: file_name_checksum(&file_name),
            tile_index: tile_index.map_or(WHOLE_IMAGE_TILE, i64::from),
            resolution,
            band,
        }
    }

    /// File name of the cache entry: `{checksum}_{tile}_{resolution}_{band}.raw`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            self.source_checksum, self.tile_index, self.resolution, self.band, CACHE_FILE_EXTENSION
        )
    }

    /// Full path of the cache entry inside `cache_dir`.
    pub fn path_in(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(self.file_name())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.source_checksum, self.tile_index, self.resolution, self.band
        )
    }
}

/// Derive the cache file path for a tile.
pub fn key_to_path(
    cache_dir: &Path,
    source: &Path,
    tile_index: Option<u32>,
    resolution: u32,
    band: u32,
) -> PathBuf {
    CacheKey::new(source, tile_index, resolution, band).path_in(cache_dir)
}

fn file_name_checksum(file_name: &str) -> String {
    let digest = Sha256::digest(file_name.as_bytes());
    hex::encode(&digest[..CHECKSUM_BYTES])
}
