use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a decode engine.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Source file could not be opened or read by the codec
    #[error("Failed to open {path}: {message}")]
    Open { path: PathBuf, message: String },

    /// The codec rejected the codestream
    #[error("Codec error: {0}")]
    Codec(String),

    /// The engine cannot honour the requested decode parameters
    #[error("Unsupported decode request: {0}")]
    Unsupported(String),
}

/// Errors that can occur while serving a tile through the decode cache.
#[derive(Debug, Error)]
pub enum TileError {
    /// The decode engine failed; no cache file is written for this request
    #[error("Decode failed for {source_file}: {error}")]
    DecodeFailed {
        source_file: PathBuf,
        #[source]
        error: DecodeError,
    },

    /// The cache file exists but is malformed
    #[error("Corrupt cache file {path}: {reason}")]
    CorruptCache { path: PathBuf, reason: String },

    /// Pixel type code or name is not one of byte, uint16, int16, int32
    #[error("Unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// The decoded image has no component for the requested band
    #[error("Band {band} out of range: image has {band_count} band(s)")]
    BandOutOfRange { band: u32, band_count: usize },

    /// Caller supplied a buffer or region that cannot be processed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Cache file does not exist
    #[error("Cache file not found: {0}")]
    NotFound(PathBuf),

    /// Underlying filesystem error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The write scheduler has been shut down
    #[error("Write scheduler is closed")]
    SchedulerClosed,

    /// A blocking task was cancelled or panicked
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl TileError {
    /// Wrap an I/O error, mapping `NotFound` to [`TileError::NotFound`].
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            TileError::NotFound(path)
        } else {
            TileError::Io { path, source }
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TileError::CorruptCache {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error indicates a malformed cache file.
    pub fn is_corrupt_cache(&self) -> bool {
        matches!(self, TileError::CorruptCache { .. })
    }
}
