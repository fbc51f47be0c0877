//! Decode engine abstraction.
//!
//! The cache never interprets compressed data itself. A [`DecodeEngine`]
//! turns a source file into one `i32` buffer per image component, at a given
//! resolution level and quality layer, optionally restricted to one tile.

#[cfg(feature = "openjpeg")]
mod openjpeg;

use std::path::Path;

use serde::Serialize;

use crate::error::DecodeError;

#[cfg(feature = "openjpeg")]
pub use openjpeg::OpenJpegEngine;

/// One decoded image component (band).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedComponent {
    pub width: u32,
    pub height: u32,
    /// Row-major samples, `width * height` long
    pub pixels: Vec<i32>,
}

impl DecodedComponent {
    pub fn new(width: u32, height: u32, pixels: Vec<i32>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Whether the buffer length matches the declared geometry.
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == self.width as usize * self.height as usize
    }
}

/// Result of one decode: the components, indexed by band.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedImage {
    pub components: Vec<DecodedComponent>,
}

impl DecodedImage {
    pub fn new(components: Vec<DecodedComponent>) -> Self {
        Self { components }
    }

    pub fn band_count(&self) -> usize {
        self.components.len()
    }

    /// Take ownership of one band, discarding the others.
    pub fn into_band(mut self, band: u32) -> Option<DecodedComponent> {
        let index = band as usize;
        if index < self.components.len() {
            Some(self.components.swap_remove(index))
        } else {
            None
        }
    }
}

/// Band count and geometry of a source at one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub band_count: usize,
    pub width: u32,
    pub height: u32,
}

impl ImageInfo {
    /// Info of a decoded image, taken from its first component.
    ///
    /// Returns `None` for an image without components.
    pub fn of(image: &DecodedImage) -> Option<Self> {
        let first = image.components.first()?;
        Some(Self {
            band_count: image.band_count(),
            width: first.width,
            height: first.height,
        })
    }
}

/// Decodes compressed raster sources.
///
/// Implementations must be deterministic for identical inputs: the cache
/// assumes two decodes of the same key produce the same pixels.
pub trait DecodeEngine: Send + Sync + 'static {
    /// Decode `source` at `resolution` (0 = full resolution, each level halves
    /// the size) using the first `layer` quality layers (0 = all).
    ///
    /// With `tile_index` set only that tile is decoded and the component
    /// geometry is the tile's.
    fn decode(
        &self,
        source: &Path,
        resolution: u32,
        layer: u32,
        tile_index: Option<u32>,
    ) -> Result<DecodedImage, DecodeError>;

    /// Report band count and geometry of `source` at `resolution`.
    ///
    /// The default decodes the whole image; engines that can read the
    /// codestream header alone should override it.
    fn describe(&self, source: &Path, resolution: u32) -> Result<ImageInfo, DecodeError> {
        let image = self.decode(source, resolution, 0, None)?;
        ImageInfo::of(&image)
            .ok_or_else(|| DecodeError::Codec("image has no components".to_string()))
    }
}

impl<E: DecodeEngine + ?Sized> DecodeEngine for std::sync::Arc<E> {
    fn decode(
        &self,
        source: &Path,
        resolution: u32,
        layer: u32,
        tile_index: Option<u32>,
    ) -> Result<DecodedImage, DecodeError> {
        (**self).decode(source, resolution, layer, tile_index)
    }

    fn describe(&self, source: &Path, resolution: u32) -> Result<ImageInfo, DecodeError> {
        (**self).describe(source, resolution)
    }
}
