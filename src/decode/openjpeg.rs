//! JPEG 2000 decode engine backed by OpenJPEG (via the `jpeg2k` crate).

use std::path::Path;

use jpeg2k::{DecodeParameters, Image};
use tracing::debug;

use super::{DecodeEngine, DecodedComponent, DecodedImage};
use crate::error::DecodeError;

/// Decodes `.jp2` / `.j2k` files with OpenJPEG.
///
/// Resolution maps to the codec's reduce factor and layer to the number of
/// quality layers decoded. Single-tile decoding is not exposed by the
/// bindings, so a request with a tile index is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenJpegEngine;

impl OpenJpegEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeEngine for OpenJpegEngine {
    fn decode(
        &self,
        source: &Path,
        resolution: u32,
        layer: u32,
        tile_index: Option<u32>,
    ) -> Result<DecodedImage, DecodeError> {
        if let Some(tile) = tile_index {
            return Err(DecodeError::Unsupported(format!(
                "tile {tile} requested, OpenJPEG engine decodes whole images only"
            )));
        }
        if !source.exists() {
            return Err(DecodeError::Open {
                path: source.to_path_buf(),
                message: "file does not exist".to_string(),
            });
        }

        let params = DecodeParameters::new().reduce(resolution).layers(layer);
        let image =
            Image::from_file_with(source, params).map_err(|e| DecodeError::Codec(e.to_string()))?;

        let components: Vec<DecodedComponent> = image
            .components()
            .iter()
            .map(|c| DecodedComponent::new(c.width(), c.height(), c.data().to_vec()))
            .collect();

        debug!(
            source = %source.display(),
            resolution,
            layer,
            bands = components.len(),
            "Decoded JPEG 2000 image"
        );
        Ok(DecodedImage::new(components))
    }
}
