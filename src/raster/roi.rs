//! Bounds-clipped extraction of a region from a decoded component.

use super::{Pixel, PixelType, Raster, Roi};
use crate::error::TileError;

/// Extract `roi` from a row-major `i32` raster, narrowed to `pixel_type`.
///
/// With no region the whole raster is converted. Cells of the region that fall
/// outside the source stay zero; an out-of-range region is never an error.
pub fn extract_roi(
    pixels: &[i32],
    width: u32,
    height: u32,
    pixel_type: PixelType,
    roi: Option<Roi>,
) -> Result<Raster, TileError> {
    match pixel_type {
        PixelType::Byte => extract_roi_as::<u8>(pixels, width, height, roi),
        PixelType::UInt16 => extract_roi_as::<u16>(pixels, width, height, roi),
        PixelType::Int16 => extract_roi_as::<i16>(pixels, width, height, roi),
        PixelType::Int32 => extract_roi_as::<i32>(pixels, width, height, roi),
    }
}

/// Typed form of [`extract_roi`].
pub fn extract_roi_as<T: Pixel>(
    pixels: &[i32],
    width: u32,
    height: u32,
    roi: Option<Roi>,
) -> Result<Raster, TileError> {
    if pixels.is_empty() {
        return Err(TileError::InvalidArgument(
            "source buffer is empty".to_string(),
        ));
    }
    let expected = width as usize * height as usize;
    if pixels.len() != expected {
        return Err(TileError::InvalidArgument(format!(
            "source buffer holds {} pixels, expected {}x{} = {}",
            pixels.len(),
            width,
            height,
            expected
        )));
    }

    let Some(roi) = roi else {
        let values: Vec<T> = pixels.iter().map(|&p| T::narrow(p)).collect();
        return Ok(Raster::new(width, height, T::into_buffer(values)));
    };

    let mut values = vec![T::default(); roi.area()?];
    let src_width = width as usize;
    let dst_width = roi.width as usize;

    if let (Some((row_start, row_end)), Some((col_start, col_end))) =
        (roi.row_span(height), roi.column_span(width))
    {
        // Destination column of the first copied source column
        let dst_col = (col_start as i64 - i64::from(roi.x)) as usize;
        for src_row in row_start..row_end {
            let dst_row = (src_row as i64 - i64::from(roi.y)) as usize;
            let src = &pixels[src_row * src_width + col_start..src_row * src_width + col_end];
            let dst_offset = dst_row * dst_width + dst_col;
            let dst = &mut values[dst_offset..dst_offset + src.len()];
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = T::narrow(s);
            }
        }
    }

    Ok(Raster::new(
        roi.width as u32,
        roi.height as u32,
        T::into_buffer(values),
    ))
}
