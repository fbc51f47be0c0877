//! Binary format of persisted tiles.
//!
//! # Layout
//!
//! ```text
//! offset 0   width   i32 little endian
//! offset 4   height  i32 little endian
//! offset 8   pixels  width * height elements, row-major,
//!                    element_width bytes each (1, 2 or 4)
//! ```
//!
//! The element width is not stored; readers must ask for the same pixel type
//! the file was written with. There is no magic number or version field.
//!
//! Writes go to a uniquely named sibling file that is renamed over the target
//! once complete, so a reader can never open a partially written tile.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

use crate::error::TileError;
use crate::raster::{Pixel, PixelType, Raster, Roi};

/// Size of the width/height header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Suffix of in-progress temporary files.
pub const TEMP_FILE_SUFFIX: &str = "tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Header
// =============================================================================

/// Header information of a cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheHeader {
    pub width: u32,
    pub height: u32,
    /// Total file length in bytes
    pub file_len: u64,
}

impl CacheHeader {
    /// Number of body bytes following the header.
    pub fn body_len(&self) -> u64 {
        self.file_len.saturating_sub(HEADER_SIZE as u64)
    }

    /// Number of pixels declared by the header.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Body length the header declares for `pixel_type`.
    pub fn expected_body_len(&self, pixel_type: PixelType) -> u64 {
        self.pixel_count() * pixel_type.element_width() as u64
    }

    /// Whether the body is exactly as long as the header declares for `pixel_type`.
    pub fn is_complete_for(&self, pixel_type: PixelType) -> bool {
        self.body_len() == self.expected_body_len(pixel_type)
    }

    /// Describe how the body length differs from the declared one, if it does.
    pub fn body_mismatch(&self, pixel_type: PixelType) -> Option<String> {
        let expected = self.expected_body_len(pixel_type);
        let actual = self.body_len();
        if actual == expected {
            return None;
        }
        let relation = if actual < expected { "shorter" } else { "longer" };
        Some(format!(
            "body is {} bytes, {} than the {} bytes {}x{} {} needs",
            actual, relation, expected, self.width, self.height, pixel_type
        ))
    }

    /// Element width implied by the body length, if it is one of 1, 2 or 4.
    pub fn inferred_element_width(&self) -> Option<usize> {
        let pixels = self.pixel_count();
        if pixels == 0 {
            return None;
        }
        [1usize, 2, 4]
            .into_iter()
            .find(|&w| self.body_len() == pixels * w as u64)
    }
}

fn parse_header(path: &Path, bytes: &[u8], file_len: u64) -> Result<CacheHeader, TileError> {
    if bytes.len() < HEADER_SIZE {
        return Err(TileError::corrupt(
            path,
            format!("file is {} bytes, header needs {}", bytes.len(), HEADER_SIZE),
        ));
    }
    let mut buf = &bytes[..HEADER_SIZE];
    let width = buf.get_i32_le();
    let height = buf.get_i32_le();
    if width < 0 || height < 0 {
        return Err(TileError::corrupt(
            path,
            format!("negative dimensions {width}x{height}"),
        ));
    }
    Ok(CacheHeader {
        width: width as u32,
        height: height as u32,
        file_len,
    })
}

/// Read only the header of a cache file.
pub fn read_header(path: &Path) -> Result<CacheHeader, TileError> {
    let mut file = File::open(path).map_err(|e| TileError::io(path, e))?;
    let file_len = file_len(&file, path)?;
    let mut bytes = [0u8; HEADER_SIZE];
    let read = read_up_to(&mut file, &mut bytes).map_err(|e| TileError::io(path, e))?;
    parse_header(path, &bytes[..read], file_len)
}

// =============================================================================
// Write
// =============================================================================

/// Encode a tile into its on-disk representation.
pub fn encode(width: u32, height: u32, pixels: &[i32], pixel_type: PixelType) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + pixels.len() * pixel_type.element_width());
    buf.put_i32_le(width as i32);
    buf.put_i32_le(height as i32);
    match pixel_type {
        PixelType::Byte => pixels.iter().for_each(|&p| buf.put_u8(p as u8)),
        PixelType::UInt16 => pixels.iter().for_each(|&p| buf.put_u16_le(p as u16)),
        PixelType::Int16 => pixels.iter().for_each(|&p| buf.put_i16_le(p as i16)),
        PixelType::Int32 => pixels.iter().for_each(|&p| buf.put_i32_le(p)),
    }
    buf
}

/// Persist a full decoded component to `path`.
///
/// The data lands in a temporary sibling first and is renamed into place, so
/// `path` either does not exist or holds a complete tile.
pub fn write(
    path: &Path,
    width: u32,
    height: u32,
    pixels: &[i32],
    pixel_type: PixelType,
) -> Result<(), TileError> {
    let expected = width as usize * height as usize;
    if pixels.len() != expected {
        return Err(TileError::InvalidArgument(format!(
            "cannot write {} pixels as a {}x{} tile",
            pixels.len(),
            width,
            height
        )));
    }

    let encoded = encode(width, height, pixels, pixel_type);
    let temp_path = temp_path_for(path);

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(TileError::io(path, e));
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.{}.{}", std::process::id(), seq, TEMP_FILE_SUFFIX));
    path.with_file_name(name)
}

// =============================================================================
// Read
// =============================================================================

/// Read a tile, either whole or restricted to `roi`.
pub fn read(path: &Path, roi: Option<Roi>, pixel_type: PixelType) -> Result<Raster, TileError> {
    match roi {
        Some(roi) => read_roi(path, roi, pixel_type),
        None => read_full(path, pixel_type),
    }
}

/// Read the complete tile.
pub fn read_full(path: &Path, pixel_type: PixelType) -> Result<Raster, TileError> {
    match pixel_type {
        PixelType::Byte => read_full_as::<u8>(path),
        PixelType::UInt16 => read_full_as::<u16>(path),
        PixelType::Int16 => read_full_as::<i16>(path),
        PixelType::Int32 => read_full_as::<i32>(path),
    }
}

/// Read only the cells of `roi`, seeking row by row.
pub fn read_roi(path: &Path, roi: Roi, pixel_type: PixelType) -> Result<Raster, TileError> {
    match pixel_type {
        PixelType::Byte => read_roi_as::<u8>(path, roi),
        PixelType::UInt16 => read_roi_as::<u16>(path, roi),
        PixelType::Int16 => read_roi_as::<i16>(path, roi),
        PixelType::Int32 => read_roi_as::<i32>(path, roi),
    }
}

fn read_full_as<T: Pixel>(path: &Path) -> Result<Raster, TileError> {
    let bytes = std::fs::read(path).map_err(|e| TileError::io(path, e))?;
    let header = parse_header(path, &bytes, bytes.len() as u64)?;
    let elem = T::TYPE.element_width();

    if let Some(reason) = header.body_mismatch(T::TYPE) {
        return Err(TileError::corrupt(path, reason));
    }

    let values: Vec<T> = bytes[HEADER_SIZE..]
        .chunks_exact(elem)
        .map(T::from_le_slice)
        .collect();
    Ok(Raster::new(header.width, header.height, T::into_buffer(values)))
}

fn read_roi_as<T: Pixel>(path: &Path, roi: Roi) -> Result<Raster, TileError> {
    let mut values = vec![T::default(); roi.area()?];

    let mut file = File::open(path).map_err(|e| TileError::io(path, e))?;
    let file_len = file_len(&file, path)?;
    let mut header_bytes = [0u8; HEADER_SIZE];
    let read = read_up_to(&mut file, &mut header_bytes).map_err(|e| TileError::io(path, e))?;
    let header = parse_header(path, &header_bytes[..read], file_len)?;

    let elem = T::TYPE.element_width();
    let src_width = header.width as u64;
    let dst_width = roi.width as usize;

    if let (Some((row_start, row_end)), Some((col_start, col_end))) =
        (roi.row_span(header.height), roi.column_span(header.width))
    {
        let dst_col = (col_start as i64 - i64::from(roi.x)) as usize;
        let span = col_end - col_start;
        let mut row_bytes = vec![0u8; span * elem];

        for src_row in row_start..row_end {
            let offset = HEADER_SIZE as u64 + (src_row as u64 * src_width + col_start as u64) * elem as u64;
            if offset >= file_len {
                break;
            }
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| TileError::io(path, e))?;
            let read = read_up_to(&mut file, &mut row_bytes).map_err(|e| TileError::io(path, e))?;

            let dst_row = (src_row as i64 - i64::from(roi.y)) as usize;
            let dst_offset = dst_row * dst_width + dst_col;
            // A short read leaves the rest of the row at zero
            for (d, chunk) in values[dst_offset..dst_offset + span]
                .iter_mut()
                .zip(row_bytes[..read].chunks_exact(elem))
            {
                *d = T::from_le_slice(chunk);
            }
        }
    }

    Ok(Raster::new(
        roi.width as u32,
        roi.height as u32,
        T::into_buffer(values),
    ))
}

fn file_len(file: &File, path: &Path) -> Result<u64, TileError> {
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| TileError::io(path, e))
}

/// Fill `buf` as far as the file allows, returning the number of bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// =============================================================================
// Tests
// =============================================================================
