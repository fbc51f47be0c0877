//! Typed pixel buffers and region-of-interest extraction.
//!
//! The decode engine produces every component as 32-bit signed integers. The
//! types in this module describe the narrower representations a caller can ask
//! for and the raster handed back to it.
//!
//! # Narrowing
//!
//! Conversion from `i32` is a truncating cast that keeps the low-order bits:
//! `300` requested as [`PixelType::Byte`] becomes `44`, not `255`.

mod roi;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TileError;

pub use roi::{extract_roi, extract_roi_as};

// =============================================================================
// Pixel Type
// =============================================================================

/// Element type of a served raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    /// Unsigned 8-bit
    Byte,
    /// Unsigned 16-bit
    UInt16,
    /// Signed 16-bit
    Int16,
    /// Signed 32-bit
    Int32,
}

impl PixelType {
    /// All supported pixel types.
    pub const ALL: [PixelType; 4] = [
        PixelType::Byte,
        PixelType::UInt16,
        PixelType::Int16,
        PixelType::Int32,
    ];

    /// Size of one element in bytes, both in memory and in cache files.
    pub const fn element_width(self) -> usize {
        match self {
            PixelType::Byte => 1,
            PixelType::UInt16 | PixelType::Int16 => 2,
            PixelType::Int32 => 4,
        }
    }

    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            PixelType::Byte => "byte",
            PixelType::UInt16 => "uint16",
            PixelType::Int16 => "int16",
            PixelType::Int32 => "int32",
        }
    }

    /// Map a raster data buffer type code (0 = byte, 1 = ushort, 2 = short,
    /// 3 = int) to a pixel type.
    pub fn from_code(code: i32) -> Result<Self, TileError> {
        match code {
            0 => Ok(PixelType::Byte),
            1 => Ok(PixelType::UInt16),
            2 => Ok(PixelType::Int16),
            3 => Ok(PixelType::Int32),
            other => Err(TileError::UnsupportedPixelType(format!("type code {other}"))),
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelType {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "byte" | "u8" | "uint8" => Ok(PixelType::Byte),
            "uint16" | "u16" | "ushort" => Ok(PixelType::UInt16),
            "int16" | "i16" | "short" => Ok(PixelType::Int16),
            "int32" | "i32" | "int" => Ok(PixelType::Int32),
            _ => Err(TileError::UnsupportedPixelType(s.to_string())),
        }
    }
}

// =============================================================================
// Pixel Trait
// =============================================================================

/// An element type that a decoded `i32` sample can be narrowed into.
pub trait Pixel: Copy + Default + Send + 'static {
    /// The pixel type tag for this element.
    const TYPE: PixelType;

    /// Truncating conversion from the decoder's native representation.
    fn narrow(value: i32) -> Self;

    /// Decode one element from its little-endian bytes.
    ///
    /// `bytes` is exactly `TYPE.element_width()` long.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Wrap a vector of this element type.
    fn into_buffer(values: Vec<Self>) -> TypedBuffer;
}

impl Pixel for u8 {
    const TYPE: PixelType = PixelType::Byte;

    fn narrow(value: i32) -> Self {
        value as u8
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn into_buffer(values: Vec<Self>) -> TypedBuffer {
        TypedBuffer::U8(values)
    }
}

impl Pixel for u16 {
    const TYPE: PixelType = PixelType::UInt16;

    fn narrow(value: i32) -> Self {
        value as u16
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn into_buffer(values: Vec<Self>) -> TypedBuffer {
        TypedBuffer::U16(values)
    }
}

impl Pixel for i16 {
    const TYPE: PixelType = PixelType::Int16;

    fn narrow(value: i32) -> Self {
        value as i16
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn into_buffer(values: Vec<Self>) -> TypedBuffer {
        TypedBuffer::I16(values)
    }
}

impl Pixel for i32 {
    const TYPE: PixelType = PixelType::Int32;

    fn narrow(value: i32) -> Self {
        value
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn into_buffer(values: Vec<Self>) -> TypedBuffer {
        TypedBuffer::I32(values)
    }
}

// =============================================================================
// Typed Buffer
// =============================================================================

/// Pixel data in the element type requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl TypedBuffer {
    /// The element type of this buffer.
    pub fn pixel_type(&self) -> PixelType {
        match self {
            TypedBuffer::U8(_) => PixelType::Byte,
            TypedBuffer::U16(_) => PixelType::UInt16,
            TypedBuffer::I16(_) => PixelType::Int16,
            TypedBuffer::I32(_) => PixelType::Int32,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            TypedBuffer::U8(v) => v.len(),
            TypedBuffer::U16(v) => v.len(),
            TypedBuffer::I16(v) => v.len(),
            TypedBuffer::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every element back to `i32`, preserving signedness of the element type.
    pub fn to_i32_vec(&self) -> Vec<i32> {
        match self {
            TypedBuffer::U8(v) => v.iter().map(|&p| p as i32).collect(),
            TypedBuffer::U16(v) => v.iter().map(|&p| p as i32).collect(),
            TypedBuffer::I16(v) => v.iter().map(|&p| p as i32).collect(),
            TypedBuffer::I32(v) => v.clone(),
        }
    }

    /// Smallest and largest element, widened to `i32`. `None` when empty.
    pub fn value_range(&self) -> Option<(i32, i32)> {
        let values = self.to_i32_vec();
        let min = values.iter().copied().min()?;
        let max = values.iter().copied().max()?;
        Some((min, max))
    }

    /// Serialize the elements as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            TypedBuffer::U8(v) => v.clone(),
            TypedBuffer::U16(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
            TypedBuffer::I16(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
            TypedBuffer::I32(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
        }
    }
}

// =============================================================================
// Raster
// =============================================================================

/// A row-major single-band raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub data: TypedBuffer,
}

impl Raster {
    pub fn new(width: u32, height: u32, data: TypedBuffer) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn pixel_type(&self) -> PixelType {
        self.data.pixel_type()
    }
}

// =============================================================================
// Region of Interest
// =============================================================================

/// Axis-aligned pixel rectangle in coordinates of the full raster.
///
/// A region may extend past the raster; extraction clips to the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Roi {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of destination cells, rejecting negative dimensions.
    pub fn area(&self) -> Result<usize, TileError> {
        if self.width < 0 || self.height < 0 {
            return Err(TileError::InvalidArgument(format!(
                "region has negative size {}x{}",
                self.width, self.height
            )));
        }
        Ok(self.width as usize * self.height as usize)
    }

    /// Column span `[start, end)` of the source row covered by this region.
    ///
    /// Returns `None` when the region does not overlap `[0, source_width)`.
    pub(crate) fn column_span(&self, source_width: u32) -> Option<(usize, usize)> {
        let start = i64::from(self.x).max(0);
        let end = (i64::from(self.x) + i64::from(self.width)).min(i64::from(source_width));
        (start < end).then_some((start as usize, end as usize))
    }

    /// Source rows `[start, end)` covered by this region.
    pub(crate) fn row_span(&self, source_height: u32) -> Option<(usize, usize)> {
        let start = i64::from(self.y).max(0);
        let end = (i64::from(self.y) + i64::from(self.height)).min(i64::from(source_height));
        (start < end).then_some((start as usize, end as usize))
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Roi {
    type Err = TileError;

    /// Parse `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(TileError::InvalidArgument(format!(
                "expected x,y,width,height, got '{s}'"
            )));
        }
        let mut values = [0i32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                TileError::InvalidArgument(format!("'{part}' is not an integer in '{s}'"))
            })?;
        }
        let roi = Roi::new(values[0], values[1], values[2], values[3]);
        roi.area()?;
        Ok(roi)
    }
}

// =============================================================================
// Tests
// =============================================================================
