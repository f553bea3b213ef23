//! Binary disparity raster format.
//!
//! ```text
//! header : magic "PXDF" | version u32 | width u32 | height u32 | numeric u32
//! records: width * height records, row-major
//!          float: dx f32 | dy f32 | valid u32
//!          int  : dx i32 | dy i32 | valid u32
//! ```
//! All fields little-endian.

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use super::{DisparityField, DisparityPixel};
use crate::error::{Error, Result};

const MAGIC: [u8; 4] = *b"PXDF";
const VERSION: u32 = 1;

/// Numeric type of stored offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisparityNumeric {
    /// Sub-pixel offsets.
    Float,
    /// Offsets rounded to whole pixels.
    Integer,
}

impl DisparityNumeric {
    fn code(self) -> u32 {
        match self {
            Self::Float => 0,
            Self::Integer => 1,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Float),
            1 => Some(Self::Integer),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    version: u32,
    width: u32,
    height: u32,
    numeric: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FloatRecord {
    dx: f32,
    dy: f32,
    valid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct IntRecord {
    dx: i32,
    dy: i32,
    valid: u32,
}

const HEADER_SIZE: usize = size_of::<Header>();
const RECORD_SIZE: usize = size_of::<FloatRecord>();

pub fn write_disparity(path: &Path, field: &DisparityField, numeric: DisparityNumeric) -> Result<()> {
    let header = Header {
        magic: MAGIC,
        version: VERSION.to_le(),
        width: (field.width() as u32).to_le(),
        height: (field.height() as u32).to_le(),
        numeric: numeric.code().to_le(),
    };

    let mut bytes = Vec::with_capacity(HEADER_SIZE + field.pixels().len() * RECORD_SIZE);
    bytes.extend_from_slice(bytemuck::bytes_of(&header));
    for p in field.pixels().iter() {
        let valid = u32::from(p.valid).to_le();
        match numeric {
            DisparityNumeric::Float => {
                let record = FloatRecord {
                    dx: f32::from_bits(p.offset.x.to_bits().to_le()),
                    dy: f32::from_bits(p.offset.y.to_bits().to_le()),
                    valid,
                };
                bytes.extend_from_slice(bytemuck::bytes_of(&record));
            }
            DisparityNumeric::Integer => {
                let record = IntRecord {
                    dx: (p.offset.x.round() as i32).to_le(),
                    dy: (p.offset.y.round() as i32).to_le(),
                    valid,
                };
                bytes.extend_from_slice(bytemuck::bytes_of(&record));
            }
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

pub fn read_disparity(path: &Path) -> Result<DisparityField> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    decode(&bytes).map_err(|reason| Error::format(path, reason))
}

fn decode(bytes: &[u8]) -> std::result::Result<DisparityField, String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!("truncated header ({} bytes)", bytes.len()));
    }
    let header: Header = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
    if header.magic != MAGIC {
        return Err("bad magic".to_string());
    }
    if u32::from_le(header.version) != VERSION {
        return Err(format!("unsupported version {}", u32::from_le(header.version)));
    }
    let numeric = DisparityNumeric::from_code(u32::from_le(header.numeric))
        .ok_or_else(|| format!("unknown numeric code {}", u32::from_le(header.numeric)))?;
    let width = u32::from_le(header.width) as usize;
    let height = u32::from_le(header.height) as usize;

    let body = &bytes[HEADER_SIZE..];
    let expected = width * height * RECORD_SIZE;
    if body.len() != expected {
        return Err(format!(
            "expected {expected} bytes of records for {width}x{height}, found {}",
            body.len()
        ));
    }

    let pixels = body
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| match numeric {
            DisparityNumeric::Float => {
                let r: FloatRecord = bytemuck::pod_read_unaligned(chunk);
                DisparityPixel {
                    offset: Vec2::new(
                        f32::from_bits(u32::from_le(r.dx.to_bits())),
                        f32::from_bits(u32::from_le(r.dy.to_bits())),
                    ),
                    valid: u32::from_le(r.valid) != 0,
                }
            }
            DisparityNumeric::Integer => {
                let r: IntRecord = bytemuck::pod_read_unaligned(chunk);
                DisparityPixel {
                    offset: Vec2::new(i32::from_le(r.dx) as f32, i32::from_le(r.dy) as f32),
                    valid: u32::from_le(r.valid) != 0,
                }
            }
        })
        .collect();

    Ok(DisparityField::from_buffer(common::Buffer2::new(
        width, height, pixels,
    )))
}
