//! Binary correspondence files.
//!
//! `magic "PXMT" | version u32 | count u64` followed by `count` records of
//! four little-endian f64: left x, left y, right x, right y.

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::DVec2;

use crate::correspondence::Correspondence;
use crate::error::{Error, Result};

const MAGIC: [u8; 4] = *b"PXMT";
const VERSION: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Header {
    magic: [u8; 4],
    version: u32,
    count: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MatchRecord {
    left: [f64; 2],
    right: [f64; 2],
}

const HEADER_SIZE: usize = size_of::<Header>();
const RECORD_SIZE: usize = size_of::<MatchRecord>();

fn le(v: f64) -> f64 {
    f64::from_bits(v.to_bits().to_le())
}

pub fn write_matches(path: &Path, pairs: &[Correspondence]) -> Result<()> {
    let header = Header {
        magic: MAGIC,
        version: VERSION.to_le(),
        count: (pairs.len() as u64).to_le(),
    };
    let mut bytes = Vec::with_capacity(HEADER_SIZE + pairs.len() * RECORD_SIZE);
    bytes.extend_from_slice(bytemuck::bytes_of(&header));
    for p in pairs {
        let record = MatchRecord {
            left: [le(p.left.x), le(p.left.y)],
            right: [le(p.right.x), le(p.right.y)],
        };
        bytes.extend_from_slice(bytemuck::bytes_of(&record));
    }
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

pub fn read_matches(path: &Path) -> Result<Vec<Correspondence>> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    if bytes.len() < HEADER_SIZE {
        return Err(Error::format(path, "truncated header"));
    }
    let header: Header = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
    if header.magic != MAGIC || u32::from_le(header.version) != VERSION {
        return Err(Error::format(path, "not a match file"));
    }
    let count = u64::from_le(header.count) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != count * RECORD_SIZE {
        return Err(Error::format(
            path,
            format!("expected {count} records, found {} bytes", body.len()),
        ));
    }
    Ok(body
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let r: MatchRecord = bytemuck::pod_read_unaligned(chunk);
            Correspondence::new(
                DVec2::new(le(r.left[0]), le(r.left[1])),
                DVec2::new(le(r.right[0]), le(r.right[1])),
            )
        })
        .collect())
}
