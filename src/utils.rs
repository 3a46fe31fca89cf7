//! Utility functions for binary I/O

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ============================================================================
// SCALAR PACKING (LITTLE-ENDIAN)
// ============================================================================

/// Pack signed 32-bit integers, 4 bytes each, in input order
pub fn pack_i32(values: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Pack IEEE-754 doubles, 8 bytes each, in input order
pub fn pack_f64(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[inline]
pub(crate) fn write_u16_le<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

#[inline]
pub(crate) fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

#[inline]
pub(crate) fn read_u16_le<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

#[inline]
pub(crate) fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[inline]
pub(crate) fn read_i32_le<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

#[inline]
pub(crate) fn read_f64_le<R: Read>(reader: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

// ============================================================================
// INPUT
// ============================================================================

/// Check the first two bytes for the gzip magic
pub(crate) fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Open a text input (plain or gzipped, detected by content)
pub(crate) fn open_text_reader(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let open = || {
        File::open(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to open input file '{}': {}", path.display(), e),
            )
        })
    };

    if is_gzipped(path)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(open()?))))
    } else {
        Ok(Box::new(BufReader::new(open()?)))
    }
}
