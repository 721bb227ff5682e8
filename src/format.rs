//! .slab Binary File Format
//!
//! # File Structure
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     4       u32 LE      Magic: 0x26872687
//! 0x04     4       u32 LE      Version (1)
//! 0x08     8       u64 LE      N: Number of vectors
//! 0x10     8       u64 LE      D: Dimensions
//! 0x18     8       u64 LE      C: Capacity in vectors
//! 0x20     96      [u8; 96]    Reserved / zero pad
//! 0x80     C*D*4   [f32]       Vector data (Little Endian, row-major)
//! ─────────────────────────────────────────────
//! ```
//!
//! The header occupies exactly 128 bytes, so the data region starts f32-aligned
//! at a fixed offset. Only the first `N * D * 4` data bytes are defined; the
//! remainder up to `C * D * 4` is reserved for future appends.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

/// Magic number identifying a .slab file
pub const SLAB_MAGIC: u32 = 0x2687_2687;

/// Current format version
pub const SLAB_VERSION: u32 = 1;

/// Header size in bytes: magic(4) + version(4) + count(8) + dim(8) + capacity(8) + pad(96)
pub const HEADER_SIZE: usize = 128;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("invalid slab magic: {found:#010x}")]
    InvalidMagic { found: u32 },

    #[error("unsupported slab version: {0}")]
    UnsupportedVersion(u32),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Parsed .slab file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabHeader {
    pub count: u64,
    pub dim: u64,
    pub capacity: u64,
}

impl SlabHeader {
    /// Parse header from raw bytes (first 128 bytes of file)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file too small for slab header",
            )));
        }

        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != SLAB_MAGIC {
            return Err(FormatError::InvalidMagic { found: magic });
        }

        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != SLAB_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let count = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let dim = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let capacity = u64::from_le_bytes(bytes[24..32].try_into().unwrap());

        Ok(Self {
            count,
            dim,
            capacity,
        })
    }

    /// Write header to bytes (exactly 128 bytes, reserved region zeroed)
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&SLAB_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&SLAB_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.dim.to_le_bytes());
        buf[24..32].copy_from_slice(&self.capacity.to_le_bytes());
        // bytes 32..128 are reserved (zero)
        buf
    }

    /// Calculate byte offset for a vector by row index
    #[inline(always)]
    pub fn row_offset(&self, index: usize) -> usize {
        HEADER_SIZE + index * self.dim as usize * std::mem::size_of::<f32>()
    }

    /// Logical size of the defined data region in bytes
    pub fn data_len(&self) -> usize {
        self.count as usize * self.dim as usize * std::mem::size_of::<f32>()
    }

    /// Physical file size implied by the header
    pub fn file_len(&self) -> usize {
        HEADER_SIZE + self.capacity as usize * self.dim as usize * std::mem::size_of::<f32>()
    }
}

/// Read and validate the header of a .slab file without mapping it.
///
/// Lets callers discover `dim` (and count/capacity) before a full
/// [`MatrixSlab::open`](crate::slab::MatrixSlab::open).
pub fn probe<P: AsRef<Path>>(path: P) -> Result<SlabHeader, FormatError> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf)?;
    SlabHeader::from_bytes(&buf)
}
