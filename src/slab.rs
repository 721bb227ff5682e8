//! Memory-mapped matrix slab
//!
//! A durable, append-only, row-major matrix of f32 vectors backed by a single
//! .slab file (see [`crate::format`] for the on-disk layout). The file is
//! mapped shared-writable; appends copy vector bytes into the next free row
//! slot and then bump the header count, so a torn append is invisible to
//! readers. When the slab is full the file is truncated to twice its row
//! capacity and remapped.
//!
//! # Durability
//!
//! Appends rely on OS page writeback; there is no per-append fsync. A crash
//! may lose recently appended rows that have no corresponding id-log record.
//! The id log is the authority on liveness: on startup, callers should clamp
//! the count to one past the highest row the log still references (see
//! [`MatrixSlab::clamp_count`]). [`MatrixSlab::flush`] msyncs the mapping for
//! callers that want stronger guarantees at shutdown.
//!
//! # Safety
//!
//! Byte-to-float conversion goes through `bytemuck::try_cast_slice` with
//! alignment checks; the 128-byte header keeps the data region f32-aligned.
//! Growth replaces the mapping, so any slice obtained from an accessor is
//! invalidated by a subsequent append — refetch after any append that may
//! have grown the file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::MmapMut;
use thiserror::Error;

use crate::format::{FormatError, SlabHeader, HEADER_SIZE};

/// Row capacity of a freshly created slab
pub const INITIAL_CAPACITY: u64 = 1000;

#[derive(Error, Debug)]
pub enum SlabError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("row index out of bounds: {index} >= {count}")]
    RowOutOfBounds { index: usize, count: usize },

    #[error("alignment error: data region not aligned to f32 (4 bytes)")]
    AlignmentError,
}

/// Growable memory-mapped store of row-major f32 vectors
pub struct MatrixSlab {
    file: File,
    mmap: MmapMut,
    header: SlabHeader,
}

impl MatrixSlab {
    /// Open a .slab file, creating and initializing it if absent.
    ///
    /// For a new file the header is written with the provided `dim`, zero
    /// count, and [`INITIAL_CAPACITY`] rows. For an existing file the header
    /// is authoritative and `dim` is ignored; use [`crate::format::probe`]
    /// to discover the stored dimension first. A magic or version mismatch
    /// fails with a corruption error.
    pub fn open<P: AsRef<Path>>(path: P, dim: usize) -> Result<Self, SlabError> {
        let path = path.as_ref();
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if is_new {
            let header = SlabHeader {
                count: 0,
                dim: dim as u64,
                capacity: INITIAL_CAPACITY,
            };
            file.set_len(header.file_len() as u64)?;
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            mmap[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
            tracing::debug!(dim, capacity = INITIAL_CAPACITY, "created matrix slab");
            return Ok(Self { file, mmap, header });
        }

        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE {
            return Err(SlabError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file too small for slab header",
            )));
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let header = SlabHeader::from_bytes(&mmap)?;
        if len < header.file_len() {
            return Err(SlabError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "slab truncated: header implies {} bytes, file has {}",
                    header.file_len(),
                    len
                ),
            )));
        }

        Ok(Self { file, mmap, header })
    }

    /// Append one vector, growing the file if the slab is full.
    ///
    /// Returns the row index the vector was stored at. The count is advanced
    /// only after the row bytes are in place.
    pub fn append(&mut self, vector: &[f32]) -> Result<u64, SlabError> {
        let dim = self.header.dim as usize;
        if vector.len() != dim {
            return Err(SlabError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }

        if self.header.count == self.header.capacity {
            self.grow(self.header.capacity * 2)?;
        }

        let row = self.header.count;
        let start = self.header.row_offset(row as usize);
        let end = start + dim * std::mem::size_of::<f32>();
        self.mmap[start..end].copy_from_slice(bytemuck::cast_slice(vector));

        self.header.count += 1;
        self.store_header();
        Ok(row)
    }

    /// Truncate the file for `new_capacity` rows and replace the mapping.
    fn grow(&mut self, new_capacity: u64) -> Result<(), SlabError> {
        let grown = SlabHeader {
            capacity: new_capacity,
            ..self.header
        };
        self.file.set_len(grown.file_len() as u64)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.header.capacity = new_capacity;
        self.store_header();
        tracing::debug!(capacity = new_capacity, "grew matrix slab");
        Ok(())
    }

    fn store_header(&mut self) {
        self.mmap[..HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
    }

    /// Number of stored vectors
    #[inline]
    pub fn count(&self) -> u64 {
        self.header.count
    }

    /// Dimension of each vector
    #[inline]
    pub fn dim(&self) -> usize {
        self.header.dim as usize
    }

    /// Current row capacity
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.header.capacity
    }

    /// Contiguous view of all stored vectors, `count * dim` floats row-major.
    ///
    /// Invalidated by any append that grows the slab.
    pub fn vectors(&self) -> Result<&[f32], SlabError> {
        let bytes = &self.mmap[HEADER_SIZE..HEADER_SIZE + self.header.data_len()];
        bytemuck::try_cast_slice(bytes).map_err(|_| SlabError::AlignmentError)
    }

    /// Get a vector by row index
    pub fn row(&self, index: usize) -> Result<&[f32], SlabError> {
        if index as u64 >= self.header.count {
            return Err(SlabError::RowOutOfBounds {
                index,
                count: self.header.count as usize,
            });
        }

        let start = self.header.row_offset(index);
        let end = start + self.header.dim as usize * std::mem::size_of::<f32>();
        bytemuck::try_cast_slice(&self.mmap[start..end]).map_err(|_| SlabError::AlignmentError)
    }

    /// Iterate over all stored vectors in row order
    pub fn rows(&self) -> Rows<'_> {
        Rows {
            slab: self,
            index: 0,
        }
    }

    /// Lower the recorded count to `limit` if it exceeds it.
    ///
    /// Recovery hook: rows past the highest row the id log still references
    /// are uncommitted and may be overwritten by subsequent appends.
    pub fn clamp_count(&mut self, limit: u64) {
        if self.header.count > limit {
            tracing::warn!(
                from = self.header.count,
                to = limit,
                "clamping slab count to id-log high-water mark"
            );
            self.header.count = limit;
            self.store_header();
        }
    }

    /// Synchronously flush the mapping to disk.
    pub fn flush(&self) -> Result<(), SlabError> {
        self.mmap.flush()?;
        Ok(())
    }
}

/// Iterator over vectors in a slab
pub struct Rows<'a> {
    slab: &'a MatrixSlab,
    index: usize,
}

impl<'a> Iterator for Rows<'a> {
    type Item = &'a [f32];

    fn next(&mut self) -> Option<Self::Item> {
        if self.index as u64 >= self.slab.count() {
            return None;
        }
        let row = self.slab.row(self.index).ok()?;
        self.index += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slab.count() as usize - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Rows<'a> {}
