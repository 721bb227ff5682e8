//! Compute device seam for the search engine
//!
//! The engine is written against the small set of accelerator capabilities
//! brute-force scoring needs: a resident row buffer with per-row squared
//! norms, and a batched scoring pass computing `−2 · Xᵀ · Q` (GEMM with
//! α = −2, β = 0) followed by a per-cell norm correction. Backends are
//! swappable behind this trait without engine changes; the crate ships
//! [`CpuDevice`](super::CpuDevice) as the reference implementation, and a
//! CUDA backend slots in the same way.
//!
//! All buffer space is allocated once when the device is created, sized for
//! `capacity` rows and `batch_capacity` queries, and released on drop. Every
//! operation blocks the caller until the device has completed it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device allocation failed: {0}")]
    Alloc(String),

    #[error("device copy failed: {0}")]
    Copy(String),

    #[error("kernel launch failed: {0}")]
    Launch(String),

    #[error("device synchronize failed: {0}")]
    Sync(String),
}

/// Resident row storage plus the scoring kernels of one compute backend
pub trait Device: Send {
    /// Vector dimension the buffers were sized for
    fn dim(&self) -> usize;

    /// Maximum number of resident rows
    fn capacity(&self) -> usize;

    /// Maximum number of queries per scoring pass
    fn batch_capacity(&self) -> usize;

    /// Bulk-transfer `count` rows from `rows` into slots `0..count` and
    /// recompute their squared norms. Must accept `count = 0`.
    fn load(&mut self, rows: &[f32], count: usize) -> Result<(), DeviceError>;

    /// Store a single row and its host-computed squared norm at slot `at`.
    fn store_row(&mut self, at: usize, vector: &[f32], norm: f32) -> Result<(), DeviceError>;

    /// Score `q_norms.len()` flattened queries against rows `0..count`.
    ///
    /// Writes the full score matrix into `out`, column-major with leading
    /// dimension `count`: `out[col * count + row]` holds
    /// `‖x_row‖² + ‖q_col‖² − 2 · x_row · q_col`, the squared L2 distance up
    /// to f32 cancellation. `out` must hold exactly `count * q_norms.len()`
    /// elements.
    fn score(
        &mut self,
        queries: &[f32],
        q_norms: &[f32],
        count: usize,
        out: &mut [f32],
    ) -> Result<(), DeviceError>;
}

/// Factory for creating device backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceKind {
    /// Rayon-parallel host execution
    #[default]
    Cpu,
}

impl DeviceKind {
    /// Allocate a device of this kind, with buffers sized for `capacity`
    /// rows and `batch_capacity` queries of `dim` floats each.
    pub fn create(
        &self,
        dim: usize,
        capacity: usize,
        batch_capacity: usize,
    ) -> Result<Box<dyn Device>, DeviceError> {
        match self {
            DeviceKind::Cpu => Ok(Box::new(super::cpu::CpuDevice::new(
                dim,
                capacity,
                batch_capacity,
            ))),
        }
    }
}
