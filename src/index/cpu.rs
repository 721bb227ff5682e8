//! Reference CPU compute device
//!
//! Executes the scoring contract on the host: the rayon thread pool stands
//! in for the accelerator, the calling thread blocks until each pass
//! completes. The GEMM and the norm-correction kernel are fused into a
//! single pass per score cell; queries are read in place and scores written
//! straight to the caller's buffer, so no staging copies are needed.

use rayon::prelude::*;

use crate::simd::{dot_product, squared_norm};

use super::device::{Device, DeviceError};

/// Host-resident row and norm buffers plus a fused scoring pass
pub struct CpuDevice {
    dim: usize,
    capacity: usize,
    batch_capacity: usize,
    rows: Vec<f32>,
    norms: Vec<f32>,
}

impl CpuDevice {
    /// Allocate row and norm buffers for `capacity` rows of `dim` floats.
    pub fn new(dim: usize, capacity: usize, batch_capacity: usize) -> Self {
        Self {
            dim,
            capacity,
            batch_capacity,
            rows: vec![0.0; capacity * dim],
            norms: vec![0.0; capacity],
        }
    }
}

impl Device for CpuDevice {
    fn dim(&self) -> usize {
        self.dim
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    fn load(&mut self, rows: &[f32], count: usize) -> Result<(), DeviceError> {
        if count > self.capacity {
            return Err(DeviceError::Copy(format!(
                "bulk load of {} rows exceeds device capacity {}",
                count, self.capacity
            )));
        }
        let len = count * self.dim;
        if rows.len() < len {
            return Err(DeviceError::Copy(format!(
                "source view holds {} floats, need {}",
                rows.len(),
                len
            )));
        }

        self.rows[..len].copy_from_slice(&rows[..len]);

        let dim = self.dim;
        let row_buf = &self.rows;
        self.norms[..count]
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, norm)| {
                *norm = squared_norm(&row_buf[i * dim..(i + 1) * dim]);
            });
        Ok(())
    }

    fn store_row(&mut self, at: usize, vector: &[f32], norm: f32) -> Result<(), DeviceError> {
        if at >= self.capacity {
            return Err(DeviceError::Copy(format!(
                "row slot {} out of range for capacity {}",
                at, self.capacity
            )));
        }
        if vector.len() != self.dim {
            return Err(DeviceError::Copy(format!(
                "row of {} floats does not match dim {}",
                vector.len(),
                self.dim
            )));
        }

        let start = at * self.dim;
        self.rows[start..start + self.dim].copy_from_slice(vector);
        self.norms[at] = norm;
        Ok(())
    }

    fn score(
        &mut self,
        queries: &[f32],
        q_norms: &[f32],
        count: usize,
        out: &mut [f32],
    ) -> Result<(), DeviceError> {
        let num_queries = q_norms.len();
        if out.len() != count * num_queries {
            return Err(DeviceError::Launch(format!(
                "score buffer holds {} cells, need {}",
                out.len(),
                count * num_queries
            )));
        }
        if count == 0 || num_queries == 0 {
            return Ok(());
        }

        let dim = self.dim;
        let rows = &self.rows[..count * dim];
        let norms = &self.norms[..count];

        out.par_chunks_mut(count)
            .enumerate()
            .for_each(|(col, scores)| {
                let q = &queries[col * dim..(col + 1) * dim];
                let q_norm = q_norms[col];
                for (row, cell) in scores.iter_mut().enumerate() {
                    let x = &rows[row * dim..(row + 1) * dim];
                    *cell = -2.0 * dot_product(x, q) + norms[row] + q_norm;
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::l2_distance_squared;

    #[test]
    fn test_load_computes_norms() {
        let mut device = CpuDevice::new(2, 10, 4);
        device.load(&[3.0, 4.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(device.norms[0], 25.0);
        assert_eq!(device.norms[1], 1.0);
    }

    #[test]
    fn test_load_zero_rows() {
        let mut device = CpuDevice::new(4, 10, 4);
        device.load(&[], 0).unwrap();
    }

    #[test]
    fn test_load_over_capacity() {
        let mut device = CpuDevice::new(2, 1, 4);
        let result = device.load(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(matches!(result, Err(DeviceError::Copy(_))));
    }

    #[test]
    fn test_store_row_out_of_range() {
        let mut device = CpuDevice::new(2, 1, 4);
        device.store_row(0, &[1.0, 2.0], 5.0).unwrap();
        let result = device.store_row(1, &[1.0, 2.0], 5.0);
        assert!(matches!(result, Err(DeviceError::Copy(_))));
    }

    #[test]
    fn test_score_matches_direct_distance() {
        let mut device = CpuDevice::new(3, 8, 4);
        let rows = [
            1.0f32, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.5, 0.5, 0.5,
        ];
        device.load(&rows, 3).unwrap();

        let queries = [0.9f32, 0.1, 0.0, 0.0, 0.0, 1.0];
        let q_norms: Vec<f32> = queries.chunks(3).map(squared_norm).collect();
        let mut out = vec![0.0f32; 3 * 2];
        device.score(&queries, &q_norms, 3, &mut out).unwrap();

        // Column-major with leading dimension count=3.
        for col in 0..2 {
            let q = &queries[col * 3..(col + 1) * 3];
            for row in 0..3 {
                let x = &rows[row * 3..(row + 1) * 3];
                let expected = l2_distance_squared(x, q);
                let got = out[col * 3 + row];
                assert!(
                    (expected - got).abs() < 1e-4,
                    "row {} col {}: expected {}, got {}",
                    row,
                    col,
                    expected,
                    got
                );
            }
        }
    }

    #[test]
    fn test_score_empty_db() {
        let mut device = CpuDevice::new(3, 8, 4);
        let mut out = [0.0f32; 0];
        device
            .score(&[1.0, 2.0, 3.0], &[14.0], 0, &mut out)
            .unwrap();
    }
}
