//! Brute-force exact k-NN search engine
//!
//! Mirrors the matrix slab on a compute device and answers batched top-k
//! queries under squared L2 distance. For each database row `x` and query
//! `q` the score is `‖x‖² + ‖q‖² − 2·x·q`: row norms are computed once at
//! load (or append) time, query norms per search, and the cross-product
//! comes from a GEMM-style pass on the device (see [`Device::score`]).
//!
//! Results identify vectors by **matrix row index**, not user id —
//! translating rows back to user ids is the caller's job via
//! [`IdSlab`](crate::idslab::IdSlab). Scores are squared distances and may
//! be slightly negative when a query nearly equals a stored row (f32
//! cancellation); rankings remain correct and no clamping is applied.
//!
//! The caller chunks query batches to at most
//! [`batch_capacity`](FlatIndex::batch_capacity) per search (default
//! [`DEFAULT_BATCH_CAPACITY`]); exceeding it is a precondition violation,
//! while appending past row capacity is a recoverable error.

mod cpu;
mod device;

pub use cpu::CpuDevice;
pub use device::{Device, DeviceError, DeviceKind};

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::simd::squared_norm;

/// Default maximum number of queries per search call
pub const DEFAULT_BATCH_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index full: capacity {capacity} reached")]
    CapacityExceeded { capacity: usize },

    #[error("query batch too large: {queries} > {capacity}")]
    BatchOverflow { queries: usize, capacity: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("matrix view of {len} floats is not a whole number of {dim}-float rows")]
    RaggedView { len: usize, dim: usize },

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

/// One ranked search hit: a matrix row index and its squared L2 distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub row: u64,
    pub score: f32,
}

/// Exact top-k engine over a device-resident copy of the vector matrix
pub struct FlatIndex {
    device: Box<dyn Device>,
    count: usize,
}

impl FlatIndex {
    /// Create an index on the default CPU device, sized for `capacity` rows
    /// of `dim` floats and batches of [`DEFAULT_BATCH_CAPACITY`] queries.
    pub fn new(dim: usize, capacity: usize) -> Result<Self, IndexError> {
        let device = DeviceKind::Cpu.create(dim, capacity, DEFAULT_BATCH_CAPACITY)?;
        Ok(Self::with_device(device))
    }

    /// Create an index on an already-constructed device.
    pub fn with_device(device: Box<dyn Device>) -> Self {
        Self { device, count: 0 }
    }

    /// Number of indexed rows
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Maximum number of rows
    #[inline]
    pub fn capacity(&self) -> usize {
        self.device.capacity()
    }

    /// Vector dimension
    #[inline]
    pub fn dim(&self) -> usize {
        self.device.dim()
    }

    /// Maximum queries per search call
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.device.batch_capacity()
    }

    /// Replace the device contents with a contiguous row-major view, e.g.
    /// [`MatrixSlab::vectors`](crate::slab::MatrixSlab::vectors).
    ///
    /// One bulk transfer; row norms are recomputed on the device.
    pub fn load(&mut self, view: &[f32]) -> Result<(), IndexError> {
        let dim = self.device.dim();
        if dim == 0 || view.len() % dim != 0 {
            return Err(IndexError::RaggedView {
                len: view.len(),
                dim,
            });
        }

        let count = view.len() / dim;
        if count > self.device.capacity() {
            return Err(IndexError::CapacityExceeded {
                capacity: self.device.capacity(),
            });
        }

        self.device.load(view, count)?;
        self.count = count;
        tracing::debug!(rows = count, "loaded vectors into search device");
        Ok(())
    }

    /// Append one vector to the device-resident copy.
    ///
    /// Fails with a recoverable capacity error when the index is full.
    pub fn append(&mut self, vector: &[f32]) -> Result<(), IndexError> {
        let dim = self.device.dim();
        if vector.len() != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        if self.count == self.device.capacity() {
            return Err(IndexError::CapacityExceeded {
                capacity: self.device.capacity(),
            });
        }

        let norm = squared_norm(vector);
        self.device.store_row(self.count, vector, norm)?;
        self.count += 1;
        Ok(())
    }

    /// Batched exact top-k search.
    ///
    /// Returns, per query, the `min(k, count)` rows of smallest squared L2
    /// distance in ascending order, ties broken by ascending row index. An
    /// empty index yields an empty list per query.
    pub fn search(
        &mut self,
        queries: &[Vec<f32>],
        k: usize,
    ) -> Result<Vec<Vec<SearchResult>>, IndexError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let batch_capacity = self.device.batch_capacity();
        if queries.len() > batch_capacity {
            return Err(IndexError::BatchOverflow {
                queries: queries.len(),
                capacity: batch_capacity,
            });
        }

        let dim = self.device.dim();
        for query in queries {
            if query.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                });
            }
        }

        if self.count == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }

        let mut flat = Vec::with_capacity(queries.len() * dim);
        let mut q_norms = Vec::with_capacity(queries.len());
        for query in queries {
            flat.extend_from_slice(query);
            q_norms.push(squared_norm(query));
        }

        let mut scores = vec![0.0f32; self.count * queries.len()];
        self.device.score(&flat, &q_norms, self.count, &mut scores)?;

        let take = k.min(self.count);
        Ok(scores
            .chunks(self.count)
            .map(|column| select_smallest(column, take))
            .collect())
    }

    /// Single-query convenience wrapper over [`search`](Self::search).
    pub fn search_one(&mut self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        let mut results = self.search(std::slice::from_ref(&query.to_vec()), k)?;
        Ok(results.pop().unwrap_or_default())
    }
}

#[derive(Clone, Copy)]
struct Candidate {
    score: f32,
    row: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.row == other.row
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.row.cmp(&other.row))
    }
}

/// Select the `k` smallest entries of one score column, ascending by
/// (score, row). Max-heap of the best `k` so far; the peek is the current
/// worst and is evicted by any strictly smaller candidate.
fn select_smallest(column: &[f32], k: usize) -> Vec<SearchResult> {
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
    for (row, &score) in column.iter().enumerate() {
        let candidate = Candidate { score, row };
        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(&worst) = heap.peek() {
            if candidate < worst {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|candidate| SearchResult {
            row: candidate.row as u64,
            score: candidate.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::l2_distance_squared;

    fn index_with_rows(dim: usize, rows: &[&[f32]]) -> FlatIndex {
        let mut index = FlatIndex::new(dim, 64).unwrap();
        for row in rows {
            index.append(row).unwrap();
        }
        index
    }

    #[test]
    fn test_exact_search_ordering() {
        let mut index = index_with_rows(
            4,
            &[
                &[1.0, 0.0, 0.0, 0.0],
                &[0.0, 1.0, 0.0, 0.0],
                &[1.0, 1.0, 0.0, 0.0],
            ],
        );

        let results = index.search_one(&[1.0, 0.0, 0.0, 0.0], 3).unwrap();
        let rows: Vec<u64> = results.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![0, 2, 1]);

        assert!(results[0].score.abs() < 1e-3);
        assert!((results[1].score - 1.0).abs() < 1e-3);
        assert!((results[2].score - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_top1_of_stored_vector_is_itself() {
        let rows: Vec<Vec<f32>> = (0..20)
            .map(|i| (0..8).map(|j| ((i * 8 + j) as f32 * 0.37).sin()).collect())
            .collect();
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let mut index = index_with_rows(8, &refs);

        for (i, row) in rows.iter().enumerate() {
            let results = index.search_one(row, 1).unwrap();
            assert_eq!(results[0].row, i as u64);
            assert!(results[0].score.abs() <= 1e-3 * squared_norm(row).max(1.0));
        }
    }

    #[test]
    fn test_k_larger_than_count() {
        let mut index = index_with_rows(2, &[&[1.0, 0.0], &[0.0, 1.0]]);
        let results = index.search_one(&[1.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_empty_index() {
        let mut index = FlatIndex::new(4, 16).unwrap();
        let results = index
            .search(&[vec![0.0; 4], vec![1.0, 0.0, 0.0, 0.0]], 5)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_empty_batch() {
        let mut index = index_with_rows(2, &[&[1.0, 0.0]]);
        assert!(index.search(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_batch_overflow() {
        let mut index = FlatIndex::new(2, 16).unwrap();
        index.append(&[1.0, 0.0]).unwrap();

        let queries = vec![vec![0.0f32, 0.0]; DEFAULT_BATCH_CAPACITY + 1];
        let result = index.search(&queries, 1);
        assert!(matches!(
            result,
            Err(IndexError::BatchOverflow {
                queries: 101,
                capacity: 100
            })
        ));
    }

    #[test]
    fn test_append_capacity_exceeded() {
        let mut index = FlatIndex::new(2, 2).unwrap();
        index.append(&[1.0, 0.0]).unwrap();
        index.append(&[0.0, 1.0]).unwrap();

        let result = index.append(&[1.0, 1.0]);
        assert!(matches!(
            result,
            Err(IndexError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let mut index = index_with_rows(4, &[&[1.0, 0.0, 0.0, 0.0]]);
        let result = index.search_one(&[1.0, 0.0], 1);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_load_replaces_contents() {
        let mut index = FlatIndex::new(2, 16).unwrap();
        index.append(&[9.0, 9.0]).unwrap();

        index.load(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(index.count(), 3);

        let results = index.search_one(&[0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].row, 1);
    }

    #[test]
    fn test_load_ragged_view() {
        let mut index = FlatIndex::new(4, 16).unwrap();
        let result = index.load(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            result,
            Err(IndexError::RaggedView { len: 3, dim: 4 })
        ));
    }

    #[test]
    fn test_tie_break_by_row_index() {
        let mut index = index_with_rows(2, &[&[1.0, 0.0], &[1.0, 0.0], &[1.0, 0.0]]);
        let results = index.search_one(&[1.0, 0.0], 2).unwrap();
        let rows: Vec<u64> = results.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![0, 1]);
    }

    #[test]
    fn test_rows_within_query_are_distinct_and_sorted() {
        let rows: Vec<Vec<f32>> = (0..32)
            .map(|i| (0..4).map(|j| ((i + j) as f32 * 0.61).cos()).collect())
            .collect();
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let mut index = index_with_rows(4, &refs);

        let results = index.search_one(&[0.2, -0.4, 0.6, -0.8], 10).unwrap();
        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert!(pair[0].score <= pair[1].score);
            assert_ne!(pair[0].row, pair[1].row);
        }
    }

    #[test]
    fn test_scores_match_reference_distance() {
        let rows: Vec<Vec<f32>> = (0..16)
            .map(|i| (0..6).map(|j| ((i * 6 + j) as f32 * 0.11).sin()).collect())
            .collect();
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let mut index = index_with_rows(6, &refs);

        let query = vec![0.3f32, -0.1, 0.5, 0.2, -0.7, 0.4];
        let results = index.search_one(&query, 16).unwrap();

        for result in results {
            let expected = l2_distance_squared(&rows[result.row as usize], &query);
            assert!(
                (expected - result.score).abs() <= expected.max(1.0) * 1e-3,
                "row {}: expected {}, got {}",
                result.row,
                expected,
                result.score
            );
        }
    }

    #[test]
    fn test_select_smallest_k_zero() {
        assert!(select_smallest(&[1.0, 2.0], 0).is_empty());
    }
}
