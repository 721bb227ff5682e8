//! SlabDB – Embeddable vector database: mmap-backed vector storage, a
//! replayable id log, and brute-force exact k-NN search
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              FlatIndex (exact top-k, GEMM-style)            │
//! │      device-resident rows · norm cache · batched search     │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   MatrixSlab (mmap .slab)    │     IdSlab (.wal replay)     │
//! │   append-only f32 matrix     │     user id ↔ row mapping    │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! The three components compose bottom-up and are deliberately independent:
//! a write appends to the matrix, inserts into the id log, then pushes the
//! same vector into the index, in that order, with no shared transaction.
//! A query runs against the index and yields row indices the caller can
//! translate back to user ids. Each component is single-threaded from the
//! caller's perspective; share across threads only with external
//! serialization.

pub mod format;
pub mod idslab;
pub mod index;
pub mod simd;
pub mod slab;

pub use format::{probe, SlabHeader};
pub use idslab::IdSlab;
pub use index::{FlatIndex, SearchResult};
pub use slab::MatrixSlab;
