//! # vecindex
//!
//! An embeddable, persistent HNSW approximate nearest neighbor index with
//! soft deletes and stable u64 labels.
//!
//! ## Features
//!
//! - **HNSW vector search** over raw f32 vectors — stored data reads back
//!   bit-exact, results come back in ascending distance order
//! - **Soft deletes** that hide points from search while keeping their data
//!   retrievable and restorable
//! - **Bounded capacity** with explicit, data-preserving resize
//! - **Snapshot persistence** with CRC32 integrity checks and atomic writes
//! - **Bulk export** by internal position for migration pipelines
//! - **Typed errors** on every fallible operation; no entry point aborts
//!
//! ## Architecture
//!
//! ```text
//! VectorIndex (handle, RwLock) → { label ↔ internal id maps }
//!                              → HnswGraph { f32 arena, layered links, deleted flags }
//! Persistence: bincode snapshot + CRC32 footer + atomic rename
//! ```
//!
//! ## Example
//!
//! ```
//! use vecindex::{DistanceKind, VectorIndex};
//!
//! let index = VectorIndex::with_defaults(3, 100, DistanceKind::L2)?;
//! index.insert(&[0.0, 1.0, 2.0], 7)?;
//! let hits = index.search(&[0.0, 1.0, 2.0], 1)?;
//! assert_eq!(hits[0].label, 7);
//! # Ok::<(), vecindex::IndexError>(())
//! ```

/// Global configuration constants: construction defaults and validation limits.
pub mod config;
/// Distance kinds and the exact f32 kernels behind them.
pub mod distance;
/// Error type and crate-wide `Result` alias.
pub mod error;
/// Bulk export: position-ordered point iteration.
pub mod export;
/// HNSW approximate nearest neighbor engine: graph, insertion, search.
pub mod hnsw;
/// The vector index facade: handle, label maps, operation contracts.
pub mod index;
/// Snapshot persistence: bincode payload, CRC32 footer, atomic writes.
pub mod persistence;

pub use distance::{normalize, DistanceKind};
pub use error::{IndexError, Result};
pub use export::{PointIter, PointRecord};
pub use index::{IndexOptions, Neighbor, VectorIndex};
