//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor engine.
//!
//! This is the graph engine underneath [`VectorIndex`](crate::index::VectorIndex).
//! Vectors are stored as raw f32 in a contiguous arena so stored data reads
//! back bit-exact. The graph is bounded: it holds at most `max_elements`
//! nodes (live + soft-deleted) until resized. Soft-deleted nodes stay in the
//! graph for navigation but are excluded from search results.

/// Graph structure, configuration, and node storage.
pub mod graph;
/// Insertion with bidirectional connections and heuristic pruning.
pub mod insert;
/// Layered greedy search returning ascending-distance results.
pub mod search;
/// Generation-stamped visited set for graph traversal.
pub mod visited;

pub use graph::{GraphConfig, HnswGraph};
pub use search::knn_search;
