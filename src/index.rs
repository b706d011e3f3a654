//! The vector index facade.
//!
//! [`VectorIndex`] owns one HNSW graph behind a single-writer/multi-reader
//! lock and speaks the caller's vocabulary: stable u64 labels in, ascending
//! `(label, distance)` pairs out. It enforces the boundary contracts the
//! engine assumes — dimension, unit norm for cosine, label uniqueness,
//! capacity — and reports every failure as a typed [`IndexError`].
//!
//! Handles are cheap to clone and share state. Read operations (search,
//! introspection, export) take the read lock; mutations (insert, delete,
//! undelete, resize, ef changes) take the write lock, so a resize can never
//! relocate storage under an in-flight search.

use crate::config;
use crate::distance::{norm_sq, DistanceKind};
use crate::error::{IndexError, Result};
use crate::export::PointIter;
use crate::hnsw::{knn_search, GraphConfig, HnswGraph};
use crate::persistence;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Construction-time parameters for a fresh index.
///
/// Irrelevant when loading a snapshot — the snapshot carries its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Bidirectional links per graph node. Higher = better recall, more memory.
    pub m: usize,
    /// Candidate list width during construction.
    pub ef_construction: usize,
    /// Seed for deterministic layer assignment.
    pub seed: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            m: config::DEFAULT_M,
            ef_construction: config::DEFAULT_EF_CONSTRUCTION,
            seed: 0,
        }
    }
}

/// A single search hit: the point's label and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub label: u64,
    pub distance: f32,
}

/// Index state behind the handle's lock: the graph plus the label maps.
///
/// Internal ids are dense (`0..element_count`) and assigned at insertion;
/// `internal_to_label` is indexed by internal id.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexData {
    pub(crate) graph: HnswGraph,
    pub(crate) label_to_internal: HashMap<u64, u32>,
    pub(crate) internal_to_label: Vec<u64>,
}

impl IndexData {
    /// Check cross-structure invariants after deserialization.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        self.graph.validate()?;

        let nc = self.graph.element_count();
        if self.internal_to_label.len() != nc {
            return Err(format!(
                "internal_to_label length {} != node_count {}",
                self.internal_to_label.len(),
                nc
            ));
        }
        if self.label_to_internal.len() != nc {
            return Err(format!(
                "label_to_internal size {} != node_count {} (duplicate or missing labels)",
                self.label_to_internal.len(),
                nc
            ));
        }
        for (internal, &label) in self.internal_to_label.iter().enumerate() {
            match self.label_to_internal.get(&label) {
                Some(&mapped) if mapped as usize == internal => {}
                _ => {
                    return Err(format!(
                        "label map asymmetry at internal id {internal} (label {label})"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A persistent, mutable approximate-nearest-neighbor index over f32 vectors.
///
/// Points are addressed by caller-assigned u64 labels. Deletion is soft: a
/// deleted point keeps its slot and vector, disappears from search results,
/// and can be restored with [`unmark_deleted`](VectorIndex::unmark_deleted).
///
/// Cloning the handle shares the underlying index; drop the last handle to
/// free it.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    pub(crate) data: Arc<RwLock<IndexData>>,
}

/// Boundary validation shared by insert and search.
fn check_vector(dimension: usize, kind: DistanceKind, vector: &[f32]) -> Result<()> {
    if vector.len() != dimension {
        return Err(IndexError::ShapeMismatch {
            expected: dimension,
            got: vector.len(),
        });
    }
    if kind.requires_unit_norm() {
        let nsq = norm_sq(vector);
        if (nsq - 1.0).abs() > config::UNIT_NORM_EPSILON {
            return Err(IndexError::NotNormalized { norm: nsq.sqrt() });
        }
    }
    Ok(())
}

impl VectorIndex {
    /// Create an empty index.
    ///
    /// `capacity` bounds live + deleted points until [`resize`](Self::resize)
    /// is called. Fails on a zero or oversized dimension, zero capacity, or
    /// degenerate construction parameters.
    pub fn new(
        dimension: usize,
        capacity: usize,
        distance_kind: DistanceKind,
        options: IndexOptions,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidParameters("dimension must be positive".into()));
        }
        if dimension > config::MAX_DIMENSION {
            return Err(IndexError::InvalidParameters(format!(
                "dimension {dimension} exceeds maximum {}",
                config::MAX_DIMENSION
            )));
        }
        if capacity == 0 {
            return Err(IndexError::InvalidParameters("capacity must be positive".into()));
        }
        if options.m < 2 {
            return Err(IndexError::InvalidParameters("m must be at least 2".into()));
        }
        if options.ef_construction == 0 {
            return Err(IndexError::InvalidParameters(
                "ef_construction must be positive".into(),
            ));
        }

        let graph_config = GraphConfig {
            m: options.m,
            m_max0: options.m * 2,
            ef_construction: options.ef_construction,
            ef_search: config::DEFAULT_EF_SEARCH,
            max_layers: config::MAX_LAYERS,
            distance_kind,
            seed: options.seed,
        };

        tracing::debug!(dimension, capacity, %distance_kind, "created index");

        Ok(Self {
            data: Arc::new(RwLock::new(IndexData {
                graph: HnswGraph::new(dimension, capacity, graph_config),
                label_to_internal: HashMap::new(),
                internal_to_label: Vec::new(),
            })),
        })
    }

    /// Create an empty index with default construction parameters.
    pub fn with_defaults(
        dimension: usize,
        capacity: usize,
        distance_kind: DistanceKind,
    ) -> Result<Self> {
        Self::new(dimension, capacity, distance_kind, IndexOptions::default())
    }

    /// Restore an index from a snapshot written by [`save`](Self::save).
    ///
    /// The requested dimension and distance kind are checked against the
    /// snapshot; a mismatch is an error, never silent reinterpretation.
    /// All failures (missing file, bad checksum, undecodable payload, broken
    /// invariants) come back as errors — no load path aborts the process.
    pub fn load(
        path: impl AsRef<Path>,
        dimension: usize,
        distance_kind: DistanceKind,
    ) -> Result<Self> {
        let data = persistence::load(path.as_ref(), dimension, distance_kind)?;
        Ok(Self {
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Write a snapshot of the full index state — every point, deleted flags
    /// included — to `path`, atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        persistence::save(&self.data.read(), path.as_ref())
    }

    // ── Mutation ───────────────────────────────────────────────────────

    /// Insert a point.
    ///
    /// Labels are never updated in place: reinserting an existing label is
    /// rejected with [`IndexError::DuplicateLabel`]. A full index rejects
    /// with [`IndexError::CapacityExceeded`]; call [`resize`](Self::resize)
    /// and retry.
    pub fn insert(&self, vector: &[f32], label: u64) -> Result<()> {
        let mut data = self.data.write();
        check_vector(data.graph.dimension(), data.graph.config.distance_kind, vector)?;
        if data.label_to_internal.contains_key(&label) {
            return Err(IndexError::DuplicateLabel(label));
        }
        if data.graph.is_full() {
            return Err(IndexError::CapacityExceeded {
                capacity: data.graph.capacity(),
            });
        }

        let internal = data.graph.insert(vector);
        debug_assert_eq!(internal as usize, data.internal_to_label.len());
        data.label_to_internal.insert(label, internal);
        data.internal_to_label.push(label);
        Ok(())
    }

    /// Soft-delete the point with this label.
    ///
    /// The point keeps its slot and vector and disappears from search
    /// results. Deleting an already-deleted point is a no-op. Unknown labels
    /// are rejected with [`IndexError::LabelNotFound`].
    pub fn mark_deleted(&self, label: u64) -> Result<()> {
        let mut data = self.data.write();
        let internal = *data
            .label_to_internal
            .get(&label)
            .ok_or(IndexError::LabelNotFound(label))?;
        data.graph.mark_deleted(internal);
        Ok(())
    }

    /// Restore a soft-deleted point to search eligibility.
    ///
    /// Restoring a live point is a no-op. Unknown labels are rejected with
    /// [`IndexError::LabelNotFound`].
    pub fn unmark_deleted(&self, label: u64) -> Result<()> {
        let mut data = self.data.write();
        let internal = *data
            .label_to_internal
            .get(&label)
            .ok_or(IndexError::LabelNotFound(label))?;
        data.graph.unmark_deleted(internal);
        Ok(())
    }

    /// Grow the index to hold up to `new_capacity` points.
    ///
    /// Shrinking below the current element count (deleted included) is
    /// rejected. Runs under the write lock, so no search observes the
    /// reallocation.
    pub fn resize(&self, new_capacity: usize) -> Result<()> {
        if new_capacity == 0 {
            return Err(IndexError::InvalidParameters("capacity must be positive".into()));
        }
        let mut data = self.data.write();
        let current = data.graph.element_count();
        if new_capacity < current {
            return Err(IndexError::InvalidResize {
                requested: new_capacity,
                current,
            });
        }
        data.graph.resize(new_capacity);
        Ok(())
    }

    /// Adjust the search-time quality/speed trade-off.
    ///
    /// Takes effect for all subsequent searches. Values below 1 are clamped.
    pub fn set_ef_search(&self, ef: usize) {
        self.data.write().graph.config.ef_search = ef.max(1);
    }

    // ── Query ──────────────────────────────────────────────────────────

    /// Approximate k-nearest-neighbor search.
    ///
    /// Returns up to `k` neighbors ordered by ascending distance, deleted
    /// points excluded. Fewer than `k` come back when fewer live points
    /// exist; an empty index yields an empty vec. Malformed queries (wrong
    /// dimension, non-unit cosine vector) are errors, distinct from "no
    /// results".
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let data = self.data.read();
        check_vector(data.graph.dimension(), data.graph.config.distance_kind, query)?;

        let hits = knn_search(&data.graph, query, k);
        Ok(hits
            .into_iter()
            .map(|(distance, internal)| Neighbor {
                label: data.internal_to_label[internal as usize],
                distance,
            })
            .collect())
    }

    // ── Introspection ──────────────────────────────────────────────────

    /// Total number of stored points, deleted included.
    pub fn count(&self) -> usize {
        self.data.read().graph.element_count()
    }

    /// Maximum number of points the index holds before a resize is needed.
    pub fn capacity(&self) -> usize {
        self.data.read().graph.capacity()
    }

    /// Number of soft-deleted points.
    pub fn deleted_count(&self) -> usize {
        self.data.read().graph.deleted_count()
    }

    /// The fixed vector dimension.
    pub fn dimension(&self) -> usize {
        self.data.read().graph.dimension()
    }

    /// The index's distance kind.
    pub fn distance_kind(&self) -> DistanceKind {
        self.data.read().graph.config.distance_kind
    }

    /// Current ef_search value.
    pub fn ef_search(&self) -> usize {
        self.data.read().graph.config.ef_search
    }

    /// `true` if no points have ever been inserted.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether a point with this label exists (deleted or live).
    pub fn contains(&self, label: u64) -> bool {
        self.data.read().label_to_internal.contains_key(&label)
    }

    /// The stored vector for a label, or `None` for unknown labels.
    ///
    /// Soft-deleted points remain retrievable here: deletion hides a point
    /// from search, it does not forget its data.
    pub fn vector_by_label(&self, label: u64) -> Option<Vec<f32>> {
        let data = self.data.read();
        let internal = *data.label_to_internal.get(&label)?;
        Some(data.graph.vector(internal).to_vec())
    }

    /// Batch lookup of stored vectors. Unknown labels are skipped.
    pub fn vectors_by_labels(&self, labels: &[u64]) -> HashMap<u64, Vec<f32>> {
        let data = self.data.read();
        labels
            .iter()
            .filter_map(|&label| {
                let internal = *data.label_to_internal.get(&label)?;
                Some((label, data.graph.vector(internal).to_vec()))
            })
            .collect()
    }

    /// Label and deleted flag at an internal position, or `None` outside
    /// `[0, count)`.
    ///
    /// Positions are dense and stable for the life of this index, but carry
    /// no identity across save/load cycles — use labels for that.
    pub fn element_by_position(&self, position: usize) -> Option<(u64, bool)> {
        let data = self.data.read();
        let &label = data.internal_to_label.get(position)?;
        Some((label, data.graph.is_deleted(position as u32)))
    }

    /// Stored vector at an internal position, or `None` outside `[0, count)`.
    pub fn vector_by_position(&self, position: usize) -> Option<Vec<f32>> {
        let data = self.data.read();
        if position >= data.graph.element_count() {
            return None;
        }
        Some(data.graph.vector(position as u32).to_vec())
    }

    /// Iterate every stored point by internal position, deleted included.
    ///
    /// See [`PointIter`] for locking and progress semantics.
    pub fn iter_points(&self) -> PointIter {
        PointIter::new(Arc::clone(&self.data))
    }
}
