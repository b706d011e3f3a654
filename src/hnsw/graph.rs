//! HNSW graph structure and configuration.
//!
//! [`GraphConfig`] carries the shape parameters fixed at construction plus the
//! mutable `ef_search` knob. [`HnswGraph`] stores vectors in a contiguous f32
//! arena with parallel arrays for neighbor lists, layer assignments, and
//! soft-delete flags. The graph is bounded by `max_elements`; it never grows
//! past that without an explicit [`resize`](HnswGraph::resize).

use crate::config;
use crate::distance::DistanceKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration parameters for an HNSW graph.
///
/// Everything except `ef_search` is fixed once the first node is inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Number of bidirectional links per node (except layer 0, which uses `m_max0`).
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Distance function for similarity computation.
    pub distance_kind: DistanceKind,
    /// Seed for deterministic layer assignment.
    pub seed: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            m: config::DEFAULT_M,
            m_max0: config::DEFAULT_M * 2,
            ef_construction: config::DEFAULT_EF_CONSTRUCTION,
            ef_search: config::DEFAULT_EF_SEARCH,
            max_layers: config::MAX_LAYERS,
            distance_kind: DistanceKind::L2,
            seed: 0,
        }
    }
}

/// Bounded HNSW graph over raw f32 vectors.
///
/// Vectors are stored verbatim so they can be read back bit-exact. Deleted
/// nodes keep their slot, vector, and graph links; they are skipped as search
/// results but still traversed for navigation.
#[derive(Debug, Serialize, Deserialize)]
pub struct HnswGraph {
    pub(crate) config: GraphConfig,
    // f32 arena: node_count * dimension entries, contiguous
    pub(crate) vectors: Vec<f32>,
    // [node_id][layer][neighbor_ids]
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    pub(crate) layers: Vec<u8>,
    pub(crate) deleted: Vec<bool>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    pub(crate) dimension: usize,
    pub(crate) max_elements: usize,
    pub(crate) node_count: u32,
    pub(crate) deleted_count: usize,
}

/// Portable software prefetch hint (L1 cache, read).
/// No-op on unsupported platforms.
#[inline(always)]
fn prefetch_read(ptr: *const u8) {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!(
            "prfm pldl1keep, [{ptr}]",
            ptr = in(reg) ptr,
            options(nostack, preserves_flags)
        );
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_mm_prefetch(ptr as *const i8, std::arch::x86_64::_MM_HINT_T0);
    }
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    let _ = ptr;
}

impl HnswGraph {
    /// Creates an empty graph for `dimension`-sized vectors, bounded at
    /// `max_elements` nodes.
    pub fn new(dimension: usize, max_elements: usize, config: GraphConfig) -> Self {
        Self {
            config,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_layer: 0,
            dimension,
            max_elements,
            node_count: 0,
            deleted_count: 0,
        }
    }

    /// Total number of stored nodes, deleted included.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.node_count as usize
    }

    /// Number of non-deleted nodes.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.element_count() - self.deleted_count
    }

    /// Number of soft-deleted nodes.
    #[inline]
    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    /// Maximum number of nodes the graph will accept before a resize.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_elements
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.element_count() >= self.max_elements
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The stored vector for a node. O(1) slice into the contiguous arena.
    #[inline]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Distance from `query` to the node's stored vector.
    #[inline]
    pub(crate) fn distance_to(&self, query: &[f32], id: u32) -> f32 {
        self.config.distance_kind.distance(query, self.vector(id))
    }

    /// Prefetch a node's vector into L1 cache.
    /// Pulls a second cache line for vectors longer than 16 floats.
    #[inline(always)]
    pub(crate) fn prefetch_vector(&self, id: u32) {
        let start = id as usize * self.dimension;
        if start < self.vectors.len() {
            let ptr = self.vectors[start..].as_ptr() as *const u8;
            prefetch_read(ptr);
            if self.dimension > 16 {
                prefetch_read(unsafe { ptr.add(64) });
            }
        }
    }

    /// Layer for the node that will be inserted next.
    ///
    /// Exponentially distributed, derived from the construction seed and the
    /// node's position so that identical build sequences produce identical
    /// graphs.
    pub(crate) fn next_level(&self) -> usize {
        let stream = self.config.seed ^ u64::from(self.node_count).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(stream);
        let ml = config::LEVEL_MULTIPLIER / (self.config.m as f64).ln();
        let r: f64 = rng.gen();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Mark a node as deleted. Returns `true` if the flag actually flipped.
    pub fn mark_deleted(&mut self, id: u32) -> bool {
        let slot = &mut self.deleted[id as usize];
        if *slot {
            false
        } else {
            *slot = true;
            self.deleted_count += 1;
            true
        }
    }

    /// Clear a node's deleted flag. Returns `true` if the flag actually flipped.
    pub fn unmark_deleted(&mut self, id: u32) -> bool {
        let slot = &mut self.deleted[id as usize];
        if *slot {
            *slot = false;
            self.deleted_count -= 1;
            true
        } else {
            false
        }
    }

    /// Raise the node bound to `new_max_elements`.
    ///
    /// The caller guarantees `new_max_elements >= element_count()`. Storage is
    /// reserved eagerly so subsequent inserts do not reallocate the arena.
    pub fn resize(&mut self, new_max_elements: usize) {
        self.max_elements = new_max_elements;
        let nodes = self.element_count();
        if new_max_elements > nodes {
            let extra = new_max_elements - nodes;
            self.vectors.reserve(extra * self.dimension);
            self.neighbors.reserve(extra);
            self.layers.reserve(extra);
            self.deleted.reserve(extra);
        }
    }

    /// Append a node's storage (vector, empty neighbor lists up to `level`,
    /// layer assignment, live flag). Graph linking is the inserter's job.
    pub(crate) fn push_node(&mut self, vector: &[f32], level: usize) -> u32 {
        debug_assert!(!self.is_full());
        debug_assert_eq!(vector.len(), self.dimension);
        let id = self.node_count;
        self.vectors.extend_from_slice(vector);
        let mut layer_neighbors = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            layer_neighbors.push(Vec::new());
        }
        self.neighbors.push(layer_neighbors);
        self.layers.push(level as u8);
        self.deleted.push(false);
        self.node_count += 1;
        id
    }

    /// Check internal invariants after deserialization.
    ///
    /// Verifies parallel-array lengths, the deleted counter, the node bound,
    /// and that the entry point and every neighbor id are in bounds.
    pub fn validate(&self) -> Result<(), String> {
        let nc = self.element_count();

        if self.dimension == 0 {
            return Err("dimension is zero".into());
        }
        if nc > self.max_elements {
            return Err(format!(
                "node_count {} exceeds max_elements {}",
                nc, self.max_elements
            ));
        }
        if self.vectors.len() != nc * self.dimension {
            return Err(format!(
                "vector arena length {} != node_count({}) * dimension({})",
                self.vectors.len(),
                nc,
                self.dimension
            ));
        }
        if self.neighbors.len() != nc {
            return Err(format!("neighbors length {} != node_count {}", self.neighbors.len(), nc));
        }
        if self.layers.len() != nc {
            return Err(format!("layers length {} != node_count {}", self.layers.len(), nc));
        }
        if self.deleted.len() != nc {
            return Err(format!("deleted length {} != node_count {}", self.deleted.len(), nc));
        }

        let flagged = self.deleted.iter().filter(|&&d| d).count();
        if flagged != self.deleted_count {
            return Err(format!(
                "deleted_count {} != flagged nodes {}",
                self.deleted_count, flagged
            ));
        }

        match self.entry_point {
            None if nc > 0 => return Err("entry_point missing on non-empty graph".into()),
            Some(ep) if ep as usize >= nc => {
                return Err(format!("entry_point {} >= node_count {}", ep, nc));
            }
            _ => {}
        }

        for (node_id, node_neighbors) in self.neighbors.iter().enumerate() {
            for (layer, layer_neighbors) in node_neighbors.iter().enumerate() {
                for &neighbor in layer_neighbors {
                    if neighbor as usize >= nc {
                        return Err(format!(
                            "neighbor {} out of bounds (node_count={}) at node {} layer {}",
                            neighbor, nc, node_id, layer
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(capacity: usize) -> HnswGraph {
        HnswGraph::new(4, capacity, GraphConfig::default())
    }

    #[test]
    fn test_empty_graph_counts() {
        let g = graph(10);
        assert_eq!(g.element_count(), 0);
        assert_eq!(g.live_count(), 0);
        assert_eq!(g.deleted_count(), 0);
        assert_eq!(g.capacity(), 10);
        assert!(!g.is_full());
    }

    #[test]
    fn test_push_node_and_vector_roundtrip() {
        let mut g = graph(10);
        let id = g.push_node(&[1.0, 2.0, 3.0, 4.0], 0);
        assert_eq!(id, 0);
        assert_eq!(g.vector(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(g.element_count(), 1);
    }

    #[test]
    fn test_mark_unmark_transitions() {
        let mut g = graph(10);
        g.push_node(&[0.0; 4], 0);

        assert!(g.mark_deleted(0));
        assert_eq!(g.deleted_count(), 1);
        assert_eq!(g.live_count(), 0);
        // Re-marking is a no-op and must not double-count
        assert!(!g.mark_deleted(0));
        assert_eq!(g.deleted_count(), 1);

        assert!(g.unmark_deleted(0));
        assert_eq!(g.deleted_count(), 0);
        assert!(!g.unmark_deleted(0));
        assert_eq!(g.deleted_count(), 0);
    }

    #[test]
    fn test_is_full_and_resize() {
        let mut g = graph(1);
        g.push_node(&[0.0; 4], 0);
        assert!(g.is_full());
        g.resize(3);
        assert!(!g.is_full());
        assert_eq!(g.capacity(), 3);
    }

    #[test]
    fn test_next_level_deterministic() {
        let a = graph(10);
        let b = graph(10);
        assert_eq!(a.next_level(), b.next_level());
    }

    #[test]
    fn test_next_level_within_bounds() {
        let mut g = graph(1000);
        for i in 0..200 {
            let level = g.next_level();
            assert!(level < g.config.max_layers, "level {level} out of bounds");
            g.push_node(&[i as f32; 4], level);
        }
    }

    #[test]
    fn test_validate_ok_empty() {
        assert!(graph(10).validate().is_ok());
    }

    #[test]
    fn test_validate_catches_bad_deleted_count() {
        let mut g = graph(10);
        g.push_node(&[0.0; 4], 0);
        g.entry_point = Some(0);
        g.deleted_count = 3;
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_catches_arena_mismatch() {
        let mut g = graph(10);
        g.push_node(&[0.0; 4], 0);
        g.entry_point = Some(0);
        g.vectors.pop();
        assert!(g.validate().is_err());
    }
}
