//! HNSW search: single-layer greedy search and multi-layer KNN.
//!
//! Results come back ordered by ascending distance (closest first). Deleted
//! nodes are traversed for navigation but never returned. When many nodes
//! are deleted the layer-0 pass adaptively widens ef until it has k results
//! or runs out of graph.

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::VisitedSet;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::collections::BinaryHeap;

thread_local! {
    /// Per-thread VisitedSet reused across searches to avoid the O(n)
    /// allocation on every query.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// A traversal candidate: (negative distance, internal id).
/// BinaryHeap is a max-heap; negating the distance makes it pop closest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry: (distance, internal id). Max-heap by distance so the
/// worst kept result is always on top, ready to be evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Search a single layer of the graph.
///
/// Returns up to `ef` non-deleted nodes closest to `query` at `layer`,
/// ascending by distance. `visited` is reset at the start of each call.
pub(crate) fn search_layer(
    graph: &HnswGraph,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.reset();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst kept distance, avoids heap peeks in the hot loop
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.visit(ep) {
            let dist = graph.distance_to(query, ep);
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                id: ep,
            });
            if !graph.is_deleted(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: ep,
                });
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;

        // Closest remaining candidate is worse than the worst result: done
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        let node_id = candidate.id as usize;
        if layer >= graph.neighbors[node_id].len() {
            continue;
        }

        let neighbor_list = &graph.neighbors[node_id][layer];
        for i in 0..neighbor_list.len() {
            let neighbor_id = neighbor_list[i];

            if i + 1 < neighbor_list.len() {
                graph.prefetch_vector(neighbor_list[i + 1]);
            }

            if !visited.visit(neighbor_id) {
                continue;
            }

            let dist = graph.distance_to(query, neighbor_id);

            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                if !graph.is_deleted(neighbor_id) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor_id,
                    });
                    if results.len() > ef {
                        results.pop(); // evict worst
                    }
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Multi-layer KNN search.
///
/// Greedy ef=1 descent through the upper layers, then a full ef-wide pass at
/// layer 0. Returns up to `k` `(distance, internal_id)` pairs, ascending by
/// distance, deleted nodes excluded. When layer 0 yields fewer than `k`
/// (heavily deleted regions), ef is doubled up to 4× before giving up.
pub fn knn_search(graph: &HnswGraph, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    let entry_point = match graph.entry_point {
        Some(ep) => ep,
        None => return Vec::new(),
    };
    if k == 0 {
        return Vec::new();
    }

    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.grow(graph.element_count());

        let mut current_ep = entry_point;
        for layer in (1..=graph.max_layer).rev() {
            let results = search_layer(
                graph,
                query,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, nearest)) = results.first() {
                current_ep = nearest;
            }
        }

        let base_ef = graph.config.ef_search.max(k);
        let max_ef = (base_ef * 4).min(graph.element_count());
        let mut ef = base_ef;
        let mut results;

        loop {
            results = search_layer(
                graph,
                query,
                std::slice::from_ref(&current_ep),
                ef,
                0,
                &mut visited,
            );

            if results.len() >= k || ef >= max_ef {
                break;
            }

            ef = (ef * 2).min(max_ef);
        }

        results.truncate(k);
        results
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::{GraphConfig, HnswGraph};

    fn build_line_graph(n: usize) -> HnswGraph {
        let mut g = HnswGraph::new(2, n, GraphConfig::default());
        for i in 0..n {
            g.insert(&[i as f32, 0.0]);
        }
        g
    }

    #[test]
    fn test_search_empty_graph() {
        let g = HnswGraph::new(2, 10, GraphConfig::default());
        assert!(knn_search(&g, &[0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_search_k_zero() {
        let g = build_line_graph(10);
        assert!(knn_search(&g, &[0.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_search_returns_ascending_distances() {
        let g = build_line_graph(50);
        let results = knn_search(&g, &[25.0, 0.0], 10);
        assert_eq!(results.len(), 10);
        for w in results.windows(2) {
            assert!(w[0].0 <= w[1].0, "distances must be ascending: {:?}", results);
        }
        assert_eq!(results[0].1, 25);
    }

    #[test]
    fn test_search_fewer_live_than_k() {
        let g = build_line_graph(3);
        let results = knn_search(&g, &[0.0, 0.0], 10);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_search_skips_deleted() {
        let mut g = build_line_graph(20);
        g.mark_deleted(5);
        let results = knn_search(&g, &[5.0, 0.0], 20);
        assert!(results.iter().all(|&(_, id)| id != 5));
        assert_eq!(results.len(), 19);
    }

    #[test]
    fn test_search_deleted_entry_point_still_navigates() {
        let mut g = build_line_graph(20);
        let ep = g.entry_point.unwrap();
        g.mark_deleted(ep);
        let results = knn_search(&g, &[10.0, 0.0], 5);
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|&(_, id)| id != ep));
    }

    #[test]
    fn test_search_widens_ef_over_deleted_regions() {
        let mut g = build_line_graph(100);
        // Delete a dense block around the query
        for id in 40..60u32 {
            g.mark_deleted(id);
        }
        let results = knn_search(&g, &[50.0, 0.0], 30);
        assert_eq!(results.len(), 30);
        assert!(results.iter().all(|&(_, id)| !(40..60).contains(&id)));
    }
}
