//! HNSW insertion.
//!
//! Inserts a vector into the graph with bidirectional connections and
//! heuristic neighbor pruning (Algorithm 4 from the HNSW paper). The caller
//! is responsible for capacity and duplicate checks; the graph only wires
//! the new node in.

use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;

impl HnswGraph {
    /// Insert a vector as a new node and return its internal id.
    ///
    /// Ids are dense: the n-th inserted node gets id n-1. The graph must not
    /// be full and `vector.len()` must equal the graph dimension.
    pub(crate) fn insert(&mut self, vector: &[f32]) -> u32 {
        let level = self.next_level();

        // First node: store it and make it the entry point
        if self.entry_point.is_none() {
            let id = self.push_node(vector, level);
            self.entry_point = Some(id);
            self.max_layer = level;
            return id;
        }

        let entry_point = self
            .entry_point
            .expect("entry_point is Some after is_none() guard");
        let mut current_ep = entry_point;

        let mut visited = VisitedSet::with_capacity(self.element_count());

        // Phase 1: greedy descent from the top layer down to level + 1
        for layer in (level + 1..=self.max_layer).rev() {
            let results = search_layer(
                self,
                vector,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
            );
            if let Some(&(_, nearest)) = results.first() {
                current_ep = nearest;
            }
        }

        // Phase 2: search each layer the node participates in and pick its
        // neighbors before the node itself is stored
        let top = level.min(self.max_layer);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];

        let mut layer_eps: Vec<u32> = vec![current_ep];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
            );

            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };

            let selected = select_neighbors_heuristic(self, &candidates, m_max);
            node_neighbors[layer] = selected.iter().map(|&(_, id)| id).collect();

            // Entry points for the next (lower) layer
            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, id)| id));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        let internal_id = self.push_node(vector, level);
        self.neighbors[internal_id as usize] = node_neighbors;

        // Phase 3: backlinks, pruning any neighbor that goes over capacity
        for layer in 0..=top {
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };

            let my_neighbors: Vec<u32> = self.neighbors[internal_id as usize][layer].clone();
            for &neighbor_id in &my_neighbors {
                let nid = neighbor_id as usize;

                // A neighbor found at this layer may predate it structurally
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(internal_id);

                if self.neighbors[nid][layer].len() > m_max {
                    let base: Vec<f32> = self.vector(neighbor_id).to_vec();
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&cid| (self.distance_to(&base, cid), cid))
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, m_max);
                    self.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(internal_id);
        }

        internal_id
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// A candidate is kept only if it is closer to the base node than to any
/// already-selected neighbor. This avoids redundant clusters of
/// near-identical neighbors and keeps the graph navigable. Remaining slots
/// are filled with the closest unused candidates.
fn select_neighbors_heuristic(
    graph: &HnswGraph,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    let metric = graph.config.distance_kind;

    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }

        let cid_vec = graph.vector(cid);
        let is_diverse = selected.iter().all(|&(_, sid)| {
            let dist_to_selected = metric.distance(cid_vec, graph.vector(sid));
            dist_to_base <= dist_to_selected
        });

        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        let selected_ids: std::collections::HashSet<u32> =
            selected.iter().map(|&(_, id)| id).collect();
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected_ids.contains(&cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::GraphConfig;
    use crate::hnsw::search::knn_search;

    fn make_graph(capacity: usize) -> HnswGraph {
        HnswGraph::new(4, capacity, GraphConfig::default())
    }

    #[test]
    fn test_insert_assigns_dense_ids() {
        let mut g = make_graph(10);
        assert_eq!(g.insert(&[1.0, 0.0, 0.0, 0.0]), 0);
        assert_eq!(g.insert(&[0.0, 1.0, 0.0, 0.0]), 1);
        assert_eq!(g.insert(&[0.0, 0.0, 1.0, 0.0]), 2);
        assert_eq!(g.element_count(), 3);
    }

    #[test]
    fn test_first_insert_sets_entry_point() {
        let mut g = make_graph(10);
        let id = g.insert(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(g.entry_point, Some(id));
    }

    #[test]
    fn test_inserted_nodes_are_connected() {
        let mut g = make_graph(50);
        for i in 0..20 {
            g.insert(&[i as f32, 0.0, 0.0, 0.0]);
        }
        // Every node except possibly isolated early ones should have layer-0 links
        let linked = (0..20u32)
            .filter(|&id| !g.neighbors[id as usize].is_empty() && !g.neighbors[id as usize][0].is_empty())
            .count();
        assert!(linked >= 19, "expected a connected layer 0, got {linked} linked nodes");
    }

    #[test]
    fn test_insert_then_search_finds_self() {
        let mut g = make_graph(50);
        for i in 0..10 {
            g.insert(&[i as f32, (i * 2) as f32, 0.0, 1.0]);
        }
        let query = [4.0, 8.0, 0.0, 1.0];
        let results = knn_search(&g, &query, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, 4);
        assert_eq!(results[0].0, 0.0);
    }

    #[test]
    fn test_layer0_degree_bounded() {
        let mut g = make_graph(300);
        for i in 0..300 {
            g.insert(&[(i % 17) as f32, (i % 5) as f32, i as f32 * 0.01, 1.0]);
        }
        for id in 0..300usize {
            if !g.neighbors[id].is_empty() {
                assert!(
                    g.neighbors[id][0].len() <= g.config.m_max0,
                    "node {id} exceeds m_max0"
                );
            }
        }
    }

    #[test]
    fn test_same_seed_same_graph() {
        let build = || {
            let mut g = make_graph(64);
            for i in 0..64 {
                g.insert(&[(i * 7 % 13) as f32, (i * 3 % 11) as f32, i as f32, 1.0]);
            }
            g
        };
        let a = build();
        let b = build();
        assert_eq!(a.max_layer, b.max_layer);
        assert_eq!(a.layers, b.layers);
        assert_eq!(a.neighbors, b.neighbors);
    }
}
