//! HNSW insertion algorithm.
//!
//! Inserts a vector into the HNSW graph with bidirectional connections and
//! heuristic neighbor pruning (Algorithm 4 from the HNSW paper).
//!
//! Insertions run concurrently. A new node is published (vector written,
//! adjacency sized) before any edge points at it, each adjacency mutation
//! holds only that node's write lock, and the entry point is swapped under
//! its own short-lived mutex.

use crate::error::{HnswError, Result};
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::search::{by_distance_then_id, descend, search_layer};
use crate::hnsw::visited::with_visited;
use std::collections::HashSet;

impl HnswGraph {
    /// Inserts `vector` under `label`. Returns the assigned internal id.
    ///
    /// Fails with [`HnswError::DimensionMismatch`] for a vector of the wrong
    /// length and [`HnswError::CapacityExceeded`] when the index is full.
    pub fn insert(&self, vector: &[f32], label: u32) -> Result<u32> {
        if vector.len() != self.dimension() {
            return Err(HnswError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        let prepared = self.space().prepare(vector).into_owned();
        let internal_id = self.store.reserve()?;
        let level = self.random_level();

        self.layers.init_node(internal_id, level);
        let query = &self.store.publish(internal_id, label, prepared).vector;

        // First node becomes the entry point with no edges
        let Some(entry) = self.layers.claim_entry_if_empty(internal_id, level) else {
            tracing::debug!(internal_id, level, "first node installed as entry point");
            return Ok(internal_id);
        };
        let Some(entry_id) = entry.id else {
            return Ok(internal_id);
        };

        let ef = self.config.ef_construction;
        with_visited(self.len(), |visited| {
            // Phase 1: greedy descent to the node's own top layer
            let current = descend(self, query, entry_id, entry.max_layer, level, visited);

            // Phase 2: beam search and link on every shared layer, top-down
            let top = level.min(entry.max_layer);
            let mut layer_eps: Vec<u32> = vec![current];
            for layer in (0..=top).rev() {
                let mut candidates = search_layer(self, query, &layer_eps, ef, layer, visited);
                // A racing insert may already have linked back to this node
                candidates.retain(|&(_, id)| id != internal_id);

                let selected = select_neighbors_heuristic(self, &candidates, self.config.m_max(layer));
                self.connect(internal_id, layer, &selected);

                if !candidates.is_empty() {
                    layer_eps.clear();
                    layer_eps.extend(candidates.iter().map(|&(_, id)| id));
                }
            }
        });

        if level > entry.max_layer && self.layers.promote_entry(internal_id, level) {
            tracing::debug!(
                internal_id,
                level,
                previous = entry.max_layer,
                "entry point promoted"
            );
        }
        Ok(internal_id)
    }

    /// Links `id` to `selected` at `layer` and adds the reverse edges.
    ///
    /// Edges that racing inserts already attached to `id` are kept: they are
    /// merged with `selected`, and the heuristic only runs again if the union
    /// exceeds the degree bound. A neighbor whose list is already at the
    /// bound re-runs the selection heuristic over its current neighbors plus
    /// `id`.
    fn connect(&self, id: u32, layer: usize, selected: &[(f32, u32)]) {
        let m_max = self.config.m_max(layer);
        let space = self.space();
        if let Some(base) = self.store.vector(id) {
            let mut own = self.layers.node(id).write();
            if let Some(list) = own.get_mut(layer) {
                let mut merged = selected.to_vec();
                for &cid in list.iter() {
                    if cid == id || selected.iter().any(|&(_, sid)| sid == cid) {
                        continue;
                    }
                    if let Some(v) = self.store.vector(cid) {
                        merged.push((space.distance(base, v), cid));
                    }
                }
                if merged.len() > m_max {
                    merged = select_neighbors_heuristic(self, &merged, m_max);
                }
                list.clear();
                list.extend(merged.iter().map(|&(_, nid)| nid));
            }
        }

        for &(dist_to_new, neighbor_id) in selected {
            let Some(base) = self.store.vector(neighbor_id) else {
                continue;
            };
            let mut links = self.layers.node(neighbor_id).write();
            let Some(list) = links.get_mut(layer) else {
                continue;
            };
            if list.contains(&id) {
                continue;
            }
            if list.len() < m_max {
                list.push(id);
                continue;
            }

            let mut candidates: Vec<(f32, u32)> = list
                .iter()
                .filter_map(|&cid| {
                    self.store
                        .vector(cid)
                        .map(|v| (space.distance(base, v), cid))
                })
                .collect();
            candidates.push((dist_to_new, id));
            let kept = select_neighbors_heuristic(self, &candidates, m_max);
            list.clear();
            list.extend(kept.iter().map(|&(_, cid)| cid));
        }
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// Walks candidates closest-first and keeps one only if it is closer to the
/// base node than to every neighbor already kept. This drops redundant
/// near-duplicates and preserves long-range edges. Candidates are
/// `(distance_to_base, id)`; the result is ascending and at most `m` long.
pub(crate) fn select_neighbors_heuristic(
    graph: &HnswGraph,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(by_distance_then_id);
    sorted.dedup_by_key(|c| c.1);
    if sorted.len() <= m {
        return sorted;
    }

    let space = graph.space();
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let Some(cand) = graph.store.vector(cid) else {
            continue;
        };
        let is_diverse = selected.iter().all(|&(_, sid)| {
            graph
                .store
                .vector(sid)
                .map_or(true, |sv| dist_to_base <= space.distance(cand, sv))
        });
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if graph.config.keep_pruned_connections && selected.len() < m {
        let kept: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
        for &c in &sorted {
            if selected.len() >= m {
                break;
            }
            if !kept.contains(&c.1) {
                selected.push(c);
            }
        }
        selected.sort_unstable_by(by_distance_then_id);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::{HnswConfig, SpaceType};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_graph(dim: usize, m: usize) -> HnswGraph {
        HnswGraph::new(
            HnswConfig::new(dim, 2_000, SpaceType::L2)
                .with_m(m)
                .with_ef_construction(64),
        )
        .unwrap()
    }

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen::<f32>()).collect())
            .collect()
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let g = make_graph(2, 4);
        let id = g.insert(&[1.0, 1.0], 9).unwrap();
        assert_eq!(id, 0);
        let entry = g.entry_point();
        assert_eq!(entry.id, Some(0));
        assert_eq!(Some(entry.max_layer), g.layers.level(0));
    }

    #[test]
    fn test_insert_assigns_dense_ids() {
        let g = make_graph(2, 4);
        for i in 0..10u32 {
            assert_eq!(g.insert(&[i as f32, 0.0], 100 + i).unwrap(), i);
        }
        assert_eq!(g.len(), 10);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let g = make_graph(3, 4);
        let err = g.insert(&[1.0, 2.0], 0).unwrap_err();
        assert!(matches!(
            err,
            HnswError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(g.len(), 0, "a rejected vector must not consume an id");
    }

    #[test]
    fn test_capacity_exceeded() {
        let g = HnswGraph::new(HnswConfig::new(2, 3, SpaceType::L2)).unwrap();
        for i in 0..3 {
            g.insert(&[i as f32, 0.0], i).unwrap();
        }
        assert!(matches!(
            g.insert(&[9.0, 9.0], 9),
            Err(HnswError::CapacityExceeded { capacity: 3 })
        ));
    }

    #[test]
    fn test_degree_bounds_and_bidirectional_links() {
        let m = 4;
        let g = make_graph(8, m);
        for (i, v) in random_vectors(300, 8, 1).iter().enumerate() {
            g.insert(v, i as u32).unwrap();
        }

        let mut reverse_edges = 0usize;
        let mut total_edges = 0usize;
        for id in 0..g.len() as u32 {
            let level = g.layers.level(id).unwrap();
            for layer in 0..=level {
                let neighbors = g.layers.neighbors(id, layer);
                assert!(
                    neighbors.len() <= g.config.m_max(layer),
                    "node {id} layer {layer} has {} links",
                    neighbors.len()
                );
                for &n in &neighbors {
                    assert_ne!(n, id, "self-loop at node {id}");
                    assert!(
                        g.layers.level(n).unwrap() >= layer,
                        "edge {id}->{n} points above the neighbor's top layer"
                    );
                    total_edges += 1;
                    if g.layers.neighbors(n, layer).contains(&id) {
                        reverse_edges += 1;
                    }
                }
            }
        }
        // Pruning removes some reverse edges, but the graph stays mostly symmetric
        assert!(
            reverse_edges * 2 > total_edges,
            "only {reverse_edges}/{total_edges} edges are reciprocated"
        );
    }

    #[test]
    fn test_entry_point_is_on_max_layer() {
        let g = make_graph(4, 4);
        for (i, v) in random_vectors(500, 4, 2).iter().enumerate() {
            g.insert(v, i as u32).unwrap();
        }
        let entry = g.entry_point();
        let entry_id = entry.id.unwrap();
        assert_eq!(g.layers.level(entry_id), Some(entry.max_layer));
        for id in 0..g.len() as u32 {
            assert!(g.layers.level(id).unwrap() <= entry.max_layer);
        }
    }

    #[test]
    fn test_same_seed_same_topology() {
        let data = random_vectors(200, 6, 3);
        let build = || {
            let g = make_graph(6, 6);
            for (i, v) in data.iter().enumerate() {
                g.insert(v, i as u32).unwrap();
            }
            g
        };
        let (a, b) = (build(), build());
        assert_eq!(a.entry_point(), b.entry_point());
        for id in 0..200u32 {
            assert_eq!(a.layers.level(id), b.layers.level(id));
            assert_eq!(a.layers.neighbors(id, 0), b.layers.neighbors(id, 0));
        }
    }

    #[test]
    fn test_heuristic_prefers_diverse_neighbors() {
        let g = make_graph(2, 4);
        // base sits at the origin; 1 and 2 are a tight cluster to the right,
        // 3 is alone to the left
        g.insert(&[0.0, 0.0], 0).unwrap();
        g.insert(&[1.0, 0.0], 1).unwrap();
        g.insert(&[1.1, 0.0], 2).unwrap();
        g.insert(&[-1.5, 0.0], 3).unwrap();

        let candidates = vec![(1.0, 1), (1.21, 2), (2.25, 3)];
        let kept = select_neighbors_heuristic(&g, &candidates, 2);
        let ids: Vec<u32> = kept.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 3], "clustered candidate 2 should be skipped");
    }

    #[test]
    fn test_heuristic_keeps_all_when_under_bound() {
        let g = make_graph(2, 4);
        let candidates = vec![(3.0, 7), (1.0, 4), (1.0, 4)];
        let kept = select_neighbors_heuristic(&g, &candidates, 4);
        assert_eq!(kept, vec![(1.0, 4), (3.0, 7)]);
    }

    #[test]
    fn test_heuristic_backfill_when_keeping_pruned() {
        let g = HnswGraph::new(
            HnswConfig::new(2, 16, SpaceType::L2)
                .with_m(4)
                .with_keep_pruned_connections(true),
        )
        .unwrap();
        g.insert(&[0.0, 0.0], 0).unwrap();
        g.insert(&[1.0, 0.0], 1).unwrap();
        g.insert(&[1.1, 0.0], 2).unwrap();
        g.insert(&[1.2, 0.0], 3).unwrap();

        let candidates = vec![(1.0, 1), (1.21, 2), (1.44, 3)];
        let kept = select_neighbors_heuristic(&g, &candidates, 2);
        let ids: Vec<u32> = kept.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_connect_keeps_edges_added_by_racing_inserts() {
        let g = make_graph(2, 2);
        g.insert(&[0.0, 0.0], 0).unwrap();
        g.insert(&[1.0, 0.0], 1).unwrap();

        // Node 2 is published, and node 1 has already linked back to it
        // before node 2 commits its own selection
        let id = g.store.reserve().unwrap();
        g.layers.init_node(id, 0);
        g.store.publish(id, 2, vec![0.5, 0.5]);
        g.layers.node(id).write()[0].push(1);

        g.connect(id, 0, &[(0.5, 0)]);
        let mut own = g.layers.neighbors(id, 0);
        own.sort_unstable();
        assert_eq!(own, vec![0, 1]);
        assert!(g.layers.neighbors(0, 0).contains(&id));
    }

    #[test]
    fn test_connect_prunes_merged_list_to_bound() {
        let g = make_graph(2, 2);
        for i in 0..6u32 {
            g.insert(&[i as f32, 0.0], i).unwrap();
        }
        let id = g.store.reserve().unwrap();
        g.layers.init_node(id, 0);
        g.store.publish(id, 6, vec![2.5, 0.0]);
        g.layers.node(id).write()[0].extend([0, 1, 4, 5]);

        g.connect(id, 0, &[(0.25, 2), (0.25, 3)]);
        let own = g.layers.neighbors(id, 0);
        assert!(own.len() <= g.config.m_max(0), "{own:?}");
        assert!(own.contains(&2) && own.contains(&3), "{own:?}");
    }

    #[test]
    fn test_concurrent_inserts_reach_every_node() {
        let data = random_vectors(1_500, 16, 9);
        for round in 0..3 {
            let g = HnswGraph::new(
                HnswConfig::new(16, 2_000, SpaceType::L2).with_ef_construction(100),
            )
            .unwrap();
            std::thread::scope(|s| {
                for (c, chunk) in data.chunks(200).enumerate() {
                    let g = &g;
                    s.spawn(move || {
                        for (j, v) in chunk.iter().enumerate() {
                            g.insert(v, (c * 200 + j) as u32).unwrap();
                        }
                    });
                }
            });

            // Breadth-first walk of layer 0 from the entry point
            let start = g.entry_point().id.unwrap();
            let mut seen = vec![false; g.len()];
            let mut queue = std::collections::VecDeque::from([start]);
            seen[start as usize] = true;
            let mut reached = 1usize;
            while let Some(id) = queue.pop_front() {
                for n in g.layers.neighbors(id, 0) {
                    if !seen[n as usize] {
                        seen[n as usize] = true;
                        reached += 1;
                        queue.push_back(n);
                    }
                }
            }
            assert_eq!(reached, 1_500, "round {round}: layer 0 lost nodes");
        }
    }

    #[test]
    fn test_concurrent_inserts_keep_structure_valid() {
        let g = make_graph(8, 8);
        let data = random_vectors(800, 8, 4);
        std::thread::scope(|s| {
            for chunk in data.chunks(100).enumerate() {
                let g = &g;
                s.spawn(move || {
                    let (c, vectors) = chunk;
                    for (j, v) in vectors.iter().enumerate() {
                        g.insert(v, (c * 100 + j) as u32).unwrap();
                    }
                });
            }
        });
        assert_eq!(g.len(), 800);
        for id in 0..800u32 {
            let level = g.layers.level(id).unwrap();
            for layer in 0..=level {
                let neighbors = g.layers.neighbors(id, layer);
                assert!(neighbors.len() <= g.config.m_max(layer));
                assert!(neighbors.iter().all(|&n| (n as usize) < 800 && n != id));
            }
        }
        g.set_ef_search(100).unwrap();
        let hits = g.search(&data[123], 1).unwrap();
        assert_eq!(hits[0].label, 123);
    }
}
