//! HNSW search algorithms: single-layer beam search and multi-layer KNN.
//!
//! Searches take only shared locks (one node's adjacency at a time, copied
//! out before expanding), so they may run concurrently with insertions and
//! observe a partially linked node. That affects recall, never structure.

use crate::error::{HnswError, Result};
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::visited::{with_visited, VisitedSet};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One search hit: caller label and distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub label: u32,
    pub distance: f32,
}

/// A frontier entry. BinaryHeap is a max-heap, so the distance is negated to
/// pop the closest candidate first; ties pop the lower id first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A kept result. Max-heap by (distance, id) so the worst result sits on top.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order on `(distance, id)` pairs: ascending distance, then ascending id.
#[inline]
pub(crate) fn by_distance_then_id(a: &(f32, u32), b: &(f32, u32)) -> Ordering {
    OrderedFloat(a.0)
        .cmp(&OrderedFloat(b.0))
        .then_with(|| a.1.cmp(&b.1))
}

/// Beam search over one layer of the graph.
///
/// Returns up to `ef` `(distance, internal_id)` pairs closest to `query`,
/// sorted ascending. Expansion stops once the closest unexpanded candidate is
/// farther than the worst kept result and the result set is full.
/// `visited` is cleared at the start of each call.
pub(crate) fn search_layer(
    graph: &HnswGraph,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
) -> Vec<(f32, u32)> {
    visited.clear();
    let space = graph.config.space;
    let expected = ef.min(graph.len()) + 1;
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(expected * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(expected);
    // Cached worst kept distance, refreshed whenever the result set changes
    let mut worst_dist = f32::MAX;
    let mut neighbor_buf: Vec<u32> = Vec::with_capacity(graph.config.m_max(layer));

    for &ep in entry_points {
        if !visited.insert(ep) {
            continue;
        }
        let Some(vector) = graph.store.vector(ep) else {
            continue;
        };
        let dist = space.distance(query, vector);
        candidates.push(Candidate {
            neg_distance: OrderedFloat(-dist),
            id: ep,
        });
        results.push(ResultEntry {
            distance: OrderedFloat(dist),
            id: ep,
        });
        if results.len() > ef {
            results.pop();
        }
        if results.len() >= ef {
            worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        if !graph
            .layers
            .neighbors_into(candidate.id, layer, &mut neighbor_buf)
        {
            continue;
        }

        for &neighbor_id in &neighbor_buf {
            if !visited.insert(neighbor_id) {
                continue;
            }
            // Reachable nodes are always written; a miss means a racing insert
            let Some(vector) = graph.store.vector(neighbor_id) else {
                continue;
            };
            let dist = space.distance(query, vector);

            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: neighbor_id,
                });
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
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

/// Greedy descent from `current` through layers `top` down to `to + 1`,
/// keeping the single closest node per layer.
pub(crate) fn descend(
    graph: &HnswGraph,
    query: &[f32],
    mut current: u32,
    top: usize,
    to: usize,
    visited: &mut VisitedSet,
) -> u32 {
    for layer in (to + 1..=top).rev() {
        let found = search_layer(
            graph,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            visited,
        );
        if let Some(&(_, nearest)) = found.first() {
            current = nearest;
        }
    }
    current
}

/// Multi-layer KNN search over an already prepared (normalized for cosine) query.
///
/// Returns up to `k` `(distance, internal_id)` pairs, ascending. Layer 0 is
/// searched with beam width `max(ef_search, k)`.
pub fn knn_search(graph: &HnswGraph, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    if k == 0 {
        return Vec::new();
    }
    let entry = graph.entry_point();
    let Some(entry_id) = entry.id else {
        return Vec::new();
    };

    with_visited(graph.len(), |visited| {
        let start = descend(graph, query, entry_id, entry.max_layer, 0, visited);
        let ef = graph.ef_search().max(k);
        let mut results = search_layer(
            graph,
            query,
            std::slice::from_ref(&start),
            ef,
            0,
            visited,
        );
        results.truncate(k);
        results
    })
}

impl HnswGraph {
    /// Finds the `k` nearest points to `query`, ascending by distance.
    ///
    /// An empty graph yields an empty result. Fails with
    /// [`HnswError::DimensionMismatch`] when the query has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension() {
            return Err(HnswError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        let prepared = self.space().prepare(query);
        Ok(knn_search(self, &prepared, k)
            .into_iter()
            .filter_map(|(distance, id)| {
                self.store
                    .label(id)
                    .map(|label| Neighbor { label, distance })
            })
            .collect())
    }
}
