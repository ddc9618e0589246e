//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, ef_search, space).
//! [`GraphLayers`] owns the topology: per-node adjacency lists for every layer
//! the node belongs to, plus the entry point. Edges are plain internal ids into
//! the node arena, each node guarded by its own lock.
//! [`HnswGraph`] ties the store, the topology, and the level generator together.

use crate::config;
use crate::error::{HnswError, Result};
use crate::hnsw::arena::SlotArena;
use crate::hnsw::distance::SpaceType;
use crate::hnsw::store::VectorStore;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration parameters for an HNSW index.
///
/// `dimension`, `max_elements` and `space` are fixed for the lifetime of the
/// index. `ef_search` is only the initial value; it can be changed at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Length of every vector in the index.
    pub dimension: usize,
    /// Maximum number of points the index can hold.
    pub max_elements: usize,
    /// Metric space. Cosine implies normalization on insert and query.
    #[serde(default = "default_space")]
    pub space: SpaceType,
    /// Links per node on layers ≥ 1. Layer 0 allows `2 * m`.
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate list size during index construction.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Candidate list size during search (higher = better recall, slower).
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Seed for the layer-assignment generator.
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// When true, the neighbor heuristic backfills discarded candidates up to
    /// the degree bound instead of leaving slots empty.
    #[serde(default)]
    pub keep_pruned_connections: bool,
}

fn default_space() -> SpaceType {
    SpaceType::L2
}

fn default_m() -> usize {
    config::HNSW_DEFAULT_M
}

fn default_ef_construction() -> usize {
    config::HNSW_DEFAULT_EF_CONSTRUCTION
}

fn default_ef_search() -> usize {
    config::HNSW_DEFAULT_EF_SEARCH
}

fn default_random_seed() -> u64 {
    config::HNSW_DEFAULT_RANDOM_SEED
}

impl HnswConfig {
    /// Configuration with default tuning for the given shape and space.
    pub fn new(dimension: usize, max_elements: usize, space: SpaceType) -> Self {
        Self {
            dimension,
            max_elements,
            space,
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            random_seed: default_random_seed(),
            keep_pruned_connections: false,
        }
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_keep_pruned_connections(mut self, keep: bool) -> Self {
        self.keep_pruned_connections = keep;
        self
    }

    /// Degree bound at `layer`: `2 * m` on layer 0, `m` above.
    #[inline]
    pub fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// `1 / ln(M)`, the decay factor of the level distribution.
    #[inline]
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// Checks that every parameter is within supported bounds.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > config::MAX_DIMENSION {
            return Err(HnswError::InvalidArgument(format!(
                "dimension {} outside 1..={}",
                self.dimension,
                config::MAX_DIMENSION
            )));
        }
        if self.max_elements == 0 || self.max_elements >= config::NO_ENTRY_POINT as usize {
            return Err(HnswError::InvalidArgument(format!(
                "max_elements {} outside 1..{}",
                self.max_elements,
                config::NO_ENTRY_POINT
            )));
        }
        if self.m < 2 {
            return Err(HnswError::InvalidArgument(format!(
                "m must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(HnswError::InvalidArgument(
                "ef_construction must be at least 1".into(),
            ));
        }
        if self.ef_search == 0 {
            return Err(HnswError::InvalidArgument(
                "ef_search must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Current traversal start node and the highest layer in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPoint {
    pub id: Option<u32>,
    pub max_layer: usize,
}

/// Adjacency lists for every node, one list per layer the node belongs to.
///
/// Node `i`'s lists are sized to `top_layer + 1` before any other node can
/// reach it, so a traversal never sees a node that lacks the layer it
/// arrived on.
#[derive(Debug)]
pub struct GraphLayers {
    links: SlotArena<RwLock<Vec<Vec<u32>>>>,
    entry: Mutex<EntryPoint>,
}

impl GraphLayers {
    pub fn new(capacity: usize) -> Self {
        Self {
            links: SlotArena::new(capacity),
            entry: Mutex::new(EntryPoint::default()),
        }
    }

    /// Allocates empty adjacency lists for layers `0..=level`.
    pub fn init_node(&self, id: u32, level: usize) {
        *self.links.slot(id as usize).write() = vec![Vec::new(); level + 1];
    }

    /// Highest layer of `id`, or `None` if the node has not been initialized.
    pub fn level(&self, id: u32) -> Option<usize> {
        self.links
            .get(id as usize)
            .and_then(|l| l.read().len().checked_sub(1))
    }

    /// Copies `id`'s neighbors at `layer` into `buf`. Returns `false` when the
    /// node does not participate in `layer`.
    #[inline]
    pub fn neighbors_into(&self, id: u32, layer: usize, buf: &mut Vec<u32>) -> bool {
        buf.clear();
        let Some(node) = self.links.get(id as usize) else {
            return false;
        };
        let links = node.read();
        match links.get(layer) {
            Some(list) => {
                buf.extend_from_slice(list);
                true
            }
            None => false,
        }
    }

    /// Owned copy of `id`'s neighbors at `layer` (empty if absent).
    pub fn neighbors(&self, id: u32, layer: usize) -> Vec<u32> {
        let mut buf = Vec::new();
        self.neighbors_into(id, layer, &mut buf);
        buf
    }

    /// Lock guarding every adjacency list of `id`.
    #[inline]
    pub(crate) fn node(&self, id: u32) -> &RwLock<Vec<Vec<u32>>> {
        self.links.slot(id as usize)
    }

    pub fn entry_point(&self) -> EntryPoint {
        *self.entry.lock()
    }

    /// Makes `id` the entry point if the graph has none yet.
    ///
    /// Returns `None` when `id` was installed, otherwise the existing entry point.
    pub fn claim_entry_if_empty(&self, id: u32, level: usize) -> Option<EntryPoint> {
        let mut entry = self.entry.lock();
        if entry.id.is_some() {
            return Some(*entry);
        }
        *entry = EntryPoint {
            id: Some(id),
            max_layer: level,
        };
        None
    }

    /// Replaces the entry point if `level` is above the current maximum.
    pub fn promote_entry(&self, id: u32, level: usize) -> bool {
        let mut entry = self.entry.lock();
        if entry.id.is_none() || level > entry.max_layer {
            *entry = EntryPoint {
                id: Some(id),
                max_layer: level,
            };
            true
        } else {
            false
        }
    }

    /// Approximate heap bytes held by the adjacency lists.
    pub fn memory_bytes(&self) -> usize {
        let vec_size = std::mem::size_of::<Vec<u32>>();
        let lists: usize = self
            .links
            .segments()
            .flat_map(|segment| segment.iter())
            .map(|node| {
                node.read()
                    .iter()
                    .map(|l| vec_size + l.capacity() * std::mem::size_of::<u32>())
                    .sum::<usize>()
            })
            .sum();
        self.links.memory_bytes() + lists
    }
}

/// The HNSW engine: vector store, layered topology, and configuration.
///
/// Insert and search take `&self`; all mutation goes through per-node locks,
/// the entry-point mutex, and atomics, so one graph can be shared freely
/// across threads.
#[derive(Debug)]
pub struct HnswGraph {
    pub(crate) config: HnswConfig,
    ef_search: AtomicUsize,
    pub(crate) store: VectorStore,
    pub(crate) layers: GraphLayers,
    rng: Mutex<StdRng>,
}

impl HnswGraph {
    /// Creates an empty graph with room for `max_elements` points.
    ///
    /// Slot storage is materialized in segments as points arrive.
    pub fn new(config: HnswConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ef_search: AtomicUsize::new(config.ef_search),
            store: VectorStore::new(config.dimension, config.max_elements),
            layers: GraphLayers::new(config.max_elements),
            rng: Mutex::new(StdRng::seed_from_u64(config.random_seed)),
            config,
        })
    }

    /// Current configuration, including the live `ef_search` value.
    pub fn config(&self) -> HnswConfig {
        HnswConfig {
            ef_search: self.ef_search(),
            ..self.config.clone()
        }
    }

    #[inline]
    pub fn ef_search(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    /// Takes effect on the next search.
    pub fn set_ef_search(&self, ef: usize) -> Result<()> {
        if ef == 0 {
            return Err(HnswError::InvalidArgument(
                "ef_search must be at least 1".into(),
            ));
        }
        self.ef_search.store(ef, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    #[inline]
    pub fn space(&self) -> SpaceType {
        self.config.space
    }

    /// Number of points inserted so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn entry_point(&self) -> EntryPoint {
        self.layers.entry_point()
    }

    /// Draws a layer for a new node: `floor(-ln(U) / ln(M))`, capped at
    /// `HNSW_MAX_LAYERS - 1`.
    pub fn random_level(&self) -> usize {
        // 1 - [0, 1) keeps the argument of ln() in (0, 1]
        let r: f64 = 1.0 - self.rng.lock().gen::<f64>();
        let level = (-r.ln() * self.config.level_multiplier()).floor() as usize;
        level.min(config::HNSW_MAX_LAYERS - 1)
    }

    /// Vector of the most recent point inserted under `label`, as stored
    /// (normalized for cosine).
    pub fn get_vector(&self, label: u32) -> Option<Vec<f32>> {
        let id = self.store.id_for_label(label)?;
        self.store.vector(id).map(<[f32]>::to_vec)
    }

    pub fn contains(&self, label: u32) -> bool {
        self.store.id_for_label(label).is_some()
    }

    /// Rough estimate of the heap bytes held by the index.
    pub fn estimate_memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.store.memory_bytes() + self.layers.memory_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> HnswConfig {
        HnswConfig::new(4, 100, SpaceType::L2)
    }

    #[test]
    fn test_config_defaults() {
        let cfg = make_config();
        assert_eq!(cfg.m, config::HNSW_DEFAULT_M);
        assert_eq!(cfg.m_max(0), 2 * config::HNSW_DEFAULT_M);
        assert_eq!(cfg.m_max(3), config::HNSW_DEFAULT_M);
        assert_eq!(cfg.ef_search, config::HNSW_DEFAULT_EF_SEARCH);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(HnswConfig::new(0, 10, SpaceType::L2).validate().is_err());
        assert!(HnswConfig::new(4, 0, SpaceType::L2).validate().is_err());
        assert!(make_config().with_m(1).validate().is_err());
        assert!(make_config().with_ef_construction(0).validate().is_err());
        assert!(make_config().with_ef_search(0).validate().is_err());
        assert!(HnswGraph::new(make_config().with_m(0)).is_err());
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let cfg: HnswConfig =
            serde_json::from_str(r#"{"dimension": 8, "max_elements": 50, "space": "cosine"}"#)
                .unwrap();
        assert_eq!(cfg, HnswConfig::new(8, 50, SpaceType::Cosine));

        let cfg: HnswConfig =
            serde_json::from_str(r#"{"dimension": 8, "max_elements": 50, "space": "ip", "m": 32}"#)
                .unwrap();
        assert_eq!(cfg.space, SpaceType::InnerProduct);
        assert_eq!(cfg.m, 32);
    }

    #[test]
    fn test_random_level_is_reproducible() {
        let a = HnswGraph::new(make_config().with_random_seed(7)).unwrap();
        let b = HnswGraph::new(make_config().with_random_seed(7)).unwrap();
        let la: Vec<usize> = (0..200).map(|_| a.random_level()).collect();
        let lb: Vec<usize> = (0..200).map(|_| b.random_level()).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_random_level_distribution() {
        let g = HnswGraph::new(make_config()).unwrap();
        let levels: Vec<usize> = (0..10_000).map(|_| g.random_level()).collect();
        let zeros = levels.iter().filter(|&&l| l == 0).count();
        // P(level = 0) = 1 - 1/M = 0.9375 for M = 16
        assert!(
            (9_000..=9_700).contains(&zeros),
            "unexpected layer-0 share: {zeros}/10000"
        );
        assert!(levels.iter().all(|&l| l < config::HNSW_MAX_LAYERS));
    }

    #[test]
    fn test_entry_point_transitions() {
        let layers = GraphLayers::new(4);
        assert_eq!(layers.entry_point().id, None);

        layers.init_node(0, 1);
        assert!(layers.claim_entry_if_empty(0, 1).is_none());
        let existing = layers.claim_entry_if_empty(1, 0).unwrap();
        assert_eq!(existing.id, Some(0));

        assert!(!layers.promote_entry(2, 1), "equal level must not promote");
        assert!(layers.promote_entry(3, 2));
        assert_eq!(
            layers.entry_point(),
            EntryPoint {
                id: Some(3),
                max_layer: 2
            }
        );
    }

    #[test]
    fn test_neighbors_into_missing_layer() {
        let layers = GraphLayers::new(2);
        layers.init_node(0, 0);
        layers.node(0).write()[0] = vec![1];
        let mut buf = vec![42];
        assert!(layers.neighbors_into(0, 0, &mut buf));
        assert_eq!(buf, vec![1]);
        assert!(!layers.neighbors_into(0, 1, &mut buf));
        assert!(buf.is_empty());
        assert_eq!(layers.level(0), Some(0));
        assert_eq!(layers.level(1), None);
    }

    #[test]
    fn test_set_ef_search() {
        let g = HnswGraph::new(make_config()).unwrap();
        g.set_ef_search(64).unwrap();
        assert_eq!(g.ef_search(), 64);
        assert_eq!(g.config().ef_search, 64);
        assert!(g.set_ef_search(0).is_err());
    }
}
