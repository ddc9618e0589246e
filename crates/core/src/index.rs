//! The public index handle.
//!
//! [`Hnsw`] wraps a shared [`HnswGraph`] with a release lifecycle and a write
//! gate. Every operation first resolves the live graph; once
//! [`release`](Hnsw::release) has run, all of them fail with
//! [`HnswError::UseAfterRelease`]. Calls already in flight keep their own
//! reference and finish normally.

use crate::batch;
use crate::error::{HnswError, Result};
use crate::hnsw::visited::release_pool;
use crate::hnsw::{HnswConfig, HnswGraph, Neighbor, SpaceType};
use crate::storage::persistence;
use parking_lot::RwLock;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Thread-safe HNSW index. Share it by reference or behind an `Arc`.
#[derive(Debug)]
pub struct Hnsw {
    graph: RwLock<Option<Arc<HnswGraph>>>,
    /// Inserts take it shared, save takes it exclusive.
    write_gate: RwLock<()>,
}

impl Hnsw {
    /// Creates an empty index.
    ///
    /// `dimension`, `space` and `max_elements` are fixed for the lifetime of
    /// the index. `ef_search` starts at its default.
    pub fn create(
        dimension: usize,
        m: usize,
        ef_construction: usize,
        random_seed: u64,
        max_elements: usize,
        space: SpaceType,
    ) -> Result<Self> {
        Self::with_config(
            HnswConfig::new(dimension, max_elements, space)
                .with_m(m)
                .with_ef_construction(ef_construction)
                .with_random_seed(random_seed),
        )
    }

    /// Creates an empty index from a full configuration.
    pub fn with_config(config: HnswConfig) -> Result<Self> {
        let graph = HnswGraph::new(config)?;
        tracing::info!(
            dimension = graph.dimension(),
            space = %graph.space(),
            capacity = graph.capacity(),
            m = graph.config.m,
            ef_construction = graph.config.ef_construction,
            "created hnsw index"
        );
        Ok(Self::from_graph(graph))
    }

    /// Loads an index saved with [`save`](Self::save).
    ///
    /// The caller states the dimension and metric it expects; a file built
    /// with different ones is rejected.
    pub fn load(path: impl AsRef<Path>, dimension: usize, space: SpaceType) -> Result<Self> {
        let graph = persistence::load_index(path.as_ref(), dimension, space)?;
        Ok(Self::from_graph(graph))
    }

    /// Loads an index from any byte stream written by [`save_to_writer`](Self::save_to_writer).
    pub fn load_from_reader<R: Read>(reader: R, dimension: usize, space: SpaceType) -> Result<Self> {
        let graph = persistence::read_index(reader, dimension, space)?;
        Ok(Self::from_graph(graph))
    }

    fn from_graph(graph: HnswGraph) -> Self {
        Self {
            graph: RwLock::new(Some(Arc::new(graph))),
            write_gate: RwLock::new(()),
        }
    }

    fn graph(&self) -> Result<Arc<HnswGraph>> {
        self.graph.read().clone().ok_or(HnswError::UseAfterRelease)
    }

    /// Saves the index to `path`, replacing any existing file atomically.
    ///
    /// Inserts are held off for the duration so the snapshot never contains a
    /// half-linked point.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let graph = self.graph()?;
        let _gate = self.write_gate.write();
        persistence::save_index(&graph, path.as_ref())
    }

    /// Writes the index to `writer` in the same format as [`save`](Self::save).
    pub fn save_to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let graph = self.graph()?;
        let _gate = self.write_gate.write();
        persistence::write_index(&graph, writer)
    }

    /// Inserts one point under `label` and returns its internal id.
    ///
    /// Labels are not required to be unique; a repeated label adds another
    /// point and lookups by label resolve to the newest one.
    pub fn insert(&self, vector: &[f32], label: u32) -> Result<u32> {
        let graph = self.graph()?;
        let _gate = self.write_gate.read();
        graph.insert(vector, label)
    }

    /// Inserts `vectors[i]` under `labels[i]` using `parallelism` workers.
    ///
    /// The outer error covers the whole call (length mismatch, zero
    /// parallelism, released index). Each inner result is the outcome of
    /// the item at that position.
    pub fn batch_insert<V>(
        &self,
        vectors: &[V],
        labels: &[u32],
        parallelism: usize,
    ) -> Result<Vec<Result<u32>>>
    where
        V: AsRef<[f32]> + Sync,
    {
        let graph = self.graph()?;
        let _gate = self.write_gate.read();
        batch::batch_insert(&graph, vectors, labels, parallelism)
    }

    /// Returns up to `k` nearest neighbors of `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.graph()?.search(query, k)
    }

    /// Searches every query using `parallelism` workers. Result `i` answers `queries[i]`.
    pub fn batch_search<V>(
        &self,
        queries: &[V],
        k: usize,
        parallelism: usize,
    ) -> Result<Vec<Result<Vec<Neighbor>>>>
    where
        V: AsRef<[f32]> + Sync,
    {
        let graph = self.graph()?;
        batch::batch_search(&graph, queries, k, parallelism)
    }

    /// Sets the layer-0 beam width used by subsequent searches.
    pub fn set_ef_search(&self, ef: usize) -> Result<()> {
        self.graph()?.set_ef_search(ef)
    }

    /// Drops the graph and this thread's traversal scratch space. Returns
    /// `false` if the index was already released.
    pub fn release(&self) -> bool {
        let released = self.graph.write().take();
        match released {
            Some(graph) => {
                release_pool();
                tracing::info!(points = graph.len(), "released hnsw index");
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.graph.read().is_none()
    }

    /// Number of points inserted.
    pub fn len(&self) -> Result<usize> {
        Ok(self.graph()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.graph()?.is_empty())
    }

    /// Maximum number of points (`max_elements`).
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.graph()?.capacity())
    }

    pub fn dimension(&self) -> Result<usize> {
        Ok(self.graph()?.dimension())
    }

    pub fn space(&self) -> Result<SpaceType> {
        Ok(self.graph()?.space())
    }

    pub fn ef_search(&self) -> Result<usize> {
        Ok(self.graph()?.ef_search())
    }

    pub fn config(&self) -> Result<HnswConfig> {
        Ok(self.graph()?.config())
    }

    /// Stored vector of the newest point carrying `label` (normalized for cosine).
    pub fn get_vector(&self, label: u32) -> Result<Option<Vec<f32>>> {
        Ok(self.graph()?.get_vector(label))
    }

    pub fn contains(&self, label: u32) -> Result<bool> {
        Ok(self.graph()?.contains(label))
    }

    /// Rough heap footprint of the index in bytes.
    pub fn estimate_memory_bytes(&self) -> Result<usize> {
        Ok(self.graph()?.estimate_memory_bytes())
    }
}
