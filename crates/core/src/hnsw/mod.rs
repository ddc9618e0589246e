//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Layer 0 holds every point; each higher layer holds a geometrically
//! shrinking random subset used to descend quickly toward the query's
//! neighborhood before the exhaustive beam search at layer 0.
//!
//! Storage is split by concern: [`store::VectorStore`] owns vectors and
//! labels in a fixed-capacity arena, [`graph::GraphLayers`] owns adjacency
//! lists and the entry point. Edges are internal ids into the arena, never
//! references, so the cyclic graph needs no shared ownership.

/// Lazily materialized fixed-capacity slot array.
pub mod arena;
/// Distance metrics: squared L2, inner product, and cosine.
pub mod distance;
/// HNSW graph structure, configuration, and layer assignment.
pub mod graph;
/// HNSW insertion algorithm with bidirectional connections and heuristic pruning.
pub mod insert;
/// HNSW search: single-layer beam search and multi-layer KNN.
pub mod search;
/// Fixed-capacity vector and label arena.
pub mod store;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use distance::SpaceType;
pub use graph::{EntryPoint, HnswConfig, HnswGraph};
pub use search::{knn_search, Neighbor};
