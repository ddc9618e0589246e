//! # hnsw-graph
//!
//! Embeddable in-memory approximate nearest neighbor index built on
//! Hierarchical Navigable Small World graphs.
//!
//! Points are fixed-dimension `f32` vectors tagged with a caller `u32` label.
//! The index supports squared L2, inner product and cosine distance,
//! concurrent single and batch insertion, concurrent search, and a checksummed
//! binary snapshot format that reloads without rebuilding the graph.
//!
//! ```no_run
//! use hnsw_graph::{Hnsw, SpaceType};
//!
//! let index = Hnsw::create(4, 16, 200, 100, 1_000, SpaceType::L2)?;
//! index.insert(&[1.0, 0.0, 0.0, 0.0], 7)?;
//! let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 1)?;
//! assert_eq!(hits[0].label, 7);
//! index.save("index.hnsw")?;
//! # Ok::<(), hnsw_graph::HnswError>(())
//! ```

/// Fan-out/fan-in coordinator for batch insert and batch search.
pub mod batch;
/// Global configuration constants: limits, defaults, and format markers.
pub mod config;
/// Error taxonomy shared by every operation.
pub mod error;
/// HNSW approximate nearest neighbor index: graph structure, search, insertion, and distance metrics.
pub mod hnsw;
/// Public index handle with release lifecycle.
pub mod index;
/// Storage layer: binary snapshots with atomic writes.
pub mod storage;

pub use batch::partition;
pub use error::{HnswError, Result};
pub use hnsw::{HnswConfig, Neighbor, SpaceType};
pub use index::Hnsw;
