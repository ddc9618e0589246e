//! Global configuration constants for the HNSW index.
//!
//! Tuning defaults, input validation limits, and persisted-format constants
//! are defined here. Per-index runtime configuration lives in
//! [`HnswConfig`](crate::hnsw::HnswConfig).

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// The effective beam width of a query is `max(ef_search, k)`, so this only
/// matters for small `k`. Also the value an index gets after loading.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 10;

/// Default seed for the layer-assignment generator.
///
/// Used by [`HnswConfig::new`](crate::hnsw::HnswConfig::new) and by every
/// loaded index, since the seed is not persisted.
pub const HNSW_DEFAULT_RANDOM_SEED: u64 = 100;

/// Maximum number of layers in the HNSW graph. Level draws are capped at
/// `HNSW_MAX_LAYERS - 1`.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Added to the Euclidean norm before dividing, so a zero vector normalizes
/// to zero instead of NaN.
pub const NORMALIZE_EPSILON: f32 = 1e-15;

/// Magic bytes at the start of a persisted index.
pub const INDEX_MAGIC: &[u8; 4] = b"HNSW";

/// Persisted format version written by this crate.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Magic bytes preceding the CRC32 footer of a persisted index.
pub const INDEX_CRC_MAGIC: &[u8; 4] = b"HCR1";

/// Entry point value written when the index is empty.
pub const NO_ENTRY_POINT: u32 = u32::MAX;
