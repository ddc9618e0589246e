//! Storage layer: binary index snapshots.
//!
//! The index lives entirely in memory. Durability is an explicit save to a
//! checksummed snapshot (atomic temp-file + rename) and a structural load
//! that rebuilds the graph without re-inserting.

/// Snapshot encode/decode plus file and stream helpers.
pub mod persistence;

pub use persistence::{load_index, read_index, save_index, write_index};
