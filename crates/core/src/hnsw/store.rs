//! Vector storage for the HNSW graph.
//!
//! [`VectorStore`] is a fixed-capacity arena of write-once slots indexed by
//! internal id, materialized segment by segment as ids are handed out. Ids
//! come from an atomic counter, so concurrent inserters never contend on the
//! arena itself; only the label lookup table takes a lock.

use crate::error::{HnswError, Result};
use crate::hnsw::arena::SlotArena;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// A stored point: caller label plus the vector as indexed (normalized for cosine).
#[derive(Debug)]
pub struct StoredPoint {
    pub label: u32,
    pub vector: Box<[f32]>,
}

/// Fixed-capacity arena mapping internal ids to vectors and labels.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    slots: SlotArena<OnceLock<StoredPoint>>,
    /// Number of ids handed out. Never exceeds `slots.len()`.
    next_id: AtomicU32,
    /// Label → most recently inserted internal id carrying that label.
    labels: RwLock<HashMap<u32, u32>>,
}

impl VectorStore {
    /// Creates an empty store able to hold `capacity` points of `dimension` floats.
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            slots: SlotArena::new(capacity),
            next_id: AtomicU32::new(0),
            labels: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Number of internal ids allocated so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates the next internal id.
    ///
    /// Fails with [`HnswError::CapacityExceeded`] once every slot is taken;
    /// a failed call does not consume an id.
    pub fn reserve(&self) -> Result<u32> {
        let capacity = self.capacity();
        self.next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                ((n as usize) < capacity).then_some(n + 1)
            })
            .map_err(|_| HnswError::CapacityExceeded { capacity })
    }

    /// Writes a reserved slot and registers its label. Returns the stored point.
    ///
    /// Each slot is written exactly once; `id` must come from [`reserve`](Self::reserve).
    /// A label shared by several points maps to the highest id, whatever order
    /// concurrent publishers finish in.
    pub fn publish(&self, id: u32, label: u32, vector: Vec<f32>) -> &StoredPoint {
        debug_assert_eq!(vector.len(), self.dimension);
        let point = self.slots.slot(id as usize).get_or_init(|| StoredPoint {
            label,
            vector: vector.into_boxed_slice(),
        });
        let mut labels = self.labels.write();
        let newest = labels.entry(label).or_insert(id);
        if *newest < id {
            *newest = id;
        }
        point
    }

    /// Returns the point stored at `id`, or `None` if the slot is not written yet.
    #[inline]
    pub fn get(&self, id: u32) -> Option<&StoredPoint> {
        self.slots.get(id as usize).and_then(OnceLock::get)
    }

    #[inline]
    pub fn vector(&self, id: u32) -> Option<&[f32]> {
        self.get(id).map(|p| &*p.vector)
    }

    #[inline]
    pub fn label(&self, id: u32) -> Option<u32> {
        self.get(id).map(|p| p.label)
    }

    /// Internal id most recently inserted under `label`.
    pub fn id_for_label(&self, label: u32) -> Option<u32> {
        self.labels.read().get(&label).copied()
    }

    /// Approximate heap bytes held by the store.
    pub fn memory_bytes(&self) -> usize {
        let slots = self.slots.memory_bytes();
        let vectors = self.len() * self.dimension * std::mem::size_of::<f32>();
        let labels = self.labels.read().capacity() * (2 * std::mem::size_of::<u32>() + 8);
        slots + vectors + labels
    }
}
