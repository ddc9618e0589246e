//! Fixed-capacity slot array materialized one segment at a time.
//!
//! The capacity is set up front but only a small table of segment handles is
//! allocated eagerly. A segment of [`SEGMENT_LEN`] default-initialized slots
//! is created the first time one of its slots is written, so a large
//! `max_elements` costs memory in proportion to the points actually stored.

use std::sync::OnceLock;

/// Slots per segment.
pub(crate) const SEGMENT_LEN: usize = 4096;

#[derive(Debug)]
pub struct SlotArena<T> {
    capacity: usize,
    segments: Box<[OnceLock<Box<[T]>>]>,
}

impl<T: Default> SlotArena<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            segments: (0..capacity.div_ceil(SEGMENT_LEN))
                .map(|_| OnceLock::new())
                .collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot `index` if its segment has been materialized.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.capacity {
            return None;
        }
        self.segments[index / SEGMENT_LEN]
            .get()
            .map(|segment| &segment[index % SEGMENT_LEN])
    }

    /// Slot `index`, materializing its segment if needed.
    ///
    /// Panics if `index >= capacity`, like slice indexing.
    pub fn slot(&self, index: usize) -> &T {
        assert!(
            index < self.capacity,
            "slot {index} out of range for capacity {}",
            self.capacity
        );
        let seg = index / SEGMENT_LEN;
        let segment = self.segments[seg].get_or_init(|| {
            let len = SEGMENT_LEN.min(self.capacity - seg * SEGMENT_LEN);
            (0..len).map(|_| T::default()).collect()
        });
        &segment[index % SEGMENT_LEN]
    }

    /// Every materialized segment, in index order.
    pub fn segments(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.segments.iter().filter_map(|s| s.get().map(|b| &**b))
    }

    /// Bytes held by the segment table and the materialized segments.
    pub fn memory_bytes(&self) -> usize {
        self.segments.len() * std::mem::size_of::<OnceLock<Box<[T]>>>()
            + self.segments().map(|s| s.len()).sum::<usize>() * std::mem::size_of::<T>()
    }
}
