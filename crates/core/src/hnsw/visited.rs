//! Generation-stamped visited set for graph traversal.
//!
//! Each `clear()` bumps a generation counter instead of zeroing the array, so
//! one allocation serves every traversal a thread performs. The pooled set
//! follows the size of the graph being walked: it grows when an id lands past
//! the end and is reallocated when a much smaller graph is walked next.

use std::cell::RefCell;

thread_local! {
    /// Per-thread visited set reused across searches and insertions.
    static VISITED_POOL: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// A pooled set larger than this many times the requested size is replaced.
const SHRINK_FACTOR: usize = 4;

/// Runs `f` with this thread's pooled visited set, sized for `expected` ids.
///
/// `expected` is a hint (the graph's current point count); ids beyond it
/// still work. Must not be re-entered from inside `f`.
pub(crate) fn with_visited<R>(expected: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    VISITED_POOL.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.fit(expected);
        f(&mut visited)
    })
}

/// Drops this thread's pooled visited set.
pub(crate) fn release_pool() {
    VISITED_POOL.with(|cell| *cell.borrow_mut() = VisitedSet::new(0));
}

/// Visited marks indexed by internal id.
///
/// Uses a u16 generation, so a full memset happens once every 65534 clears.
#[derive(Debug)]
pub struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Forget every mark.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
    }

    /// Grows to `expected`, or reallocates when the set is far larger than needed.
    pub fn fit(&mut self, expected: usize) {
        if self.marks.len() > expected.max(1).saturating_mul(SHRINK_FACTOR) {
            *self = VisitedSet::new(expected);
        } else {
            self.ensure_capacity(expected);
        }
    }

    /// Number of ids covered without growing.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Marks `id`. Returns `true` if it was not marked before.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.marks.len() {
            self.marks.resize((idx + 1).next_power_of_two(), 0);
        }
        let slot = &mut self.marks[idx];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}
