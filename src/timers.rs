//! Timer Set
//!
//! The distinct virtual instants at which some callback is waiting.
//! Uses std::collections::BinaryHeap for pop-minimum and a HashSet for O(1)
//! duplicate detection. The set does not know how many callbacks share an
//! instant; the runtime's timer registry tracks that.

use crate::clock::VirtualInstant;
use crate::error::SchedulerError;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Heap entry. BinaryHeap is a max-heap, so the ordering is reversed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry(VirtualInstant);

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0).reverse()
    }
}

/// A deduplicating min-priority collection of virtual instants.
#[derive(Debug, Default)]
pub struct TimerSet {
    heap: BinaryHeap<Entry>,
    members: HashSet<u64>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `instant`. Adding a present instant is a no-op.
    /// Returns true if the instant was newly added.
    pub fn add(&mut self, instant: VirtualInstant) -> bool {
        if !self.members.insert(instant.key()) {
            return false;
        }
        self.heap.push(Entry(instant));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of distinct instants.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, instant: VirtualInstant) -> bool {
        self.members.contains(&instant.key())
    }

    /// Smallest registered instant, without removing it.
    pub fn peek_closest(&self) -> Option<VirtualInstant> {
        self.heap.peek().map(|e| e.0)
    }

    /// Remove and return the smallest registered instant.
    /// Callers must check `is_empty()` first.
    pub fn pop_closest(&mut self) -> Result<VirtualInstant, SchedulerError> {
        let Some(Entry(instant)) = self.heap.pop() else {
            return Err(SchedulerError::EmptyCollection);
        };
        self.members.remove(&instant.key());
        Ok(instant)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.members.clear();
    }
}
