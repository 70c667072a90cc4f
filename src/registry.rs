//! Timer registry
//!
//! Per-instant multi-callback bookkeeping owned by the runtime. Many callbacks
//! may share one instant; they are released in `(instant, seq)` order where
//! `seq` is a global monotonic registration counter shared with the
//! ready-queue. Cancelled entries are removed lazily on peek/pop.

use crate::clock::VirtualInstant;
use crate::handle::CallbackCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// Heap key. Uses (when, seq) for deterministic ordering.
struct Key {
    when: VirtualInstant,
    seq: u64,
    cell: Rc<CallbackCell>,
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed for min-heap behavior.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.when
            .cmp(&other.when)
            .then_with(|| self.seq.cmp(&other.seq))
            .reverse()
    }
}

#[derive(Default)]
pub(crate) struct TimerRegistry {
    heap: BinaryHeap<Key>,
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, when: VirtualInstant, cell: Rc<CallbackCell>) {
        let seq = cell.seq();
        self.heap.push(Key { when, seq, cell });
    }

    /// Earliest live deadline.
    pub(crate) fn peek_deadline(&mut self) -> Option<VirtualInstant> {
        self.clean_top();
        self.heap.peek().map(|k| k.when)
    }

    /// Remove every live entry due at or before `now`, in firing order.
    pub(crate) fn pop_due(&mut self, now: VirtualInstant) -> Vec<Rc<CallbackCell>> {
        let mut due = Vec::new();
        while let Some(when) = self.peek_deadline() {
            if when > now {
                break;
            }
            if let Some(k) = self.heap.pop() {
                due.push(k.cell);
            }
        }
        due
    }

    /// Number of live (not cancelled) entries. Scans the heap; prefer
    /// `peek_deadline` for an emptiness check.
    pub(crate) fn live_len(&self) -> usize {
        self.heap.iter().filter(|k| !k.cell.is_cancelled()).count()
    }

    /// Cancel and drop every entry.
    pub(crate) fn clear(&mut self) {
        for k in self.heap.drain() {
            k.cell.cancel();
        }
    }

    /// Remove cancelled entries from the top of the heap.
    fn clean_top(&mut self) {
        while let Some(k) = self.heap.peek() {
            if !k.cell.is_cancelled() {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn entry(log: &Rc<RefCell<Vec<u64>>>, seq: u64, when: f64) -> (VirtualInstant, Rc<CallbackCell>) {
        let l = log.clone();
        let when = VirtualInstant::new(when);
        (
            when,
            CallbackCell::new(Box::new(move || l.borrow_mut().push(seq)), Some(when), seq),
        )
    }

    #[test]
    fn test_same_instant_fires_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = TimerRegistry::new();

        for (seq, when) in [(0, 5.0), (1, 3.0), (2, 5.0), (3, 3.0)] {
            let (w, c) = entry(&log, seq, when);
            reg.insert(w, c);
        }

        for cell in reg.pop_due(VirtualInstant::new(5.0)) {
            cell.run();
        }
        assert_eq!(*log.borrow(), vec![1, 3, 0, 2]);
        assert_eq!(reg.peek_deadline(), None);
    }

    #[test]
    fn test_pop_due_leaves_future_entries() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = TimerRegistry::new();
        let (w, c) = entry(&log, 0, 1.0);
        reg.insert(w, c);
        let (w, c) = entry(&log, 1, 2.0);
        reg.insert(w, c);

        assert_eq!(reg.pop_due(VirtualInstant::new(1.0)).len(), 1);
        assert_eq!(reg.live_len(), 1);
        assert_eq!(reg.peek_deadline(), Some(VirtualInstant::new(2.0)));
    }

    #[test]
    fn test_cancelled_entries_are_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = TimerRegistry::new();
        let (w, first) = entry(&log, 0, 1.0);
        reg.insert(w, first.clone());
        let (w, c) = entry(&log, 1, 4.0);
        reg.insert(w, c);

        first.cancel();
        assert_eq!(reg.live_len(), 1);
        assert_eq!(reg.peek_deadline(), Some(VirtualInstant::new(4.0)));
        assert!(reg.pop_due(VirtualInstant::new(3.0)).is_empty());
    }

    #[test]
    fn test_clear_cancels() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut reg = TimerRegistry::new();
        let (w, c) = entry(&log, 0, 1.0);
        reg.insert(w, c.clone());
        reg.clear();
        assert!(c.is_cancelled());
        assert_eq!(reg.live_len(), 0);
    }
}
