//! Objects parked until a counter proves the GPU no longer references them.

use std::collections::VecDeque;

struct Retired<T> {
    fence: u64,
    // Only held to be dropped.
    _item: T,
}

/// FIFO of retired objects, each tagged with the counter value from which it
/// may be dropped.
///
/// [`reclaim`](Self::reclaim) only frees a contiguous prefix: it stops at the
/// first entry that is not safe yet, even if a later one already is. Entries
/// are pushed with non-decreasing fences in practice, and reclaim runs every
/// frame, so nothing lingers for long.
pub struct RetiredQueue<T> {
    entries: VecDeque<Retired<T>>,
}

impl<T> Default for RetiredQueue<T> {
    fn default() -> Self {
        Self { entries: VecDeque::new() }
    }
}

impl<T> RetiredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `item` until the counter reaches `fence`.
    pub fn retire(&mut self, item: T, fence: u64) {
        self.entries.push_back(Retired { fence, _item: item });
    }

    /// Drop every entry from the front whose fence is at or before `counter`.
    ///
    /// Returns how many entries were dropped.
    pub fn reclaim(&mut self, counter: u64) -> usize {
        let mut reclaimed = 0;
        while self.entries.front().is_some_and(|entry| entry.fence <= counter) {
            self.entries.pop_front();
            reclaimed += 1;
        }
        reclaimed
    }

    /// Drop everything regardless of fences. Only valid once the device is idle.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The fence of the oldest entry still waiting.
    pub fn oldest_fence(&self) -> Option<u64> {
        self.entries.front().map(|entry| entry.fence)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Tracked {
        id: u32,
        dropped: Rc<RefCell<Vec<u32>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.borrow_mut().push(self.id);
        }
    }

    #[test]
    fn never_reclaimed_before_fence() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let mut queue = RetiredQueue::new();
        queue.retire(Tracked { id: 0, dropped: dropped.clone() }, 5);

        for counter in 0..5 {
            assert_eq!(queue.reclaim(counter), 0);
            assert!(dropped.borrow().is_empty());
        }

        assert_eq!(queue.reclaim(5), 1);
        assert_eq!(*dropped.borrow(), vec![0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn reclaim_without_eligible_entry_is_a_no_op() {
        let mut queue = RetiredQueue::new();
        queue.retire("a", 3);
        queue.retire("b", 4);

        assert_eq!(queue.reclaim(2), 0);
        assert_eq!(queue.reclaim(2), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.oldest_fence(), Some(3));
    }

    #[test]
    fn stops_at_first_unsafe_entry() {
        let mut queue = RetiredQueue::new();
        queue.retire("late", 10);
        queue.retire("early", 2);

        assert_eq!(queue.reclaim(5), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.reclaim(10), 2);
    }

    #[test]
    fn reclaims_contiguous_prefix_in_order() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let mut queue = RetiredQueue::new();
        for (id, fence) in [(0, 2), (1, 3), (2, 7)] {
            queue.retire(Tracked { id, dropped: dropped.clone() }, fence);
        }

        assert_eq!(queue.reclaim(3), 2);
        assert_eq!(*dropped.borrow(), vec![0, 1]);
        assert_eq!(queue.oldest_fence(), Some(7));
    }
}
