// ── Bounded history ring ───────────────────────────────────────────────────
//
// Fixed-capacity FIFO used for the decision, reflection and emotional
// histories. Not internally synchronized; owners wrap it in a lock.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append, evicting the oldest entry when full. Returns the evicted entry.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(item);
        evicted
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut h = BoundedHistory::new(3);
        for i in 0..3 {
            assert_eq!(h.push(i), None);
        }
        assert_eq!(h.push(3), Some(0));
        assert_eq!(h.to_vec(), vec![1, 2, 3]);
        assert_eq!(h.latest(), Some(&3));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut h = BoundedHistory::new(0);
        h.push("a");
        h.push("b");
        assert_eq!(h.len(), 1);
        assert_eq!(h.capacity(), 1);
    }
}
