//! Fixed-capacity FIFO used for congestion histories and the training set.
//!
//! Backed by a [`VecDeque`] allocated once at full capacity, so pushes never
//! reallocate and eviction is strictly oldest-first.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct BoundedFifo<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedFifo<T> {
    /// `capacity` is floored at 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, evicting and returning the oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// The `k`-th item counted from the newest end (`k = 1` is the newest).
    pub fn nth_from_end(&self, k: usize) -> Option<&T> {
        if k == 0 || k > self.items.len() {
            return None;
        }
        self.items.get(self.items.len() - k)
    }

    /// Iterate over at most the `n` newest items, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }
}

impl<T: Clone> BoundedFifo<T> {
    /// Copy of the contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> Extend<T> for BoundedFifo<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}
