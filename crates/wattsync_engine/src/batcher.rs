//! Splits candidate sets into bounded work units.

use std::collections::VecDeque;

/// Yields fixed-size slices of a candidate set until it is exhausted.
///
/// Items are popped from the front, so callers that sorted the input get
/// batches in the same order.
///
/// # Example
///
/// ```rust
/// use wattsync_engine::Batcher;
///
/// let mut batcher = Batcher::new(1..=5);
/// assert_eq!(batcher.pop(2), vec![1, 2]);
/// assert_eq!(batcher.pop(2), vec![3, 4]);
/// assert_eq!(batcher.pop(2), vec![5]);
/// assert!(batcher.pop(2).is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Batcher<T> {
    items: VecDeque<T>,
}

impl<T> Batcher<T> {
    /// Creates a batcher over `items`.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Removes and returns up to `n` pending items.
    ///
    /// Returns an empty vector once exhausted, or when `n` is zero.
    pub fn pop(&mut self, n: usize) -> Vec<T> {
        let take = n.min(self.items.len());
        self.items.drain(..take).collect()
    }

    /// Number of pending items.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drains every pending item in batches of `n` (at least one).
    pub fn batches(mut self, n: usize) -> impl Iterator<Item = Vec<T>> {
        let n = n.max(1);
        std::iter::from_fn(move || {
            let batch = self.pop(n);
            (!batch.is_empty()).then_some(batch)
        })
    }
}
