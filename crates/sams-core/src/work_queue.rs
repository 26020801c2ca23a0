//! Lock-free work queue for spreading partitions across worker threads

use std::sync::atomic::{AtomicUsize, Ordering};

/// Items are claimed in order; each item is handed out exactly once.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item, or `None` once the queue is drained
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items not yet claimed
    pub fn remaining(&self) -> usize {
        self.items
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_in_order() {
        let q = WorkQueue::new(vec!["a", "b"]);
        assert_eq!(q.total(), 2);
        assert_eq!(q.next(), Some(&"a"));
        assert_eq!(q.remaining(), 1);
        assert_eq!(q.next(), Some(&"b"));
        assert_eq!(q.next(), None);
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        let q = WorkQueue::new((0..1000).collect::<Vec<u32>>());
        let claimed = std::sync::Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while let Some(&i) = q.next() {
                        claimed.lock().unwrap().push(i);
                    }
                });
            }
        });
        let mut claimed = claimed.into_inner().unwrap();
        claimed.sort_unstable();
        assert_eq!(claimed, (0..1000).collect::<Vec<u32>>());
    }
}
