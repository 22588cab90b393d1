//! Batch collector.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Default `max_size` of the sized collectors.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

type Factory<B> = Arc<dyn Fn() -> B + Send + Sync>;
type Accumulator<B, E> = Arc<dyn Fn(&mut B, E) + Send + Sync>;
type ReadyTest<B> = Arc<dyn Fn(&B) -> bool + Send + Sync>;

/// Describes how items of type `E` are grouped into batches of type `B`.
///
/// Three functions: make an empty batch, add an item to a batch, decide whether a batch
/// is ready to be dispatched. The batch type itself is opaque to the processor.
pub struct BatchCollector<B, E> {
    factory: Factory<B>,
    accumulator: Accumulator<B, E>,
    ready: ReadyTest<B>,
}

impl<B, E> BatchCollector<B, E> {
    pub fn new<F, A, R>(factory: F, accumulator: A, ready: R) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        A: Fn(&mut B, E) + Send + Sync + 'static,
        R: Fn(&B) -> bool + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            accumulator: Arc::new(accumulator),
            ready: Arc::new(ready),
        }
    }

    /// A collector whose batches are ready once `size_of(batch) >= max_size`.
    pub fn sized<F, A, S>(factory: F, accumulator: A, size_of: S, max_size: usize) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        A: Fn(&mut B, E) + Send + Sync + 'static,
        S: Fn(&B) -> usize + Send + Sync + 'static,
    {
        Self::new(factory, accumulator, move |batch: &B| {
            size_of(batch) >= max_size
        })
    }

    pub fn new_batch(&self) -> B {
        (self.factory)()
    }

    pub fn accumulate(&self, batch: &mut B, item: E) {
        (self.accumulator)(batch, item)
    }

    pub fn is_ready(&self, batch: &B) -> bool {
        (self.ready)(batch)
    }
}

impl<E: Send + 'static> BatchCollector<Vec<E>, E> {
    /// Items in arrival order, `max_size` per batch.
    pub fn vec(max_size: usize) -> Self {
        Self::sized(
            move || Vec::with_capacity(max_size.min(DEFAULT_MAX_BATCH_SIZE)),
            |batch: &mut Vec<E>, item| batch.push(item),
            Vec::len,
            max_size,
        )
    }
}

impl<E: Eq + Hash + Send + 'static> BatchCollector<HashSet<E>, E> {
    /// Distinct items, ready at `max_size` distinct entries.
    pub fn hash_set(max_size: usize) -> Self {
        Self::sized(
            HashSet::new,
            |batch: &mut HashSet<E>, item| {
                batch.insert(item);
            },
            HashSet::len,
            max_size,
        )
    }
}

impl<E: Ord + Send + 'static> BatchCollector<BTreeSet<E>, E> {
    /// Distinct items in sorted order, ready at `max_size` distinct entries.
    pub fn btree_set(max_size: usize) -> Self {
        Self::sized(
            BTreeSet::new,
            |batch: &mut BTreeSet<E>, item| {
                batch.insert(item);
            },
            BTreeSet::len,
            max_size,
        )
    }
}

impl<E: Send + 'static> Default for BatchCollector<Vec<E>, E> {
    fn default() -> Self {
        Self::vec(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl<B, E> Clone for BatchCollector<B, E> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            accumulator: Arc::clone(&self.accumulator),
            ready: Arc::clone(&self.ready),
        }
    }
}

impl<B, E> fmt::Debug for BatchCollector<B, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCollector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_collector() {
        let collector = BatchCollector::vec(3);
        let mut batch = collector.new_batch();
        for i in 0..2 {
            collector.accumulate(&mut batch, i);
            assert!(!collector.is_ready(&batch));
        }
        collector.accumulate(&mut batch, 2);
        assert!(collector.is_ready(&batch));
        assert_eq!(batch, vec![0, 1, 2]);
    }

    #[test]
    fn test_set_collectors_count_distinct_items() {
        let collector = BatchCollector::hash_set(2);
        let mut batch = collector.new_batch();
        collector.accumulate(&mut batch, "a");
        collector.accumulate(&mut batch, "a");
        assert!(!collector.is_ready(&batch));
        collector.accumulate(&mut batch, "b");
        assert!(collector.is_ready(&batch));

        let collector = BatchCollector::btree_set(3);
        let mut batch = collector.new_batch();
        for item in [5, 1, 5, 3] {
            collector.accumulate(&mut batch, item);
        }
        assert!(collector.is_ready(&batch));
        assert_eq!(batch.into_iter().collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn test_custom_ready_test() {
        // batch strings until 10 characters are buffered
        let collector = BatchCollector::sized(
            String::new,
            |batch: &mut String, item: &str| batch.push_str(item),
            String::len,
            10,
        );
        let mut batch = collector.new_batch();
        collector.accumulate(&mut batch, "hello");
        assert!(!collector.is_ready(&batch));
        collector.accumulate(&mut batch, "world");
        assert!(collector.is_ready(&batch));
    }

    #[test]
    fn test_default_collector_size() {
        let collector: BatchCollector<Vec<u32>, u32> = BatchCollector::default();
        let mut batch = collector.new_batch();
        for i in 0..999 {
            collector.accumulate(&mut batch, i);
        }
        assert!(!collector.is_ready(&batch));
        collector.accumulate(&mut batch, 999);
        assert!(collector.is_ready(&batch));
    }
}
