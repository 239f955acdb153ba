//! Partition split-point bookkeeping for range-partitioned tables.
//!
//! A table with N split points has N + 1 partitions. Partition `i` covers
//! `[bounds[i-1], bounds[i])`; the first partition is unbounded below and
//! the last unbounded above. Keys are raw row-key bytes compared in plain
//! lexicographic order.

use kestrel_common::types::ScanRange;

/// Ascending, distinct split points of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMap {
    bounds: Vec<Vec<u8>>,
}

impl PartitionMap {
    /// Builds a map from raw split points. Bounds are sorted and
    /// deduplicated; an empty key splits nothing and is dropped.
    pub fn new(mut bounds: Vec<Vec<u8>>) -> Self {
        bounds.retain(|b| !b.is_empty());
        bounds.sort();
        bounds.dedup();
        Self { bounds }
    }

    pub fn bounds(&self) -> &[Vec<u8>] {
        &self.bounds
    }

    pub fn partition_count(&self) -> usize {
        self.bounds.len() + 1
    }

    /// Index of the partition holding `key`.
    pub fn partition_index(&self, key: &[u8]) -> usize {
        self.bounds.partition_point(|b| b.as_slice() <= key)
    }

    /// Index of the partition a range starts in. An unbounded start lands
    /// in partition 0.
    pub fn range_start_partition(&self, range: &ScanRange) -> usize {
        match &range.start {
            Some(key) => self.partition_index(key),
            None => 0,
        }
    }

    /// Split points strictly inside `range`. A bound equal to the range
    /// start cuts nothing and is skipped.
    pub fn bounds_within(&self, range: &ScanRange) -> Vec<Vec<u8>> {
        self.bounds
            .iter()
            .filter(|b| {
                let after_start = range
                    .start
                    .as_ref()
                    .map_or(true, |s| b.as_slice() > s.as_slice());
                let before_end = range
                    .end
                    .as_ref()
                    .map_or(true, |e| b.as_slice() < e.as_slice());
                after_start && before_end
            })
            .cloned()
            .collect()
    }
}
