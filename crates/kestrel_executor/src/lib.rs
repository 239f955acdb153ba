//! Scan execution over the partitioned key-value transport.
//!
//! A compiled plan comes in; statistics-driven range splitting carves it
//! into sub-scans, a grouping policy folds those into concurrent groups,
//! one worker per group streams rows back, and the merge stage applies
//! ordering, offset and limit behind a lazy [`RowCursor`].

mod explain;
pub mod grouper;
pub mod merge;
pub mod parallel;
pub mod split;

pub use grouper::{grouper_for_plan, BoundaryRegroup, NoRegroup, ScanGroup, ScanGrouper};
pub use merge::{encode_group_key, GroupAccumulator, RowCursor};
pub use parallel::{ScanExecutor, ScanMetrics};
pub use split::{split_scan_ranges, RangeScan};
