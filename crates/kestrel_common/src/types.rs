use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datum::OwnedRow;

/// Identifies a table in the catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table_{}", self.0)
    }
}

/// A half-open `[start, end)` interval over the primary-key byte encoding,
/// plus an opaque server-side filter descriptor forwarded untouched to the
/// scan request. Immutable once constructed.
///
/// `None` on either side means unbounded; `ScanRange::full()` is the
/// whole-table scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
    /// Server-side filter/projection descriptor. Not interpreted here.
    pub filter: Option<String>,
}

impl ScanRange {
    pub fn new(start: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self {
            start,
            end,
            filter: None,
        }
    }

    /// Unbounded range covering the whole table.
    pub fn full() -> Self {
        Self::new(None, None)
    }

    /// Bounded `[start, end)` range.
    pub fn bounded(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self::new(Some(start.into()), Some(end.into()))
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// True when `key` falls inside `[start, end)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_slice() {
                return false;
            }
        }
        true
    }

    /// True when both ends are bounded and `start >= end` (no key can match).
    pub fn is_degenerate(&self) -> bool {
        match (&self.start, &self.end) {
            (Some(s), Some(e)) => s >= e,
            _ => false,
        }
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn bound(b: &Option<Vec<u8>>) -> String {
            match b {
                None => "*".to_string(),
                Some(k) => k.iter().map(|b| format!("{:02x}", b)).collect(),
            }
        }
        write!(f, "[{} - {})", bound(&self.start), bound(&self.end))
    }
}

/// Physical layout properties that make on-disk key order diverge from
/// logical row-key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableLayout {
    /// Keys carry a salt prefix to spread write load.
    pub salted: bool,
    /// The scan targets a local index co-located with base-table partitions.
    pub local_index: bool,
}

impl TableLayout {
    /// True when adjacent key ranges on disk are not adjacent in logical
    /// row-key order, so restoring global order needs a partition-aligned
    /// merge.
    pub fn diverges_from_key_order(&self) -> bool {
        self.salted || self.local_index
    }
}

/// One output row: the primary-key bytes it is stored under plus its column
/// values. The key doubles as the merge/sort key for ordered plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRow {
    pub key: Vec<u8>,
    pub row: OwnedRow,
}

impl KeyedRow {
    pub fn new(key: impl Into<Vec<u8>>, row: OwnedRow) -> Self {
        Self {
            key: key.into(),
            row,
        }
    }
}
