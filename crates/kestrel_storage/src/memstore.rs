//! In-memory partitioned row store backing tests and local development.
//!
//! `MemStore` implements `ScanTransport` the way a partition server batch
//! would: a scan snapshots the covered rows under the read lock, applies
//! the server offset there, and hands back a stream the caller drains row
//! by row.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use kestrel_common::datum::OwnedRow;
use kestrel_common::error::{KestrelError, KestrelResult, PlanError, ScanError};
use kestrel_common::types::{KeyedRow, ScanRange, TableId, TableLayout};

use crate::region::PartitionMap;
use crate::transport::{RowStream, ScanTransport, TableMeta};

/// Injected failure for scan-abort tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Every scan against the table fails at issue time.
    Unavailable,
    /// Streams yield `after_rows` rows, then fail as if the partition moved
    /// under the scan.
    PartitionMovedAfter { after_rows: usize },
}

struct MemTable {
    id: TableId,
    name: String,
    layout: TableLayout,
    partitions: PartitionMap,
    rows: BTreeMap<Vec<u8>, OwnedRow>,
    failure: Option<FailureMode>,
}

#[derive(Default)]
struct Catalog {
    by_id: HashMap<TableId, MemTable>,
    by_name: HashMap<String, TableId>,
}

pub struct MemStore {
    catalog: RwLock<Catalog>,
    next_table_id: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            next_table_id: AtomicU64::new(1),
        }
    }

    /// Creates a table with the given split points. Names are stored
    /// lowercase, matching statement parsing.
    pub fn create_table(
        &self,
        name: &str,
        layout: TableLayout,
        split_points: Vec<Vec<u8>>,
    ) -> KestrelResult<TableId> {
        let name = name.to_ascii_lowercase();
        let mut catalog = self.catalog.write();
        if catalog.by_name.contains_key(&name) {
            return Err(KestrelError::Internal(format!(
                "table {:?} already exists",
                name
            )));
        }
        let id = TableId(self.next_table_id.fetch_add(1, Ordering::Relaxed));
        catalog.by_id.insert(
            id,
            MemTable {
                id,
                name: name.clone(),
                layout,
                partitions: PartitionMap::new(split_points),
                rows: BTreeMap::new(),
                failure: None,
            },
        );
        catalog.by_name.insert(name, id);
        Ok(id)
    }

    pub fn put(
        &self,
        table: TableId,
        key: impl Into<Vec<u8>>,
        row: OwnedRow,
    ) -> KestrelResult<()> {
        let mut catalog = self.catalog.write();
        let t = catalog
            .by_id
            .get_mut(&table)
            .ok_or(ScanError::TableNotFound(table))?;
        t.rows.insert(key.into(), row);
        Ok(())
    }

    pub fn row_count(&self, table: TableId) -> usize {
        self.catalog
            .read()
            .by_id
            .get(&table)
            .map_or(0, |t| t.rows.len())
    }

    /// Arms or clears failure injection for a table.
    pub fn set_failure(&self, table: TableId, failure: Option<FailureMode>) {
        if let Some(t) = self.catalog.write().by_id.get_mut(&table) {
            t.failure = failure;
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanTransport for MemStore {
    fn scan(
        &self,
        table: TableId,
        range: &ScanRange,
        server_offset: Option<usize>,
    ) -> KestrelResult<Box<dyn RowStream>> {
        let catalog = self.catalog.read();
        let t = catalog
            .by_id
            .get(&table)
            .ok_or(ScanError::TableNotFound(table))?;
        if t.failure == Some(FailureMode::Unavailable) {
            return Err(ScanError::Unavailable(format!("{} is offline", table)).into());
        }
        let fail_after = match t.failure {
            Some(FailureMode::PartitionMovedAfter { after_rows }) => Some(after_rows),
            _ => None,
        };

        // The planner rejects degenerate ranges; a raw caller gets an empty
        // stream rather than a panic out of BTreeMap::range.
        let mut rows = Vec::new();
        let mut discarded = 0usize;
        if !range.is_degenerate() {
            let lower = match &range.start {
                Some(k) => Bound::Included(k.clone()),
                None => Bound::Unbounded,
            };
            let upper = match &range.end {
                Some(k) => Bound::Excluded(k.clone()),
                None => Bound::Unbounded,
            };
            let to_skip = server_offset.unwrap_or(0);
            for (key, row) in t.rows.range((lower, upper)) {
                if discarded < to_skip {
                    discarded += 1;
                    continue;
                }
                rows.push(KeyedRow::new(key.clone(), row.clone()));
            }
        }
        debug!(
            "mem scan table={} range={} server_offset={:?} rows={} discarded={}",
            table,
            range,
            server_offset,
            rows.len(),
            discarded
        );
        Ok(Box::new(MemStream {
            table,
            rows: rows.into_iter(),
            yielded: 0,
            discarded,
            fail_after,
        }))
    }

    fn table_meta(&self, name: &str) -> KestrelResult<TableMeta> {
        let name = name.to_ascii_lowercase();
        let catalog = self.catalog.read();
        let id = catalog
            .by_name
            .get(&name)
            .ok_or_else(|| PlanError::UnknownTable(name.clone()))?;
        let t = &catalog.by_id[id];
        Ok(TableMeta {
            id: t.id,
            name: t.name.clone(),
            layout: t.layout,
            partition_bounds: t.partitions.bounds().to_vec(),
        })
    }
}

struct MemStream {
    table: TableId,
    rows: std::vec::IntoIter<KeyedRow>,
    yielded: usize,
    discarded: usize,
    fail_after: Option<usize>,
}

impl RowStream for MemStream {
    fn next_row(&mut self) -> KestrelResult<Option<KeyedRow>> {
        if let Some(after) = self.fail_after {
            if self.yielded >= after {
                return Err(ScanError::PartitionMoved(format!(
                    "{} split under scan after {} rows",
                    self.table, self.yielded
                ))
                .into());
            }
        }
        match self.rows.next() {
            Some(row) => {
                self.yielded += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn rows_discarded(&self) -> usize {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::datum::Datum;

    fn int_row(n: i64) -> OwnedRow {
        OwnedRow::new(vec![Datum::Int64(n)])
    }

    fn alphabet_store() -> (MemStore, TableId) {
        let store = MemStore::new();
        let splits = vec![b"e".to_vec(), b"i".to_vec(), b"o".to_vec()];
        let id = store
            .create_table("t", TableLayout::default(), splits)
            .unwrap();
        for (i, c) in (b'a'..=b'z').enumerate() {
            store.put(id, vec![c], int_row(i as i64)).unwrap();
        }
        (store, id)
    }

    fn drain(mut stream: Box<dyn RowStream>) -> (Vec<String>, usize) {
        let mut keys = Vec::new();
        while let Some(kr) = stream.next_row().unwrap() {
            keys.push(String::from_utf8(kr.key).unwrap());
        }
        (keys, stream.rows_discarded())
    }

    #[test]
    fn test_scan_range_in_key_order() {
        let (store, id) = alphabet_store();
        let (keys, discarded) = drain(store.scan(id, &ScanRange::bounded("e", "i"), None).unwrap());
        assert_eq!(keys, vec!["e", "f", "g", "h"]);
        assert_eq!(discarded, 0);
    }

    #[test]
    fn test_server_offset_discards_leading_rows() {
        let (store, id) = alphabet_store();
        let (keys, discarded) = drain(store.scan(id, &ScanRange::full(), Some(23)).unwrap());
        assert_eq!(keys, vec!["x", "y", "z"]);
        assert_eq!(discarded, 23);
    }

    #[test]
    fn test_server_offset_past_end_discards_all() {
        let (store, id) = alphabet_store();
        let (keys, discarded) = drain(store.scan(id, &ScanRange::bounded("a", "e"), Some(100)).unwrap());
        assert!(keys.is_empty());
        assert_eq!(discarded, 4);
    }

    #[test]
    fn test_unknown_table_meta_is_user_error() {
        let store = MemStore::new();
        let err = store.table_meta("missing").unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_unavailable_fails_at_issue() {
        let (store, id) = alphabet_store();
        store.set_failure(id, Some(FailureMode::Unavailable));
        let Err(err) = store.scan(id, &ScanRange::full(), None) else {
            panic!("unavailable table must fail at issue");
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_partition_moved_fails_mid_stream() {
        let (store, id) = alphabet_store();
        store.set_failure(id, Some(FailureMode::PartitionMovedAfter { after_rows: 3 }));
        let mut stream = store.scan(id, &ScanRange::full(), None).unwrap();
        for _ in 0..3 {
            assert!(stream.next_row().unwrap().is_some());
        }
        let err = stream.next_row().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_degenerate_range_yields_empty_stream() {
        let (store, id) = alphabet_store();
        let (keys, _) = drain(store.scan(id, &ScanRange::bounded("m", "c"), None).unwrap());
        assert!(keys.is_empty());
    }
}
