//! The seam between scan execution and the storage tier.
//!
//! `ScanTransport` is how the executor issues scans. In production this is
//! a client fanning out to partition servers; in tests it is the in-memory
//! store. Streams are pulled one row at a time so a cancelled query stops
//! fetching instead of draining the server.

use kestrel_common::error::KestrelResult;
use kestrel_common::types::{KeyedRow, ScanRange, TableId, TableLayout};

/// Compile-time table metadata.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub id: TableId,
    pub name: String,
    pub layout: TableLayout,
    /// Partition split points, ascending.
    pub partition_bounds: Vec<Vec<u8>>,
}

/// A key-ordered stream of rows from one scan.
///
/// `Ok(None)` marks exhaustion. Any `Err` is fatal for the whole query;
/// callers must not retry it or skip past it.
pub trait RowStream: Send {
    fn next_row(&mut self) -> KestrelResult<Option<KeyedRow>>;

    /// Rows the storage tier consumed and discarded to honor the requested
    /// server offset. Only meaningful once the stream is exhausted.
    fn rows_discarded(&self) -> usize;
}

/// Scan-issuing surface of the storage tier.
pub trait ScanTransport: Send + Sync {
    /// Issues one scan over `range`. When `server_offset` is set, the
    /// storage tier discards up to that many leading rows before the first
    /// row crosses the seam; `RowStream::rows_discarded` reports how many
    /// were actually consumed.
    fn scan(
        &self,
        table: TableId,
        range: &ScanRange,
        server_offset: Option<usize>,
    ) -> KestrelResult<Box<dyn RowStream>>;

    /// Metadata lookup by table name.
    fn table_meta(&self, name: &str) -> KestrelResult<TableMeta>;
}
