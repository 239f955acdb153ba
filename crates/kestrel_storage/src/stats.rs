//! Guidepost statistics: collection, registry, lookup.
//!
//! A guidepost marks a key where roughly `width` estimated bytes have
//! accumulated since the previous mark. The range splitter turns them into
//! scan cut points. Collection walks the table in key order through the
//! same transport scans use, so whatever serves reads also serves stats.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::info;

use kestrel_common::config::StatsConfig;
use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, StatsError};
use kestrel_common::types::{KeyedRow, ScanRange};

use crate::transport::ScanTransport;

/// Fixed per-row storage overhead included in byte estimates.
const ROW_OVERHEAD_BYTES: u64 = 16;

/// One cut candidate inside a table's key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guidepost {
    /// Key at which a new sub-range may start.
    pub key: Vec<u8>,
    /// Estimated bytes accumulated since the previous guidepost.
    pub bytes: u64,
}

/// Snapshot of one table's guidepost statistics.
#[derive(Debug, Clone, Default)]
pub struct GuidepostIndex {
    /// Byte-width threshold the guideposts were collected with.
    pub width_bytes: u64,
    /// Ascending by key.
    pub guideposts: Vec<Guidepost>,
    pub rows_sampled: u64,
    pub collected_at_ms: i64,
}

impl GuidepostIndex {
    /// True when the snapshot can drive range splitting.
    pub fn is_usable(&self) -> bool {
        self.width_bytes > 0 && !self.guideposts.is_empty()
    }
}

/// Outcome of one statistics run, for admin output and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSummary {
    pub table: String,
    pub width_bytes: u64,
    pub guidepost_count: usize,
    pub rows_sampled: u64,
}

/// Per-table guidepost snapshots, keyed by lowercase table name.
pub struct StatsRegistry {
    config: StatsConfig,
    tables: RwLock<HashMap<String, GuidepostIndex>>,
}

impl StatsRegistry {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot for a table, if statistics have been collected.
    pub fn guideposts(&self, table_name: &str) -> Option<GuidepostIndex> {
        self.tables.read().get(table_name).cloned()
    }

    pub fn clear(&self, table_name: &str) {
        self.tables.write().remove(table_name);
    }

    /// Runs statistics collection for one table.
    ///
    /// `width` overrides the guidepost width. `None` keeps the table's
    /// current width, falling back to the configured default if statistics
    /// were never collected. A width of 0 drops the table's statistics.
    pub fn update_statistics(
        &self,
        transport: &dyn ScanTransport,
        table_name: &str,
        width: Option<u64>,
    ) -> KestrelResult<StatsSummary> {
        let meta = transport.table_meta(table_name)?;
        let width_bytes = match width {
            Some(w) => w,
            None => self
                .tables
                .read()
                .get(&meta.name)
                .map(|index| index.width_bytes)
                .unwrap_or(self.config.default_guidepost_width_bytes),
        };

        if width_bytes == 0 {
            self.clear(&meta.name);
            info!("cleared statistics for table {}", meta.name);
            return Ok(StatsSummary {
                table: meta.name,
                width_bytes: 0,
                guidepost_count: 0,
                rows_sampled: 0,
            });
        }

        let mut stream = transport.scan(meta.id, &ScanRange::full(), None)?;
        let mut guideposts = Vec::new();
        let mut accumulated = 0u64;
        let mut rows_sampled = 0u64;
        while let Some(keyed) = stream.next_row()? {
            rows_sampled += 1;
            accumulated += estimated_row_bytes(&keyed);
            if accumulated >= width_bytes {
                guideposts.push(Guidepost {
                    key: keyed.key,
                    bytes: accumulated,
                });
                accumulated = 0;
                if guideposts.len() > self.config.max_guideposts_per_table {
                    return Err(StatsError::TooManyGuideposts {
                        table: meta.name,
                        max: self.config.max_guideposts_per_table,
                    }
                    .into());
                }
            }
        }

        let summary = StatsSummary {
            table: meta.name.clone(),
            width_bytes,
            guidepost_count: guideposts.len(),
            rows_sampled,
        };
        info!(
            "collected statistics for table {}: width={}B guideposts={} rows={}",
            meta.name, width_bytes, summary.guidepost_count, rows_sampled
        );
        self.tables.write().insert(
            meta.name,
            GuidepostIndex {
                width_bytes,
                guideposts,
                rows_sampled,
                collected_at_ms: Utc::now().timestamp_millis(),
            },
        );
        Ok(summary)
    }
}

/// Estimated stored size of one row: key, values, fixed overhead.
pub fn estimated_row_bytes(keyed: &KeyedRow) -> u64 {
    let values: u64 = keyed.row.values.iter().map(datum_bytes).sum();
    keyed.key.len() as u64 + values + ROW_OVERHEAD_BYTES
}

fn datum_bytes(datum: &Datum) -> u64 {
    match datum {
        Datum::Null => 1,
        Datum::Boolean(_) => 1,
        Datum::Int64(_) => 8,
        Datum::Float64(_) => 8,
        Datum::Text(s) => s.len() as u64,
    }
}
