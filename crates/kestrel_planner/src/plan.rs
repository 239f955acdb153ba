use std::fmt;

use kestrel_common::error::{KestrelResult, PlanError};
use kestrel_common::types::{ScanRange, TableId};
pub use kestrel_common::types::TableLayout;

/// The logical row window `[offset, offset + limit)` over the post-merge
/// row sequence, not the physical scan order. For grouped aggregates the
/// unit of counting is one aggregated group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetLimitWindow {
    /// Rows (or groups) to skip before emitting anything.
    pub offset: usize,
    /// Maximum rows (or groups) to emit. `None` = unbounded.
    pub limit: Option<usize>,
}

impl OffsetLimitWindow {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    /// The no-op window: skip nothing, emit everything.
    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn is_unconstrained(&self) -> bool {
        self.offset == 0 && self.limit.is_none()
    }

    /// `LIMIT 0`: the result is empty no matter what the scans would return.
    pub fn is_empty_window(&self) -> bool {
        self.limit == Some(0)
    }
}

/// A single already-compiled range scan over one table. This is what the
/// upstream compiler hands to the scan-execution layer; everything in it is
/// resolved and immutable by the time execution starts.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub table: TableId,
    /// Resolved table name, used by explain output and statistics lookup.
    pub table_name: String,
    pub range: ScanRange,
    /// Output must be in row-key order.
    pub key_ordered: bool,
    pub layout: TableLayout,
    /// Partition split points inside the table, ascending. Resolved from
    /// store metadata at compile time; read-only afterwards.
    pub partition_bounds: Vec<Vec<u8>>,
}

impl ScanPlan {
    /// Build a scan plan over `range`. Rejects a degenerate range
    /// (`start >= end`); malformed ranges never reach the splitter.
    pub fn new(
        table: TableId,
        table_name: impl Into<String>,
        range: ScanRange,
    ) -> KestrelResult<Self> {
        if range.is_degenerate() {
            return Err(PlanError::EmptyRange {
                start_hex: hex(range.start.as_deref().unwrap_or_default()),
                end_hex: hex(range.end.as_deref().unwrap_or_default()),
            }
            .into());
        }
        Ok(Self {
            table,
            table_name: table_name.into(),
            range,
            key_ordered: false,
            layout: TableLayout::default(),
            partition_bounds: Vec::new(),
        })
    }

    pub fn key_ordered(mut self, ordered: bool) -> Self {
        self.key_ordered = ordered;
        self
    }

    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_partition_bounds(mut self, bounds: Vec<Vec<u8>>) -> Self {
        self.partition_bounds = bounds;
        self
    }
}

/// How one aggregate output column is computed and merged across group
/// streams. COUNT/SUM partials add; MIN/MAX partials fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate output column: the kind plus the input column index in the
/// base row (`input` is ignored for COUNT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggSpec {
    pub kind: AggKind,
    pub input: usize,
}

impl AggSpec {
    pub fn count() -> Self {
        Self {
            kind: AggKind::Count,
            input: 0,
        }
    }

    pub fn sum(input: usize) -> Self {
        Self {
            kind: AggKind::Sum,
            input,
        }
    }

    pub fn min(input: usize) -> Self {
        Self {
            kind: AggKind::Min,
            input,
        }
    }

    pub fn max(input: usize) -> Self {
        Self {
            kind: AggKind::Max,
            input,
        }
    }
}

impl fmt::Display for AggSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AggKind::Count => write!(f, "COUNT(*)"),
            AggKind::Sum => write!(f, "SUM(col{})", self.input),
            AggKind::Min => write!(f, "MIN(col{})", self.input),
            AggKind::Max => write!(f, "MAX(col{})", self.input),
        }
    }
}

/// The compiled query shapes the scan-execution layer accepts. The window
/// always lives at this level; branch scans never carry their own.
#[derive(Debug, Clone)]
pub enum QueryPlan {
    /// Plain (possibly row-key-ordered) range scan.
    Scan {
        plan: ScanPlan,
        window: OffsetLimitWindow,
    },
    /// UNION ALL of branch scans; the window applies over the concatenation
    /// of branch outputs in declared order, never over a merged view.
    UnionAll {
        branches: Vec<ScanPlan>,
        window: OffsetLimitWindow,
    },
    /// GROUP BY rollup over one scan; the window counts aggregated groups,
    /// ordered by grouping key.
    GroupedAggregate {
        plan: ScanPlan,
        /// Input column indices forming the grouping key, in key order.
        group_by: Vec<usize>,
        aggregates: Vec<AggSpec>,
        window: OffsetLimitWindow,
    },
}

impl QueryPlan {
    pub fn scan(plan: ScanPlan, window: OffsetLimitWindow) -> Self {
        QueryPlan::Scan { plan, window }
    }

    /// Build a UNION ALL plan from compiled branches. Each branch must be a
    /// plain scan with no window of its own; the union owns the window.
    pub fn union_all(
        branches: Vec<QueryPlan>,
        window: OffsetLimitWindow,
    ) -> KestrelResult<Self> {
        if branches.is_empty() {
            return Err(PlanError::EmptyUnion.into());
        }
        let mut flat = Vec::with_capacity(branches.len());
        for (i, branch) in branches.into_iter().enumerate() {
            match branch {
                QueryPlan::Scan { plan, window } if window.is_unconstrained() => flat.push(plan),
                QueryPlan::Scan { .. } => return Err(PlanError::BranchWindow(i).into()),
                _ => {
                    return Err(PlanError::Statement(format!(
                        "UNION ALL branch {} must be a plain scan",
                        i
                    ))
                    .into())
                }
            }
        }
        Ok(QueryPlan::UnionAll {
            branches: flat,
            window,
        })
    }

    pub fn grouped_aggregate(
        plan: ScanPlan,
        group_by: Vec<usize>,
        aggregates: Vec<AggSpec>,
        window: OffsetLimitWindow,
    ) -> Self {
        QueryPlan::GroupedAggregate {
            plan,
            group_by,
            aggregates,
            window,
        }
    }

    pub fn window(&self) -> OffsetLimitWindow {
        match self {
            QueryPlan::Scan { window, .. }
            | QueryPlan::UnionAll { window, .. }
            | QueryPlan::GroupedAggregate { window, .. } => *window,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(name: &str) -> ScanPlan {
        ScanPlan::new(TableId(1), name, ScanRange::full()).unwrap()
    }

    #[test]
    fn test_window_predicates() {
        assert!(OffsetLimitWindow::unconstrained().is_unconstrained());
        assert!(OffsetLimitWindow::new(0, Some(0)).is_empty_window());
        assert!(!OffsetLimitWindow::new(10, Some(10)).is_unconstrained());
        assert!(!OffsetLimitWindow::new(10, None).is_empty_window());
    }

    #[test]
    fn test_degenerate_range_rejected() {
        let err = ScanPlan::new(TableId(1), "t", ScanRange::bounded(*b"m", *b"a")).unwrap_err();
        assert!(err.is_user_error());
        assert!(format!("{}", err).contains("Empty key range"));
    }

    #[test]
    fn test_layout_divergence() {
        assert!(!TableLayout::default().diverges_from_key_order());
        let salted = TableLayout {
            salted: true,
            local_index: false,
        };
        assert!(salted.diverges_from_key_order());
    }

    #[test]
    fn test_union_all_rejects_empty() {
        let err =
            QueryPlan::union_all(vec![], OffsetLimitWindow::unconstrained()).unwrap_err();
        assert!(format!("{}", err).contains("at least one branch"));
    }

    #[test]
    fn test_union_all_rejects_branch_window() {
        let branches = vec![
            QueryPlan::scan(plan("t"), OffsetLimitWindow::unconstrained()),
            QueryPlan::scan(plan("t"), OffsetLimitWindow::new(5, None)),
        ];
        let err = QueryPlan::union_all(branches, OffsetLimitWindow::new(10, Some(35)))
            .unwrap_err();
        assert!(format!("{}", err).contains("branch 1"));
    }

    #[test]
    fn test_union_all_flattens_branches() {
        let branches = vec![
            QueryPlan::scan(plan("t"), OffsetLimitWindow::unconstrained()),
            QueryPlan::scan(plan("t"), OffsetLimitWindow::unconstrained()),
        ];
        let union = QueryPlan::union_all(branches, OffsetLimitWindow::new(10, Some(35))).unwrap();
        match union {
            QueryPlan::UnionAll { branches, window } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(window.offset, 10);
                assert_eq!(window.limit, Some(35));
            }
            other => panic!("expected UnionAll, got {:?}", other),
        }
    }

    #[test]
    fn test_agg_spec_display() {
        assert_eq!(format!("{}", AggSpec::count()), "COUNT(*)");
        assert_eq!(format!("{}", AggSpec::sum(2)), "SUM(col2)");
        assert_eq!(format!("{}", AggSpec::min(1)), "MIN(col1)");
    }
}
