//! EXPLAIN rendering. Runs the same split and group selection as
//! execution, then describes what would happen, one text row per line.
//! Nothing here issues a scan.

use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::KestrelResult;
use kestrel_planner::{OffsetLimitWindow, QueryPlan, ScanPlan};

use crate::grouper::ScanGroup;
use crate::parallel::ScanExecutor;

pub(crate) fn render_plan(
    executor: &ScanExecutor,
    plan: &QueryPlan,
) -> KestrelResult<Vec<OwnedRow>> {
    let mut lines = Vec::new();
    match plan {
        QueryPlan::Scan { plan: scan, window } => {
            let groups = executor.plan_groups(scan, false)?;
            lines.push(scan_head(scan, &groups, 0));
            if groups.len() == 1 {
                if window.offset > 0 {
                    lines.push(format!("    SERVER OFFSET {}", window.offset));
                }
            } else {
                if scan.key_ordered {
                    lines.push("CLIENT MERGE SORT".to_string());
                }
                push_client_offset(&mut lines, window);
            }
            push_limit(&mut lines, window);
        }
        QueryPlan::UnionAll { branches, window } => {
            lines.push(format!("CLIENT UNION ALL OVER {} QUERIES", branches.len()));
            for branch in branches {
                let groups = executor.plan_groups(branch, false)?;
                lines.push(scan_head(branch, &groups, 4));
                if groups.len() > 1 && branch.key_ordered {
                    lines.push("    CLIENT MERGE SORT".to_string());
                }
            }
            push_client_offset(&mut lines, window);
            push_limit(&mut lines, window);
        }
        QueryPlan::GroupedAggregate {
            plan: scan, window, ..
        } => {
            let groups = executor.plan_groups(scan, true)?;
            lines.push(scan_head(scan, &groups, 0));
            lines.push("    SERVER AGGREGATE INTO ORDERED ROWS".to_string());
            if groups.len() > 1 {
                lines.push("CLIENT MERGE SORT".to_string());
            }
            push_client_offset(&mut lines, window);
            push_limit(&mut lines, window);
        }
    }
    Ok(lines
        .into_iter()
        .map(|line| OwnedRow::new(vec![Datum::Text(line)]))
        .collect())
}

fn scan_head(scan: &ScanPlan, groups: &[ScanGroup], indent: usize) -> String {
    let concurrency = if groups.len() == 1 { "SERIAL" } else { "PARALLEL" };
    let shape = if scan.range.start.is_none() && scan.range.end.is_none() {
        "FULL"
    } else {
        "RANGE"
    };
    format!(
        "{}CLIENT {}-WAY {} {} SCAN OVER {}",
        " ".repeat(indent),
        groups.len(),
        concurrency,
        shape,
        scan.table_name
    )
}

fn push_client_offset(lines: &mut Vec<String>, window: &OffsetLimitWindow) {
    if window.offset > 0 {
        lines.push(format!("CLIENT OFFSET {}", window.offset));
    }
}

fn push_limit(lines: &mut Vec<String>, window: &OffsetLimitWindow) {
    if let Some(limit) = window.limit {
        lines.push(format!("CLIENT {} ROW LIMIT", limit));
    }
}
