//! Scan grouping policies: where one worker's serial run of sub-scans ends
//! and a new concurrent group begins.

use kestrel_common::types::ScanRange;
use kestrel_planner::ScanPlan;

use crate::split::RangeScan;

/// An ordered, non-empty run of sub-scans executed serially by one worker.
/// Groups run concurrently with each other; taken in group order then
/// in-group order, their scans cover the planned range exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanGroup {
    pub scans: Vec<ScanRange>,
}

/// Decides, per candidate sub-scan in split order, whether it starts a new
/// concurrent group. The first sub-scan always opens the first group; the
/// policy is consulted once for every later one. Decisions are final:
/// appending never reshuffles earlier assignments.
pub trait ScanGrouper: Send + Sync {
    fn should_start_new_group(
        &self,
        plan: &ScanPlan,
        scans_in_group: usize,
        candidate_start: Option<&[u8]>,
        crossed_partition_boundary: bool,
    ) -> bool;
}

/// Never regroups: every sub-scan joins the one running group, which then
/// executes fully serially. Correct whenever the plan needs no
/// boundary-aligned merge.
pub struct NoRegroup;

impl ScanGrouper for NoRegroup {
    fn should_start_new_group(
        &self,
        _plan: &ScanPlan,
        _scans_in_group: usize,
        _candidate_start: Option<&[u8]>,
        _crossed_partition_boundary: bool,
    ) -> bool {
        false
    }
}

/// Starts a new group whenever a sub-scan crosses into a later partition,
/// so each group's scans stay within one partition run. This is the policy
/// for any plan that later merges or pre-aggregates per group.
pub struct BoundaryRegroup;

impl ScanGrouper for BoundaryRegroup {
    fn should_start_new_group(
        &self,
        _plan: &ScanPlan,
        _scans_in_group: usize,
        _candidate_start: Option<&[u8]>,
        crossed_partition_boundary: bool,
    ) -> bool {
        crossed_partition_boundary
    }
}

/// Policy for a plain scan, decided once from the plan shape: plans that
/// are row-key ordered, or whose layout diverges from key order (salted /
/// local index), need boundary-aligned groups; anything else runs as one
/// serial group. Callers hold the result behind the trait and never branch
/// on the concrete variant.
pub fn grouper_for_plan(plan: &ScanPlan) -> Box<dyn ScanGrouper> {
    if plan.key_ordered || plan.layout.diverges_from_key_order() {
        Box::new(BoundaryRegroup)
    } else {
        Box::new(NoRegroup)
    }
}

/// Folds split output into groups under the policy.
pub fn build_groups(
    plan: &ScanPlan,
    splits: &[RangeScan],
    grouper: &dyn ScanGrouper,
) -> Vec<ScanGroup> {
    let mut groups: Vec<ScanGroup> = Vec::new();
    let mut prev_partition: Option<usize> = None;
    for split in splits {
        let crossed = prev_partition.map_or(false, |prev| split.start_partition > prev);
        let start_new = match groups.last() {
            None => true,
            Some(current) => grouper.should_start_new_group(
                plan,
                current.scans.len(),
                split.range.start.as_deref(),
                crossed,
            ),
        };
        if start_new {
            groups.push(ScanGroup { scans: Vec::new() });
        }
        if let Some(group) = groups.last_mut() {
            group.scans.push(split.range.clone());
        }
        prev_partition = Some(split.start_partition);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::types::{TableId, TableLayout};
    use crate::split::split_scan_ranges;
    use kestrel_storage::stats::{Guidepost, GuidepostIndex};

    fn plan(key_ordered: bool, salted: bool) -> ScanPlan {
        let p = ScanPlan::new(TableId(1), "t", ScanRange::full()).unwrap();
        p.key_ordered(key_ordered).with_layout(TableLayout {
            salted,
            local_index: false,
        })
    }

    fn splits() -> Vec<RangeScan> {
        // Partitions at e/i/o, guideposts at c/f/l/r: eight sub-scans
        // across four partitions.
        let stats = GuidepostIndex {
            width_bytes: 100,
            guideposts: ["c", "f", "l", "r"]
                .iter()
                .map(|k| Guidepost {
                    key: k.as_bytes().to_vec(),
                    bytes: 100,
                })
                .collect(),
            rows_sampled: 0,
            collected_at_ms: 0,
        };
        let bounds = vec![b"e".to_vec(), b"i".to_vec(), b"o".to_vec()];
        split_scan_ranges(&ScanRange::full(), &bounds, Some(&stats))
    }

    #[test]
    fn test_no_regroup_single_serial_group() {
        let plan = plan(false, false);
        let splits = splits();
        let groups = build_groups(&plan, &splits, &NoRegroup);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].scans.len(), splits.len());
    }

    #[test]
    fn test_boundary_regroup_one_group_per_partition_run() {
        let plan = plan(true, false);
        let splits = splits();
        let groups = build_groups(&plan, &splits, &BoundaryRegroup);
        // Cuts at c/e/f/i/l/o/r produce 8 scans; partition starts change at
        // e, i and o, giving 4 groups.
        assert_eq!(splits.len(), 8);
        assert_eq!(groups.len(), 4);
        let sizes: Vec<usize> = groups.iter().map(|g| g.scans.len()).collect();
        assert_eq!(sizes, vec![2, 2, 2, 2]);
        // Concatenated group scans reproduce the split order.
        let flattened: Vec<ScanRange> = groups
            .iter()
            .flat_map(|g| g.scans.iter().cloned())
            .collect();
        let expected: Vec<ScanRange> = splits.iter().map(|s| s.range.clone()).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_boundary_regroup_is_shape_independent() {
        // Aggregates force boundary grouping even over unordered plain
        // tables; the policy itself only looks at the crossing flag.
        let plan = plan(false, false);
        let groups = build_groups(&plan, &splits(), &BoundaryRegroup);
        assert_eq!(groups.len(), 4);
    }

    #[test]
    fn test_grouper_selection_by_plan_shape() {
        let ordered = plan(true, false);
        let unordered = plan(false, false);
        let salted = plan(false, true);
        let splits = splits();
        assert_eq!(
            build_groups(&ordered, &splits, grouper_for_plan(&ordered).as_ref()).len(),
            4
        );
        assert_eq!(
            build_groups(&unordered, &splits, grouper_for_plan(&unordered).as_ref()).len(),
            1
        );
        assert_eq!(
            build_groups(&salted, &splits, grouper_for_plan(&salted).as_ref()).len(),
            4
        );
    }

    #[test]
    fn test_policy_sees_every_candidate_after_the_first() {
        struct EveryN {
            n: usize,
        }
        impl ScanGrouper for EveryN {
            fn should_start_new_group(
                &self,
                _plan: &ScanPlan,
                scans_in_group: usize,
                candidate_start: Option<&[u8]>,
                _crossed: bool,
            ) -> bool {
                assert!(candidate_start.is_some());
                scans_in_group >= self.n
            }
        }
        let plan = plan(true, false);
        let groups = build_groups(&plan, &splits(), &EveryN { n: 3 });
        // 8 scans in runs of 3.
        let sizes: Vec<usize> = groups.iter().map(|g| g.scans.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2]);
    }
}
