//! Guidepost range splitting: one planned key range into an ordered,
//! gap-free, non-overlapping sequence of sub-scans.

use kestrel_common::types::ScanRange;
use kestrel_storage::region::PartitionMap;
use kestrel_storage::stats::GuidepostIndex;

/// One post-split sub-scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeScan {
    pub range: ScanRange,
    /// Partition the range starts in.
    pub start_partition: usize,
}

/// Splits `range` into an ordered disjoint cover.
///
/// Without usable statistics the range stays whole: one sub-scan, even when
/// it spans several partitions. With statistics the range is cut at every
/// partition boundary and at every guidepost inside it, so no sub-scan
/// spans a partition and each covers roughly one guidepost width of data.
pub fn split_scan_ranges(
    range: &ScanRange,
    partition_bounds: &[Vec<u8>],
    stats: Option<&GuidepostIndex>,
) -> Vec<RangeScan> {
    let partitions = PartitionMap::new(partition_bounds.to_vec());
    let Some(index) = stats.filter(|index| index.is_usable()) else {
        return vec![RangeScan {
            start_partition: partitions.range_start_partition(range),
            range: range.clone(),
        }];
    };

    let mut cuts = partitions.bounds_within(range);
    cuts.extend(
        index
            .guideposts
            .iter()
            .map(|gp| gp.key.clone())
            .filter(|key| key_cuts(range, key)),
    );
    cuts.sort();
    cuts.dedup();

    let mut scans = Vec::with_capacity(cuts.len() + 1);
    let mut lower = range.start.clone();
    for cut in cuts {
        scans.push(sub_scan(range, lower, Some(cut.clone()), &partitions));
        lower = Some(cut);
    }
    scans.push(sub_scan(range, lower, range.end.clone(), &partitions));
    scans
}

/// True when cutting at `key` leaves two non-empty pieces of `range`.
fn key_cuts(range: &ScanRange, key: &[u8]) -> bool {
    let after_start = range.start.as_ref().map_or(true, |s| key > s.as_slice());
    let before_end = range.end.as_ref().map_or(true, |e| key < e.as_slice());
    after_start && before_end
}

fn sub_scan(
    parent: &ScanRange,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    partitions: &PartitionMap,
) -> RangeScan {
    let mut range = ScanRange::new(start, end);
    range.filter = parent.filter.clone();
    RangeScan {
        start_partition: partitions.range_start_partition(&range),
        range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_storage::stats::Guidepost;

    fn bounds(keys: &[&str]) -> Vec<Vec<u8>> {
        keys.iter().map(|k| k.as_bytes().to_vec()).collect()
    }

    fn index(keys: &[&str]) -> GuidepostIndex {
        GuidepostIndex {
            width_bytes: 100,
            guideposts: keys
                .iter()
                .map(|k| Guidepost {
                    key: k.as_bytes().to_vec(),
                    bytes: 100,
                })
                .collect(),
            rows_sampled: 0,
            collected_at_ms: 0,
        }
    }

    fn cover_is_disjoint(range: &ScanRange, scans: &[RangeScan]) {
        assert!(!scans.is_empty());
        assert_eq!(scans[0].range.start, range.start);
        assert_eq!(scans[scans.len() - 1].range.end, range.end);
        for pair in scans.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
            assert!(!pair[1].range.is_degenerate());
        }
    }

    #[test]
    fn test_no_stats_single_unsplit_range() {
        let range = ScanRange::full();
        let scans = split_scan_ranges(&range, &bounds(&["e", "i", "o"]), None);
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].range, range);
        assert_eq!(scans[0].start_partition, 0);
    }

    #[test]
    fn test_unusable_stats_single_unsplit_range() {
        let empty = GuidepostIndex {
            width_bytes: 100,
            ..GuidepostIndex::default()
        };
        let scans = split_scan_ranges(&ScanRange::full(), &bounds(&["m"]), Some(&empty));
        assert_eq!(scans.len(), 1);
    }

    #[test]
    fn test_cuts_at_boundaries_and_guideposts() {
        let range = ScanRange::full();
        let stats = index(&["c", "f", "l"]);
        let scans = split_scan_ranges(&range, &bounds(&["e", "i"]), Some(&stats));
        // Cuts: c, e, f, i, l.
        assert_eq!(scans.len(), 6);
        cover_is_disjoint(&range, &scans);
        let starts: Vec<usize> = scans.iter().map(|s| s.start_partition).collect();
        assert_eq!(starts, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_guidepost_on_partition_boundary_deduped() {
        let range = ScanRange::full();
        let stats = index(&["e"]);
        let scans = split_scan_ranges(&range, &bounds(&["e"]), Some(&stats));
        assert_eq!(scans.len(), 2);
        cover_is_disjoint(&range, &scans);
    }

    #[test]
    fn test_cuts_outside_range_are_clipped() {
        let range = ScanRange::bounded("f", "k");
        let stats = index(&["c", "g", "p"]);
        let scans = split_scan_ranges(&range, &bounds(&["e", "i", "o"]), Some(&stats));
        // Only g and i fall strictly inside [f, k).
        assert_eq!(scans.len(), 3);
        cover_is_disjoint(&range, &scans);
        assert_eq!(scans[0].range, ScanRange::bounded("f", "g"));
        assert_eq!(scans[1].range, ScanRange::bounded("g", "i"));
        assert_eq!(scans[2].range, ScanRange::bounded("i", "k"));
    }

    #[test]
    fn test_filter_carried_into_sub_scans() {
        let range = ScanRange::full().with_filter("col2 > 5");
        let stats = index(&["m"]);
        let scans = split_scan_ranges(&range, &[], Some(&stats));
        assert_eq!(scans.len(), 2);
        for scan in &scans {
            assert_eq!(scan.range.filter.as_deref(), Some("col2 > 5"));
        }
    }
}
