//! The merge stage: turns a wave of group streams into the single row
//! sequence the caller iterates, applying offset and limit client-side
//! where they were not pushed into the scans.
//!
//! Four source shapes cover every plan. Concatenation drains groups in
//! spawn order; ordered merge runs a k-way heap merge keyed on row key
//! with group index as tie-break; aggregate merge is the same heap merge
//! plus combining of equal-key partials; a chain runs union branches one
//! after another, spawning each branch only when reached.

use std::cmp::{Ordering, Reverse};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BinaryHeap};

use tracing::{debug, warn};

use kestrel_common::cancel::CancelSignal;
use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::{KestrelError, KestrelResult};
use kestrel_common::types::KeyedRow;
use kestrel_planner::{AggKind, AggSpec, ScanPlan};

use crate::parallel::{GroupSet, ScanExecutor, ScanMetrics};

// ── Group-key encoding ──────────────────────────────────────────────────

/// Byte-encode the grouping columns of a row so that byte order equals
/// [`Datum::cmp_total`] order column by column. Aggregate partials then
/// merge with the same heap machinery as row keys.
pub fn encode_group_key(row: &OwnedRow, group_by: &[usize]) -> KestrelResult<Vec<u8>> {
    let mut key = Vec::with_capacity(group_by.len() * 9);
    for &idx in group_by {
        let Some(datum) = row.get(idx) else {
            return Err(KestrelError::internal_bug(
                "E-AGG-101",
                format!(
                    "grouping column {} out of bounds for row of width {}",
                    idx,
                    row.len()
                ),
                format!("row={}", row),
            ));
        };
        encode_datum(datum, &mut key);
    }
    Ok(key)
}

fn encode_datum(datum: &Datum, out: &mut Vec<u8>) {
    match datum {
        Datum::Null => out.push(0x00),
        Datum::Boolean(b) => {
            out.push(0x01);
            out.push(*b as u8);
        }
        Datum::Int64(v) => {
            out.push(0x02);
            // Sign bit flipped so signed order matches byte order.
            out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
        }
        Datum::Float64(v) => {
            out.push(0x03);
            let bits = v.to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        Datum::Text(s) => {
            out.push(0x04);
            for &b in s.as_bytes() {
                out.push(b);
                if b == 0x00 {
                    // Embedded NULs are escaped to 0x00 0xFF so no payload
                    // can collide with the terminator.
                    out.push(0xFF);
                }
            }
            // Terminator: a prefix sorts before its extensions even when
            // more columns follow.
            out.extend_from_slice(&[0x00, 0x00]);
        }
    }
}

// ── Aggregate partials ──────────────────────────────────────────────────

/// Running state of one aggregate column inside one worker.
#[derive(Debug, Clone)]
enum AggAcc {
    Count(i64),
    Sum(Datum),
    Min(Datum),
    Max(Datum),
}

impl AggAcc {
    fn new(kind: AggKind) -> Self {
        match kind {
            AggKind::Count => AggAcc::Count(0),
            AggKind::Sum => AggAcc::Sum(Datum::Null),
            AggKind::Min => AggAcc::Min(Datum::Null),
            AggKind::Max => AggAcc::Max(Datum::Null),
        }
    }

    fn update(&mut self, input: &Datum) -> KestrelResult<()> {
        match self {
            AggAcc::Count(n) => *n += 1,
            AggAcc::Sum(total) => fold_sum(total, input)?,
            AggAcc::Min(best) => {
                if !input.is_null()
                    && (best.is_null() || input.cmp_total(best) == Ordering::Less)
                {
                    *best = input.clone();
                }
            }
            AggAcc::Max(best) => {
                if !input.is_null()
                    && (best.is_null() || input.cmp_total(best) == Ordering::Greater)
                {
                    *best = input.clone();
                }
            }
        }
        Ok(())
    }

    fn into_datum(self) -> Datum {
        match self {
            AggAcc::Count(n) => Datum::Int64(n),
            AggAcc::Sum(d) | AggAcc::Min(d) | AggAcc::Max(d) => d,
        }
    }
}

/// SQL SUM: NULL inputs are skipped, an all-NULL group sums to NULL.
fn fold_sum(total: &mut Datum, input: &Datum) -> KestrelResult<()> {
    if input.is_null() {
        return Ok(());
    }
    if total.is_null() {
        *total = input.clone();
        return Ok(());
    }
    match total.add(input) {
        Some(sum) => {
            *total = sum;
            Ok(())
        }
        None => Err(KestrelError::internal_bug(
            "E-AGG-102",
            "SUM over a non-numeric datum",
            format!("accumulated={:?} input={:?}", total, input),
        )),
    }
}

/// Combine two finished partials of the same aggregate column.
fn merge_partial(kind: AggKind, left: Datum, right: Datum) -> KestrelResult<Datum> {
    match kind {
        AggKind::Count | AggKind::Sum => {
            if right.is_null() {
                return Ok(left);
            }
            if left.is_null() {
                return Ok(right);
            }
            left.add(&right).ok_or_else(|| {
                KestrelError::internal_bug(
                    "E-AGG-104",
                    "aggregate partials failed to combine",
                    format!("left={:?} right={:?}", left, right),
                )
            })
        }
        AggKind::Min => Ok(fold_extreme(left, right, Ordering::Less)),
        AggKind::Max => Ok(fold_extreme(left, right, Ordering::Greater)),
    }
}

/// Keep `right` only when it compares to `left` as `keep_right_when`;
/// NULL partials lose to anything.
fn fold_extreme(left: Datum, right: Datum, keep_right_when: Ordering) -> Datum {
    if right.is_null() {
        return left;
    }
    if left.is_null() {
        return right;
    }
    if right.cmp_total(&left) == keep_right_when {
        right
    } else {
        left
    }
}

/// Per-worker pre-aggregation: folds raw rows into one partial row per
/// distinct grouping key. Partial rows carry the grouping datums followed
/// by one partial datum per aggregate, keyed on the encoded grouping key,
/// and come out in ascending key order.
pub struct GroupAccumulator {
    group_by: Vec<usize>,
    aggregates: Vec<AggSpec>,
    groups: BTreeMap<Vec<u8>, PartialGroup>,
}

struct PartialGroup {
    key_values: Vec<Datum>,
    accs: Vec<AggAcc>,
}

impl GroupAccumulator {
    pub fn new(group_by: Vec<usize>, aggregates: Vec<AggSpec>) -> Self {
        Self {
            group_by,
            aggregates,
            groups: BTreeMap::new(),
        }
    }

    pub fn observe(&mut self, row: &OwnedRow) -> KestrelResult<()> {
        let key = encode_group_key(row, &self.group_by)?;
        let partial = match self.groups.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                // encode_group_key already bounds-checked the indices.
                let key_values = self
                    .group_by
                    .iter()
                    .map(|&idx| row.values[idx].clone())
                    .collect();
                entry.insert(PartialGroup {
                    key_values,
                    accs: self.aggregates.iter().map(|s| AggAcc::new(s.kind)).collect(),
                })
            }
        };
        for (acc, spec) in partial.accs.iter_mut().zip(&self.aggregates) {
            match spec.kind {
                AggKind::Count => acc.update(&Datum::Null)?,
                _ => {
                    let Some(input) = row.get(spec.input) else {
                        return Err(KestrelError::internal_bug(
                            "E-AGG-103",
                            format!("aggregate input column {} out of bounds", spec.input),
                            format!("row={}", row),
                        ));
                    };
                    acc.update(input)?;
                }
            }
        }
        Ok(())
    }

    pub fn into_partial_rows(self) -> Vec<KeyedRow> {
        self.groups
            .into_iter()
            .map(|(key, partial)| {
                let mut values = partial.key_values;
                values.extend(partial.accs.into_iter().map(AggAcc::into_datum));
                KeyedRow::new(key, OwnedRow::new(values))
            })
            .collect()
    }
}

/// Fold `other`'s aggregate partials into `base`. Both rows were built by
/// [`GroupAccumulator`] for the same grouping key, so their widths match.
fn combine_partial_rows(
    base: &mut KeyedRow,
    other: KeyedRow,
    group_by_len: usize,
    aggregates: &[AggSpec],
) -> KestrelResult<()> {
    let mut other_values = other.row.values;
    for (i, spec) in aggregates.iter().enumerate() {
        let idx = group_by_len + i;
        let left = std::mem::replace(&mut base.row.values[idx], Datum::Null);
        let right = std::mem::replace(&mut other_values[idx], Datum::Null);
        base.row.values[idx] = merge_partial(spec.kind, left, right)?;
    }
    Ok(())
}

// ── Ordered k-way merge ─────────────────────────────────────────────────

/// One buffered head row in the merge heap. Equal keys break by group
/// index, then by pull sequence, so merge output is deterministic and
/// stable with respect to group spawn order.
struct MergeEntry {
    row: KeyedRow,
    group_idx: usize,
    seq: u64,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .key
            .cmp(&other.row.key)
            .then(self.group_idx.cmp(&other.group_idx))
            .then(self.seq.cmp(&other.seq))
    }
}

struct MergeState {
    set: GroupSet,
    /// Min-heap of per-group head rows; `None` until the first pull so
    /// that building a cursor never blocks on workers.
    heap: Option<BinaryHeap<Reverse<MergeEntry>>>,
    next_seq: u64,
}

impl MergeState {
    fn new(set: GroupSet) -> Self {
        Self {
            set,
            heap: None,
            next_seq: 0,
        }
    }

    fn fill_heap(&mut self) -> KestrelResult<()> {
        let mut heap = BinaryHeap::with_capacity(self.set.streams.len());
        for idx in 0..self.set.streams.len() {
            match self.set.streams[idx].next() {
                Some(Ok(row)) => {
                    self.next_seq += 1;
                    heap.push(Reverse(MergeEntry {
                        row,
                        group_idx: idx,
                        seq: self.next_seq,
                    }));
                }
                Some(Err(err)) => {
                    self.heap = Some(heap);
                    return Err(err);
                }
                None => {}
            }
        }
        self.heap = Some(heap);
        Ok(())
    }

    fn next_merged(&mut self) -> Option<KestrelResult<KeyedRow>> {
        if self.heap.is_none() {
            if let Err(err) = self.fill_heap() {
                return Some(Err(err));
            }
        }
        let Reverse(entry) = self.heap.as_mut()?.pop()?;
        // Refill from the group that just yielded.
        match self.set.streams[entry.group_idx].next() {
            Some(Ok(row)) => {
                self.next_seq += 1;
                if let Some(heap) = self.heap.as_mut() {
                    heap.push(Reverse(MergeEntry {
                        row,
                        group_idx: entry.group_idx,
                        seq: self.next_seq,
                    }));
                }
            }
            Some(Err(err)) => return Some(Err(err)),
            None => {}
        }
        Some(Ok(entry.row))
    }

    /// Key of the smallest buffered row, if any.
    fn peek_key(&self) -> Option<&[u8]> {
        self.heap
            .as_ref()?
            .peek()
            .map(|Reverse(entry)| entry.row.key.as_slice())
    }
}

// ── Sources ─────────────────────────────────────────────────────────────

struct ConcatState {
    set: GroupSet,
    current: usize,
}

struct AggMergeState {
    merge: MergeState,
    group_by_len: usize,
    aggregates: Vec<AggSpec>,
}

impl AggMergeState {
    /// Pop the smallest partial, then fold in every other stream's partial
    /// with the same key. Per-stream keys are strictly ascending, so all
    /// equal keys sit at the heap top together.
    fn next_combined(&mut self) -> Option<KestrelResult<KeyedRow>> {
        let mut combined = match self.merge.next_merged()? {
            Ok(row) => row,
            Err(err) => return Some(Err(err)),
        };
        loop {
            let same_key = self
                .merge
                .peek_key()
                .map_or(false, |key| key == combined.key.as_slice());
            if !same_key {
                break;
            }
            match self.merge.next_merged() {
                Some(Ok(other)) => {
                    if let Err(err) = combine_partial_rows(
                        &mut combined,
                        other,
                        self.group_by_len,
                        &self.aggregates,
                    ) {
                        return Some(Err(err));
                    }
                }
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        Some(Ok(combined))
    }
}

struct ChainState {
    executor: ScanExecutor,
    branches: std::vec::IntoIter<ScanPlan>,
    cancel: CancelSignal,
    current: Option<Box<Source>>,
}

impl ChainState {
    fn next_row(&mut self, metrics: &mut ScanMetrics) -> Option<KestrelResult<KeyedRow>> {
        loop {
            if self.current.is_none() {
                let branch = self.branches.next()?;
                match self.executor.branch_source(&branch, &self.cancel) {
                    Ok(source) => {
                        metrics.groups_spawned += source.group_count();
                        self.current = Some(Box::new(source));
                    }
                    Err(err) => return Some(Err(err)),
                }
            }
            if let Some(source) = self.current.as_mut() {
                match source.next(metrics) {
                    Some(item) => return Some(item),
                    None => {
                        // Branch exhausted; retire its workers before the
                        // next branch spawns.
                        if let Some(finished) = self.current.take() {
                            finished.shutdown(metrics);
                        }
                    }
                }
            }
        }
    }
}

/// Where the cursor's rows come from.
pub(crate) enum Source {
    /// Groups drained one after another, in spawn order.
    Concat(ConcatState),
    /// K-way merge by row key across ordered group streams.
    Merge(MergeState),
    /// K-way merge of aggregate partials, combining equal keys.
    AggMerge(AggMergeState),
    /// Union branches executed lazily, one after another.
    Chain(ChainState),
}

impl Source {
    pub(crate) fn concat(set: GroupSet) -> Self {
        Source::Concat(ConcatState { set, current: 0 })
    }

    pub(crate) fn merge(set: GroupSet) -> Self {
        Source::Merge(MergeState::new(set))
    }

    pub(crate) fn agg_merge(set: GroupSet, group_by_len: usize, aggregates: Vec<AggSpec>) -> Self {
        Source::AggMerge(AggMergeState {
            merge: MergeState::new(set),
            group_by_len,
            aggregates,
        })
    }

    pub(crate) fn chain(
        executor: ScanExecutor,
        branches: Vec<ScanPlan>,
        cancel: CancelSignal,
    ) -> Self {
        Source::Chain(ChainState {
            executor,
            branches: branches.into_iter(),
            cancel,
            current: None,
        })
    }

    /// Groups spawned so far by this source.
    pub(crate) fn group_count(&self) -> usize {
        match self {
            Source::Concat(state) => state.set.len(),
            Source::Merge(state) => state.set.len(),
            Source::AggMerge(state) => state.merge.set.len(),
            Source::Chain(_) => 0,
        }
    }

    fn next(&mut self, metrics: &mut ScanMetrics) -> Option<KestrelResult<KeyedRow>> {
        match self {
            Source::Concat(state) => {
                while state.current < state.set.streams.len() {
                    match state.set.streams[state.current].next() {
                        Some(item) => return Some(item),
                        None => state.current += 1,
                    }
                }
                None
            }
            Source::Merge(state) => state.next_merged(),
            Source::AggMerge(state) => state.next_combined(),
            Source::Chain(state) => state.next_row(metrics),
        }
    }

    fn shutdown(self, metrics: &mut ScanMetrics) {
        match self {
            Source::Concat(state) => state.set.shutdown(metrics),
            Source::Merge(state) => state.set.shutdown(metrics),
            Source::AggMerge(state) => state.merge.set.shutdown(metrics),
            Source::Chain(state) => {
                // Unreached branches never spawned anything.
                if let Some(current) = state.current {
                    current.shutdown(metrics);
                }
            }
        }
    }
}

// ── Cursor ──────────────────────────────────────────────────────────────

/// Lazy cursor over a running query. Rows come out as the caller pulls;
/// once the limit is satisfied, the cursor fires the cancel signal and
/// releases the workers rather than letting them scan on. Dropping the
/// cursor before exhaustion does the same.
///
/// After the first `Err` the cursor is finished; further calls yield
/// `None`.
pub struct RowCursor {
    source: Option<Source>,
    to_skip: usize,
    remaining: Option<usize>,
    cancel: CancelSignal,
    metrics: ScanMetrics,
    finished: bool,
}

impl RowCursor {
    pub(crate) fn new(
        source: Source,
        to_skip: usize,
        limit: Option<usize>,
        cancel: CancelSignal,
    ) -> Self {
        let metrics = ScanMetrics {
            groups_spawned: source.group_count(),
            ..ScanMetrics::default()
        };
        Self {
            source: Some(source),
            to_skip,
            remaining: limit,
            cancel,
            metrics,
            finished: false,
        }
    }

    /// Cursor over nothing; no workers exist to release.
    pub(crate) fn empty(cancel: CancelSignal) -> Self {
        Self {
            source: None,
            to_skip: 0,
            remaining: Some(0),
            cancel,
            metrics: ScanMetrics::default(),
            finished: true,
        }
    }

    /// Metrics so far; final once the cursor has finished.
    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Drain the remaining rows, returning them with the final metrics.
    pub fn collect_all(mut self) -> KestrelResult<(Vec<KeyedRow>, ScanMetrics)> {
        let mut rows = Vec::new();
        for item in self.by_ref() {
            rows.push(item?);
        }
        Ok((rows, self.metrics.clone()))
    }

    fn finish(&mut self, natural: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(source) = self.source.take() {
            self.metrics.cancelled_early = !natural || self.cancel.is_cancelled();
            if !natural {
                self.cancel.cancel();
            }
            source.shutdown(&mut self.metrics);
            debug!(
                "query finished: {} rows emitted over {} groups",
                self.metrics.rows_emitted, self.metrics.groups_spawned
            );
        }
    }
}

impl Iterator for RowCursor {
    type Item = KestrelResult<KeyedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let Some(source) = self.source.as_mut() else {
                self.finished = true;
                return None;
            };
            match source.next(&mut self.metrics) {
                Some(Ok(row)) => {
                    if self.to_skip > 0 {
                        self.to_skip -= 1;
                        continue;
                    }
                    self.metrics.rows_emitted += 1;
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                        if *remaining == 0 {
                            // Limit satisfied: stop the workers now, not
                            // at the next poll.
                            self.finish(false);
                        }
                    }
                    return Some(Ok(row));
                }
                Some(Err(err)) => {
                    warn!("query aborted: {}", err);
                    self.finish(false);
                    return Some(Err(err));
                }
                None => {
                    self.finish(true);
                    return None;
                }
            }
        }
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        self.finish(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Datum>) -> OwnedRow {
        OwnedRow::new(values)
    }

    #[test]
    fn test_encoded_group_keys_order_like_datums() {
        let pairs = [
            (Datum::Null, Datum::Boolean(false)),
            (Datum::Boolean(false), Datum::Boolean(true)),
            (Datum::Int64(-5), Datum::Int64(3)),
            (Datum::Int64(i64::MIN), Datum::Int64(i64::MAX)),
            (Datum::Float64(-1.5), Datum::Float64(0.0)),
            (Datum::Float64(0.25), Datum::Float64(7.5)),
            (Datum::Text("ab".into()), Datum::Text("abc".into())),
        ];
        for (lo, hi) in pairs {
            let lo_key = encode_group_key(&row(vec![lo.clone()]), &[0]).unwrap();
            let hi_key = encode_group_key(&row(vec![hi.clone()]), &[0]).unwrap();
            assert!(lo_key < hi_key, "{:?} should encode below {:?}", lo, hi);
        }
    }

    #[test]
    fn test_prefix_text_orders_before_extension_with_more_columns() {
        // ("ab", 9) sorts before ("abc", 0) just as the datums do.
        let short = encode_group_key(
            &row(vec![Datum::Text("ab".into()), Datum::Int64(9)]),
            &[0, 1],
        )
        .unwrap();
        let long = encode_group_key(
            &row(vec![Datum::Text("abc".into()), Datum::Int64(0)]),
            &[0, 1],
        )
        .unwrap();
        assert!(short < long);
    }

    #[test]
    fn test_embedded_nul_text_keys_stay_distinct() {
        // Without escaping, both of these column pairs flatten to the same
        // bytes and two distinct GROUP BY groups would merge.
        let k1 = encode_group_key(
            &row(vec![Datum::Text("a\0\x04b".into()), Datum::Text("c".into())]),
            &[0, 1],
        )
        .unwrap();
        let k2 = encode_group_key(
            &row(vec![Datum::Text("a".into()), Datum::Text("b\0\x04c".into())]),
            &[0, 1],
        )
        .unwrap();
        assert_ne!(k1, k2);
        // Escaping keeps the order: "a" is a prefix of "a\0" and encodes
        // below it.
        let lo = encode_group_key(&row(vec![Datum::Text("a".into())]), &[0]).unwrap();
        let hi = encode_group_key(&row(vec![Datum::Text("a\0".into())]), &[0]).unwrap();
        assert!(lo < hi);
    }

    #[test]
    fn test_accumulator_folds_and_emits_in_key_order() {
        let mut acc = GroupAccumulator::new(
            vec![0],
            vec![AggSpec::count(), AggSpec::sum(1), AggSpec::min(1), AggSpec::max(1)],
        );
        for (g, v) in [("b", 4), ("a", 1), ("b", 6), ("a", 3)] {
            acc.observe(&row(vec![Datum::Text(g.into()), Datum::Int64(v)]))
                .unwrap();
        }
        let partials = acc.into_partial_rows();
        assert_eq!(partials.len(), 2);
        assert_eq!(
            partials[0].row.values,
            vec![
                Datum::Text("a".into()),
                Datum::Int64(2),
                Datum::Int64(4),
                Datum::Int64(1),
                Datum::Int64(3),
            ]
        );
        assert_eq!(
            partials[1].row.values,
            vec![
                Datum::Text("b".into()),
                Datum::Int64(2),
                Datum::Int64(10),
                Datum::Int64(4),
                Datum::Int64(6),
            ]
        );
    }

    #[test]
    fn test_sum_skips_nulls_and_all_null_group_sums_to_null() {
        let mut acc = GroupAccumulator::new(vec![0], vec![AggSpec::sum(1)]);
        acc.observe(&row(vec![Datum::Int64(1), Datum::Null])).unwrap();
        acc.observe(&row(vec![Datum::Int64(1), Datum::Null])).unwrap();
        acc.observe(&row(vec![Datum::Int64(2), Datum::Int64(5)])).unwrap();
        acc.observe(&row(vec![Datum::Int64(2), Datum::Null])).unwrap();
        let partials = acc.into_partial_rows();
        // SQL NULL never compares equal, so check the variant directly.
        assert!(partials[0].row.values[1].is_null());
        assert_eq!(partials[1].row.values[1], Datum::Int64(5));
    }

    #[test]
    fn test_combine_partial_rows_across_workers() {
        let aggregates = vec![AggSpec::count(), AggSpec::sum(1), AggSpec::min(1)];
        let mut left = GroupAccumulator::new(vec![0], aggregates.clone());
        left.observe(&row(vec![Datum::Text("g".into()), Datum::Int64(8)]))
            .unwrap();
        let mut right = GroupAccumulator::new(vec![0], aggregates.clone());
        right
            .observe(&row(vec![Datum::Text("g".into()), Datum::Int64(3)]))
            .unwrap();
        right
            .observe(&row(vec![Datum::Text("g".into()), Datum::Int64(5)]))
            .unwrap();

        let mut base = left.into_partial_rows().remove(0);
        let other = right.into_partial_rows().remove(0);
        combine_partial_rows(&mut base, other, 1, &aggregates).unwrap();
        assert_eq!(
            base.row.values,
            vec![
                Datum::Text("g".into()),
                Datum::Int64(3),
                Datum::Int64(16),
                Datum::Int64(3),
            ]
        );
    }

    #[test]
    fn test_sum_overflow_surfaces_internal_bug() {
        let mut acc = GroupAccumulator::new(vec![0], vec![AggSpec::sum(1)]);
        acc.observe(&row(vec![Datum::Int64(1), Datum::Int64(i64::MAX)]))
            .unwrap();
        let err = acc
            .observe(&row(vec![Datum::Int64(1), Datum::Int64(1)]))
            .unwrap_err();
        assert!(err.is_internal_bug());
    }

    #[test]
    fn test_partial_sum_overflow_fails_combine() {
        let aggregates = vec![AggSpec::sum(1)];
        let mut left = GroupAccumulator::new(vec![0], aggregates.clone());
        left.observe(&row(vec![Datum::Text("g".into()), Datum::Int64(i64::MAX)]))
            .unwrap();
        let mut right = GroupAccumulator::new(vec![0], aggregates.clone());
        right
            .observe(&row(vec![Datum::Text("g".into()), Datum::Int64(1)]))
            .unwrap();
        let mut base = left.into_partial_rows().remove(0);
        let other = right.into_partial_rows().remove(0);
        let err = combine_partial_rows(&mut base, other, 1, &aggregates).unwrap_err();
        assert!(err.is_internal_bug());
    }

    #[test]
    fn test_merge_entry_breaks_ties_by_group_then_sequence() {
        let entry = |key: &[u8], group_idx: usize, seq: u64| MergeEntry {
            row: KeyedRow::new(key.to_vec(), row(vec![])),
            group_idx,
            seq,
        };
        assert!(entry(b"a", 1, 9) < entry(b"b", 0, 0));
        assert!(entry(b"a", 0, 9) < entry(b"a", 1, 0));
        assert!(entry(b"a", 0, 1) < entry(b"a", 0, 2));
    }

    #[test]
    fn test_bad_grouping_column_is_internal_bug() {
        let mut acc = GroupAccumulator::new(vec![5], vec![AggSpec::count()]);
        let err = acc.observe(&row(vec![Datum::Int64(1)])).unwrap_err();
        assert!(err.is_internal_bug());
    }
}
