//! Parallel scan execution.
//!
//! Every scan group from the grouping stage gets one worker thread. A
//! worker runs its group's sub-scans strictly serially and streams rows to
//! the merge stage over a bounded channel, so a slow consumer exerts
//! backpressure instead of buffering a table in memory. Workers poll the
//! query's cancel signal between row fetches and between sub-scans; once
//! the signal fires they stop issuing work and exit.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use kestrel_common::cancel::CancelSignal;
use kestrel_common::config::ScanConfig;
use kestrel_common::datum::OwnedRow;
use kestrel_common::error::{KestrelError, KestrelResult, PlanError};
use kestrel_common::types::{KeyedRow, TableId};
use kestrel_planner::{parse_admin_statement, AdminStatement, AggSpec, QueryPlan, ScanPlan};
use kestrel_storage::stats::{StatsRegistry, StatsSummary};
use kestrel_storage::transport::ScanTransport;

use crate::grouper::{build_groups, grouper_for_plan, BoundaryRegroup, ScanGroup};
use crate::merge::{GroupAccumulator, RowCursor, Source};
use crate::split::split_scan_ranges;

// ── Metrics ─────────────────────────────────────────────────────────────

/// What one query execution did, filled in as the cursor runs and final
/// once it finishes.
#[derive(Debug, Clone, Default)]
pub struct ScanMetrics {
    /// Concurrent scan groups spawned, including lazily started union
    /// branches.
    pub groups_spawned: usize,
    /// Sub-scans issued to the transport, summed over workers that
    /// reported completion.
    pub scans_issued: usize,
    /// Rows the caller received after offset/limit.
    pub rows_emitted: usize,
    /// Rows discarded server-side for a pushed-down offset, summed over
    /// workers that reported completion.
    pub rows_discarded_server: usize,
    /// Rows each group delivered to the merge stage, in retirement order.
    pub per_group_rows: Vec<usize>,
    /// Whether the cancel signal fired before every stream was exhausted:
    /// a satisfied limit, an aborting scan failure, or an early drop.
    pub cancelled_early: bool,
}

// ── Worker protocol ─────────────────────────────────────────────────────

/// Counters a worker accumulates and hands over in its completion event.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WorkerReport {
    pub(crate) scans_issued: usize,
    pub(crate) rows_discarded_server: usize,
}

/// One message on a group's channel. `Done` is sent exactly once, after
/// the last row; a receiver that sees the channel hang up without it knows
/// the worker died.
pub(crate) enum GroupEvent {
    Row(KeyedRow),
    Done(WorkerReport),
    Failed(KestrelError),
}

/// What a worker does with the rows of its group.
#[derive(Clone)]
pub(crate) enum WorkerTask {
    /// Forward rows as they arrive.
    Stream,
    /// Fold rows into per-key partials and emit them in key order at the
    /// end of the group.
    PreAggregate {
        group_by: Vec<usize>,
        aggregates: Vec<AggSpec>,
    },
}

// ── Group streams ───────────────────────────────────────────────────────

/// Consumer end of one group's channel.
pub(crate) struct GroupStream {
    rx: Receiver<GroupEvent>,
    done: bool,
    pub(crate) rows_delivered: usize,
    pub(crate) report: Option<WorkerReport>,
}

impl GroupStream {
    fn new(rx: Receiver<GroupEvent>) -> Self {
        Self {
            rx,
            done: false,
            rows_delivered: 0,
            report: None,
        }
    }

    /// Next row, blocking on the worker. `None` after the worker finished.
    pub(crate) fn next(&mut self) -> Option<KestrelResult<KeyedRow>> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(GroupEvent::Row(row)) => {
                self.rows_delivered += 1;
                Some(Ok(row))
            }
            Ok(GroupEvent::Done(report)) => {
                self.done = true;
                self.report = Some(report);
                None
            }
            Ok(GroupEvent::Failed(err)) => {
                self.done = true;
                Some(Err(err))
            }
            Err(_) => {
                // Hangup without a completion event means the worker
                // thread panicked.
                self.done = true;
                Some(Err(KestrelError::internal_bug(
                    "E-SCAN-201",
                    "scan group worker disconnected without completing",
                    "channel closed before GroupEvent::Done",
                )))
            }
        }
    }

    /// Pull a completion report that may still be queued behind
    /// unconsumed rows. Never blocks.
    fn harvest_report(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if let GroupEvent::Done(report) = event {
                self.report = Some(report);
            }
        }
    }
}

/// The streams and join handles of one spawned wave of groups.
pub(crate) struct GroupSet {
    pub(crate) streams: Vec<GroupStream>,
    handles: Vec<JoinHandle<()>>,
}

impl GroupSet {
    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    /// Fold worker reports and per-group delivery counts into `metrics`,
    /// then release the workers. Receivers are dropped before the join so
    /// a worker blocked on a full channel exits on the send error instead
    /// of deadlocking.
    pub(crate) fn shutdown(mut self, metrics: &mut ScanMetrics) {
        for stream in &mut self.streams {
            stream.harvest_report();
            metrics.per_group_rows.push(stream.rows_delivered);
            if let Some(report) = stream.report.take() {
                metrics.scans_issued += report.scans_issued;
                metrics.rows_discarded_server += report.rows_discarded_server;
            }
        }
        self.streams.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("scan group worker panicked during shutdown");
            }
        }
    }
}

// ── Executor ────────────────────────────────────────────────────────────

/// Entry point for running compiled plans: splits ranges on statistics,
/// groups sub-scans, fans groups out to workers, and hands the caller a
/// lazy [`RowCursor`] over the merged result.
#[derive(Clone)]
pub struct ScanExecutor {
    transport: Arc<dyn ScanTransport>,
    stats: Arc<StatsRegistry>,
    config: ScanConfig,
}

impl ScanExecutor {
    pub fn new(
        transport: Arc<dyn ScanTransport>,
        stats: Arc<StatsRegistry>,
        config: ScanConfig,
    ) -> Self {
        Self {
            transport,
            stats,
            config,
        }
    }

    /// Run a plan to a cursor with a fresh cancel signal.
    pub fn execute(&self, plan: &QueryPlan) -> KestrelResult<RowCursor> {
        self.execute_with_cancel(plan, CancelSignal::new())
    }

    /// Run a plan to a cursor wired to `cancel`. The cursor fires the
    /// signal itself once its limit is satisfied or it is dropped early;
    /// the caller may also fire it from outside at any time.
    pub fn execute_with_cancel(
        &self,
        plan: &QueryPlan,
        cancel: CancelSignal,
    ) -> KestrelResult<RowCursor> {
        if plan.window().is_empty_window() {
            debug!("plan has LIMIT 0, returning empty cursor without scanning");
            return Ok(RowCursor::empty(cancel));
        }
        match plan {
            QueryPlan::Scan { plan: scan, window } => {
                let groups = self.plan_groups(scan, false)?;
                if groups.len() == 1 {
                    // Single group: the offset is pushed into the scan
                    // requests and nothing is skipped client-side.
                    let server_offset = (window.offset > 0).then_some(window.offset);
                    let set = self.spawn_groups(
                        scan.table,
                        groups,
                        server_offset,
                        WorkerTask::Stream,
                        &cancel,
                    );
                    Ok(RowCursor::new(Source::concat(set), 0, window.limit, cancel))
                } else if scan.key_ordered {
                    let set =
                        self.spawn_groups(scan.table, groups, None, WorkerTask::Stream, &cancel);
                    Ok(RowCursor::new(
                        Source::merge(set),
                        window.offset,
                        window.limit,
                        cancel,
                    ))
                } else {
                    let set =
                        self.spawn_groups(scan.table, groups, None, WorkerTask::Stream, &cancel);
                    Ok(RowCursor::new(
                        Source::concat(set),
                        window.offset,
                        window.limit,
                        cancel,
                    ))
                }
            }
            QueryPlan::UnionAll { branches, window } => {
                // Surface planning errors now; branches are then planned
                // again when the chain reaches them.
                for branch in branches {
                    self.plan_groups(branch, false)?;
                }
                Ok(RowCursor::new(
                    Source::chain(self.clone(), branches.clone(), cancel.clone()),
                    window.offset,
                    window.limit,
                    cancel,
                ))
            }
            QueryPlan::GroupedAggregate {
                plan: scan,
                group_by,
                aggregates,
                window,
            } => {
                // Boundary grouping regardless of plan shape, so each
                // partition run pre-aggregates in parallel.
                let groups = self.plan_groups(scan, true)?;
                let set = self.spawn_groups(
                    scan.table,
                    groups,
                    None,
                    WorkerTask::PreAggregate {
                        group_by: group_by.clone(),
                        aggregates: aggregates.clone(),
                    },
                    &cancel,
                );
                Ok(RowCursor::new(
                    Source::agg_merge(set, group_by.len(), aggregates.clone()),
                    window.offset,
                    window.limit,
                    cancel,
                ))
            }
        }
    }

    /// Render the plan as EXPLAIN output rows. Splits and groups exactly
    /// as execution would, but never issues a scan.
    pub fn explain(&self, plan: &QueryPlan) -> KestrelResult<Vec<OwnedRow>> {
        crate::explain::render_plan(self, plan)
    }

    /// Parse and apply an `UPDATE STATISTICS` statement.
    pub fn update_statistics(&self, sql: &str) -> KestrelResult<StatsSummary> {
        match parse_admin_statement(sql)? {
            AdminStatement::UpdateStatistics {
                table,
                guidepost_width,
            } => self
                .stats
                .update_statistics(self.transport.as_ref(), &table, guidepost_width),
        }
    }

    /// Split one scan on current statistics and fold the sub-scans into
    /// groups, enforcing the concurrency ceiling.
    pub(crate) fn plan_groups(
        &self,
        scan: &ScanPlan,
        force_boundary_grouping: bool,
    ) -> KestrelResult<Vec<ScanGroup>> {
        let stats = self.stats.guideposts(&scan.table_name);
        let splits = split_scan_ranges(&scan.range, &scan.partition_bounds, stats.as_ref());
        let groups = if force_boundary_grouping {
            build_groups(scan, &splits, &BoundaryRegroup)
        } else {
            build_groups(scan, &splits, grouper_for_plan(scan).as_ref())
        };
        if groups.len() > self.config.max_scan_groups {
            return Err(PlanError::TooManyGroups {
                groups: groups.len(),
                max: self.config.max_scan_groups,
            }
            .into());
        }
        Ok(groups)
    }

    /// Plan and spawn one union branch. No server offset: the union's
    /// window counts rows across branches, client-side.
    pub(crate) fn branch_source(
        &self,
        scan: &ScanPlan,
        cancel: &CancelSignal,
    ) -> KestrelResult<Source> {
        let groups = self.plan_groups(scan, false)?;
        let merge_sorted = groups.len() > 1 && scan.key_ordered;
        let set = self.spawn_groups(scan.table, groups, None, WorkerTask::Stream, cancel);
        Ok(if merge_sorted {
            Source::merge(set)
        } else {
            Source::concat(set)
        })
    }

    fn spawn_groups(
        &self,
        table: TableId,
        groups: Vec<ScanGroup>,
        server_offset: Option<usize>,
        task: WorkerTask,
        cancel: &CancelSignal,
    ) -> GroupSet {
        debug!("spawning {} scan groups over {}", groups.len(), table);
        let mut streams = Vec::with_capacity(groups.len());
        let mut handles = Vec::with_capacity(groups.len());
        for group in groups {
            let (tx, rx) = sync_channel(self.config.stream_buffer_rows);
            let transport = Arc::clone(&self.transport);
            let cancel = cancel.clone();
            let task = task.clone();
            let handle = std::thread::spawn(move || {
                run_group_worker(transport, table, group, server_offset, task, cancel, tx);
            });
            streams.push(GroupStream::new(rx));
            handles.push(handle);
        }
        GroupSet { streams, handles }
    }
}

// ── Workers ─────────────────────────────────────────────────────────────

fn run_group_worker(
    transport: Arc<dyn ScanTransport>,
    table: TableId,
    group: ScanGroup,
    server_offset: Option<usize>,
    task: WorkerTask,
    cancel: CancelSignal,
    tx: SyncSender<GroupEvent>,
) {
    let mut report = WorkerReport::default();
    let completed = match task {
        WorkerTask::Stream => stream_group(
            transport.as_ref(),
            table,
            &group,
            server_offset,
            &cancel,
            &tx,
            &mut report,
        ),
        WorkerTask::PreAggregate {
            group_by,
            aggregates,
        } => aggregate_group(
            transport.as_ref(),
            table,
            &group,
            GroupAccumulator::new(group_by, aggregates),
            &cancel,
            &tx,
            &mut report,
        ),
    };
    if !completed {
        debug!("scan group over {} stopped early", table);
    }
    // Sent even after a failure so counters survive; the receiver ignores
    // anything after Failed on the hot path and harvests it at shutdown.
    let _ = tx.send(GroupEvent::Done(report));
}

/// Run the group's sub-scans serially, forwarding rows. Returns whether
/// the group ran to natural completion.
fn stream_group(
    transport: &dyn ScanTransport,
    table: TableId,
    group: &ScanGroup,
    mut server_offset: Option<usize>,
    cancel: &CancelSignal,
    tx: &SyncSender<GroupEvent>,
    report: &mut WorkerReport,
) -> bool {
    for range in &group.scans {
        if cancel.is_cancelled() {
            return false;
        }
        let mut stream = match transport.scan(table, range, server_offset) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("scan over {} range {} failed at issue: {}", table, range, err);
                let _ = tx.send(GroupEvent::Failed(err));
                return false;
            }
        };
        report.scans_issued += 1;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match stream.next_row() {
                Ok(Some(row)) => {
                    if tx.send(GroupEvent::Row(row)).is_err() {
                        // Consumer dropped the stream.
                        return false;
                    }
                }
                Ok(None) => {
                    let discarded = stream.rows_discarded();
                    report.rows_discarded_server += discarded;
                    // An offset remainder the scan did not consume carries
                    // into the next serial sub-scan.
                    server_offset = server_offset.map(|n| n.saturating_sub(discarded));
                    break;
                }
                Err(err) => {
                    warn!("scan over {} range {} failed mid-stream: {}", table, range, err);
                    let _ = tx.send(GroupEvent::Failed(err));
                    return false;
                }
            }
        }
    }
    true
}

/// Run the group's sub-scans serially, folding rows into per-key partials,
/// then emit the partials in key order.
fn aggregate_group(
    transport: &dyn ScanTransport,
    table: TableId,
    group: &ScanGroup,
    mut acc: GroupAccumulator,
    cancel: &CancelSignal,
    tx: &SyncSender<GroupEvent>,
    report: &mut WorkerReport,
) -> bool {
    for range in &group.scans {
        if cancel.is_cancelled() {
            return false;
        }
        let mut stream = match transport.scan(table, range, None) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("scan over {} range {} failed at issue: {}", table, range, err);
                let _ = tx.send(GroupEvent::Failed(err));
                return false;
            }
        };
        report.scans_issued += 1;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match stream.next_row() {
                Ok(Some(row)) => {
                    if let Err(err) = acc.observe(&row.row) {
                        let _ = tx.send(GroupEvent::Failed(err));
                        return false;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("scan over {} range {} failed mid-stream: {}", table, range, err);
                    let _ = tx.send(GroupEvent::Failed(err));
                    return false;
                }
            }
        }
    }
    for partial in acc.into_partial_rows() {
        if cancel.is_cancelled() {
            return false;
        }
        if tx.send(GroupEvent::Row(partial)).is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::datum::Datum;
    use kestrel_common::types::{ScanRange, TableLayout};
    use kestrel_storage::memstore::MemStore;

    #[test]
    fn test_group_stream_reports_worker_panic_as_internal_bug() {
        let (tx, rx) = sync_channel::<GroupEvent>(4);
        drop(tx);
        let mut stream = GroupStream::new(rx);
        let err = stream.next().unwrap().unwrap_err();
        assert!(err.is_internal_bug());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_worker_streams_rows_then_reports() {
        let store = MemStore::new();
        let table = store
            .create_table("t", TableLayout::default(), Vec::new())
            .unwrap();
        for key in [b"a", b"b", b"c"] {
            store
                .put(table, key.to_vec(), OwnedRow::new(vec![Datum::Int64(1)]))
                .unwrap();
        }
        let transport: Arc<dyn ScanTransport> = Arc::new(store);
        let (tx, rx) = sync_channel(16);
        let group = ScanGroup {
            scans: vec![ScanRange::full()],
        };
        run_group_worker(
            transport,
            table,
            group,
            Some(1),
            WorkerTask::Stream,
            CancelSignal::new(),
            tx,
        );
        let mut stream = GroupStream::new(rx);
        let mut keys = Vec::new();
        while let Some(row) = stream.next() {
            keys.push(row.unwrap().key);
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
        let report = stream.report.unwrap();
        assert_eq!(report.scans_issued, 1);
        assert_eq!(report.rows_discarded_server, 1);
    }

    #[test]
    fn test_cancelled_worker_stops_between_fetches() {
        let store = MemStore::new();
        let table = store
            .create_table("t", TableLayout::default(), Vec::new())
            .unwrap();
        for i in 0..100u8 {
            store
                .put(table, vec![i], OwnedRow::new(vec![Datum::Int64(i as i64)]))
                .unwrap();
        }
        let transport: Arc<dyn ScanTransport> = Arc::new(store);
        let cancel = CancelSignal::new();
        cancel.cancel();
        let (tx, rx) = sync_channel(16);
        run_group_worker(
            transport,
            table,
            ScanGroup {
                scans: vec![ScanRange::full()],
            },
            None,
            WorkerTask::Stream,
            cancel,
            tx,
        );
        // Already-cancelled worker issues nothing and still completes.
        let mut stream = GroupStream::new(rx);
        assert!(stream.next().is_none());
        assert_eq!(stream.report.unwrap().scans_issued, 0);
    }
}
