//! Scheduler background loop.
//!
//! Each sweep kind ticks on its own interval. A tick that arrives while the
//! previous sweep of the same kind is still running is skipped, never
//! queued, so a sweep never overlaps itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::ids::now_epoch_secs;
use crate::reconcile::{EngagementCloser, GrantReconciler, Resolution};
use crate::store::SqliteStore;

/// Default interval between sweeps (seconds).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// The independent sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepKind {
    Grants,
    Punishments,
    Engagements,
}

impl SweepKind {
    pub const ALL: [Self; 3] = [Self::Grants, Self::Punishments, Self::Engagements];

    fn index(self) -> usize {
        match self {
            Self::Grants => 0,
            Self::Punishments => 1,
            Self::Engagements => 2,
        }
    }
}

/// Tally of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub applied: usize,
    pub stale: usize,
    pub deferred: usize,
    /// Items whose reconciliation hit a store error; they stay due.
    pub failed: usize,
}

impl SweepReport {
    fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            applied: 0,
            stale: 0,
            deferred: 0,
            failed: 0,
        }
    }

    fn record(&mut self, id: i64, result: Result<Resolution>) {
        match result {
            Ok(Resolution::Applied) => self.applied += 1,
            Ok(Resolution::Stale) => self.stale += 1,
            Ok(Resolution::Deferred(_)) => self.deferred += 1,
            Err(e) => {
                warn!(kind = ?self.kind, id, "reconciliation failed, leaving due: {e}");
                self.failed += 1;
            }
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.applied + self.stale + self.deferred + self.failed
    }
}

/// Marks a sweep kind as running until dropped.
struct SweepGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Periodic driver for [`GrantReconciler`] and [`EngagementCloser`].
pub struct ReconciliationScheduler {
    store: Arc<SqliteStore>,
    grants: Arc<GrantReconciler>,
    closer: Arc<EngagementCloser>,
    interval: Duration,
    report_tx: Option<mpsc::UnboundedSender<SweepReport>>,
    running: [Arc<AtomicBool>; 3],
}

impl ReconciliationScheduler {
    pub fn new(
        store: Arc<SqliteStore>,
        grants: Arc<GrantReconciler>,
        closer: Arc<EngagementCloser>,
    ) -> Self {
        Self {
            store,
            grants,
            closer,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            report_tx: None,
            running: Default::default(),
        }
    }

    /// Override the sweep interval. Clamped to at least one second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Receive a [`SweepReport`] after every sweep.
    pub fn with_reports(mut self, report_tx: mpsc::UnboundedSender<SweepReport>) -> Self {
        self.report_tx = Some(report_tx);
        self
    }

    fn try_begin(&self, kind: SweepKind) -> Option<SweepGuard> {
        let flag = &self.running[kind.index()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard {
                flag: Arc::clone(flag),
            })
    }

    /// Run one sweep of `kind` over everything due at `now`.
    ///
    /// Items are processed independently; one failure never stops the rest.
    pub async fn sweep(&self, kind: SweepKind, now: i64) -> SweepReport {
        let mut report = SweepReport::new(kind);
        match kind {
            SweepKind::Grants => match self.store.due_grants(now) {
                Ok(due) => {
                    for grant in due {
                        let result = self.grants.reconcile_grant(&grant).await;
                        report.record(grant.id, result);
                    }
                }
                Err(e) => error!("cannot load due grants: {e}"),
            },
            SweepKind::Punishments => match self.store.due_active_punishments(now) {
                Ok(due) => {
                    for punishment in due {
                        let result = self.grants.reconcile_punishment(&punishment).await;
                        report.record(punishment.id, result);
                    }
                }
                Err(e) => error!("cannot load due punishments: {e}"),
            },
            SweepKind::Engagements => match self.store.due_engagements(now) {
                Ok(due) => {
                    for event in due {
                        let result = self.closer.close_due(&event).await;
                        report.record(event.id, result);
                    }
                }
                Err(e) => error!("cannot load due engagements: {e}"),
            },
        }
        if report.total() > 0 {
            info!(
                kind = ?kind,
                applied = report.applied,
                stale = report.stale,
                deferred = report.deferred,
                failed = report.failed,
                "sweep finished"
            );
        }
        report
    }

    /// Start one background loop per sweep kind. Stops when `cancel` fires.
    pub fn run(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::new(self);
        tokio::spawn(async move {
            info!(interval_secs = scheduler.interval.as_secs(), "reconciliation scheduler started");
            let mut loops = tokio::task::JoinSet::new();
            for kind in SweepKind::ALL {
                loops.spawn(Arc::clone(&scheduler).tick_loop(kind, cancel.clone()));
            }
            while loops.join_next().await.is_some() {}
            info!("reconciliation scheduler stopped");
        })
    }

    /// Ticks until cancelled, then waits for the in-flight sweep.
    async fn tick_loop(self: Arc<Self>, kind: SweepKind, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = interval.tick() => {
                    let Some(guard) = self.try_begin(kind) else {
                        debug!(kind = ?kind, "previous sweep still running, skipping tick");
                        continue;
                    };
                    let scheduler = Arc::clone(&self);
                    in_flight.spawn(async move {
                        let _guard = guard;
                        let report = scheduler.sweep(kind, now_epoch_secs()).await;
                        if let Some(tx) = &scheduler.report_tx {
                            let _ = tx.send(report);
                        }
                    });
                }
            }
        }
        while in_flight.join_next().await.is_some() {}
    }
}
