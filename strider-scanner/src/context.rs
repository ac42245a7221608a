use crate::report::{ReportCallback, VisitReport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};

/// Counts outstanding visit tasks for one traversal.
///
/// Work is held as [`WorkUnit`] guards: taking one increments the count and
/// dropping it decrements, so every exit path of a task (including a panic)
/// gives its unit back exactly once. Once the count has reached zero nobody
/// is left holding a unit, so it can never rise again.
#[derive(Debug, Default)]
pub struct WorkCounter {
    outstanding: AtomicUsize,
    idle_transitions: AtomicUsize,
    idle: Notify,
}

impl WorkCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take one unit of work. Must happen before the task it accounts for
    /// is spawned.
    pub fn acquire(self: &Arc<Self>) -> WorkUnit {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        WorkUnit {
            counter: Arc::clone(self),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// How many times the count has dropped to zero.
    pub fn idle_transitions(&self) -> usize {
        self.idle_transitions.load(Ordering::SeqCst)
    }

    /// Resolves once no work is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle_transitions.fetch_add(1, Ordering::SeqCst);
            self.idle.notify_waiters();
        }
    }
}

/// One outstanding task's share of a [`WorkCounter`].
#[derive(Debug)]
#[must_use = "dropping a WorkUnit releases it immediately"]
pub struct WorkUnit {
    counter: Arc<WorkCounter>,
}

impl Drop for WorkUnit {
    fn drop(&mut self) {
        self.counter.release();
    }
}

/// Per-traversal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    /// Fetches issued to the retrieval backend.
    pub fetches: usize,
    pub found: usize,
    pub failed: usize,
    /// Fetches whose dedup key was already recorded.
    pub duplicates: usize,
    /// Tasks that started with no depth budget left.
    pub depth_skipped: usize,
    pub panicked: usize,
    /// Times the outstanding-work count dropped to zero. A finished
    /// traversal always reports exactly one.
    pub idle_transitions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    pub fetches: AtomicUsize,
    pub found: AtomicUsize,
    pub failed: AtomicUsize,
    pub duplicates: AtomicUsize,
    pub depth_skipped: AtomicUsize,
    pub panicked: AtomicUsize,
}

impl AtomicStats {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, work: &WorkCounter) -> CrawlStats {
        CrawlStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            depth_skipped: self.depth_skipped.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            idle_transitions: work.idle_transitions(),
        }
    }
}

/// Shared state of a single traversal: the visited-set behind one lock, the
/// outstanding-work counter, the observation sink and the report log.
pub(crate) struct CrawlContext {
    visited: Mutex<HashMap<String, bool>>,
    reports: Mutex<Vec<VisitReport>>,
    report_callback: Option<ReportCallback>,
    pub work: Arc<WorkCounter>,
    pub stats: AtomicStats,
}

impl CrawlContext {
    pub fn new(report_callback: Option<ReportCallback>) -> Self {
        Self {
            visited: Mutex::new(HashMap::new()),
            reports: Mutex::new(Vec::new()),
            report_callback,
            work: WorkCounter::new(),
            stats: AtomicStats::default(),
        }
    }

    /// Records `key` with `outcome` unless it is already present. Returns
    /// whether this call inserted it. The lock is held only for the
    /// check-and-insert.
    pub async fn mark_visited(&self, key: String, outcome: bool) -> bool {
        let mut visited = self.visited.lock().await;
        if visited.contains_key(&key) {
            return false;
        }
        visited.insert(key, outcome);
        true
    }

    /// Hands `report` to the sink and appends it to the log under the same
    /// lock, so the log matches the order the sink saw.
    pub async fn emit(&self, report: VisitReport) {
        let mut reports = self.reports.lock().await;
        if let Some(ref callback) = self.report_callback {
            callback(&report);
        }
        reports.push(report);
    }

    pub async fn visited_snapshot(&self) -> HashMap<String, bool> {
        self.visited.lock().await.clone()
    }

    pub async fn reports_snapshot(&self) -> Vec<VisitReport> {
        self.reports.lock().await.clone()
    }
}
