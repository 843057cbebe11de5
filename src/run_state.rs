use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::error::TileFetchFailure;

/// Counters and signals shared by every worker and sampler of one run.
///
/// Built fresh for each run and dropped with it; nothing here outlives the
/// report.
#[derive(Debug)]
pub struct RunState {
    expected_total: u64,
    success_count: AtomicU64,
    interval_count: AtomicU64,
    fetched_count: AtomicU64,
    failed_count: AtomicU64,
    last_throughput: AtomicU64,
    failures: UnboundedSender<TileFetchFailure>,
    cancelled: CancellationToken,
    finished: CancellationToken,
}

impl RunState {
    /// Returns the state along with the receiving end of the failure log,
    /// which the orchestrator drains once the run is over.
    pub fn new(expected_total: u64) -> (Self, UnboundedReceiver<TileFetchFailure>) {
        Self::with_cancel_token(expected_total, CancellationToken::new())
    }

    /// Like `new`, but observes a cancellation token handed out before the
    /// run was planned.
    pub fn with_cancel_token(
        expected_total: u64,
        cancelled: CancellationToken,
    ) -> (Self, UnboundedReceiver<TileFetchFailure>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let state = RunState {
            expected_total,
            success_count: AtomicU64::new(0),
            interval_count: AtomicU64::new(0),
            fetched_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            last_throughput: AtomicU64::new(0),
            failures,
            cancelled,
            finished: CancellationToken::new(),
        };
        (state, failures_rx)
    }

    pub fn expected_total(&self) -> u64 {
        self.expected_total
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Acquire)
    }

    pub fn fetched_count(&self) -> u64 {
        self.fetched_count.load(Ordering::Acquire)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::Acquire)
    }

    /// A tile was downloaded from the server.
    pub fn record_fetched(&self) {
        self.interval_count.fetch_add(1, Ordering::AcqRel);
        self.fetched_count.fetch_add(1, Ordering::AcqRel);
        self.success_count.fetch_add(1, Ordering::AcqRel);
    }

    /// A tile was already on disk and left untouched.
    pub fn record_skipped(&self) {
        self.success_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_failure(&self, failure: TileFetchFailure) {
        self.failed_count.fetch_add(1, Ordering::AcqRel);
        // The receiver lives until the report is built, so this only fails
        // after the run has been torn down.
        let _ = self.failures.send(failure);
    }

    /// Takes the tiles fetched since the previous call and resets the window.
    pub fn take_interval_count(&self) -> u64 {
        self.interval_count.swap(0, Ordering::AcqRel)
    }

    pub fn record_throughput(&self, tiles_per_second: u64) {
        self.last_throughput.store(tiles_per_second, Ordering::Release);
    }

    /// Tiles per second as of the last throughput sample.
    pub fn current_throughput(&self) -> u64 {
        self.last_throughput.load(Ordering::Acquire)
    }

    pub fn percent_complete(&self) -> u64 {
        if self.expected_total == 0 {
            return 100;
        }
        (self.success_count() * 100 / self.expected_total).min(100)
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    pub fn cancelled_token(&self) -> &CancellationToken {
        &self.cancelled
    }

    pub fn finish(&self) {
        self.finished.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    pub fn finished_token(&self) -> &CancellationToken {
        &self.finished
    }

    /// True once either signal has fired; samplers stop on this.
    pub fn is_stopped(&self) -> bool {
        self.is_cancelled() || self.is_finished()
    }
}
