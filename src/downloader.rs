use anyhow::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::column_task::{ColumnOutcome, TaskContext};
use crate::config::DownloaderConfig;
use crate::error::InvalidRequest;
use crate::fetcher::{HttpFetcher, TileFetcher};
use crate::planner::{DownloadRequest, Plan};
use crate::progress::{ConsoleSink, ProgressSink};
use crate::report::{DownloadReport, PlanEstimate, RunOutcome};
use crate::run_state::RunState;
use crate::tiles::{TileLayout, TileSource};
use crate::worker_pool::{Completion, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Planning,
    Running,
    Completed,
    Cancelled,
    Disconnected,
}

impl From<RunOutcome> for RunPhase {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => RunPhase::Completed,
            RunOutcome::Cancelled => RunPhase::Cancelled,
            RunOutcome::Disconnected => RunPhase::Disconnected,
        }
    }
}

/// Plans and runs tile downloads. One run at a time per downloader; each run
/// gets its own [`RunState`].
pub struct Downloader {
    config: DownloaderConfig,
    fetcher: Arc<dyn TileFetcher>,
    sink: Arc<dyn ProgressSink>,
    current: Mutex<Option<Arc<RunState>>>,
    /// Cancellation signal of the active run, handed out before planning so
    /// `cancel` is never lost between `run` starting and the state existing.
    cancel_signal: Mutex<Option<CancellationToken>>,
    phase: Mutex<RunPhase>,
}

impl Downloader {
    pub fn new(
        config: DownloaderConfig,
        fetcher: Arc<dyn TileFetcher>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Downloader {
            config,
            fetcher,
            sink,
            current: Mutex::new(None),
            cancel_signal: Mutex::new(None),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    /// Downloader fetching over HTTP and rendering progress to the console.
    pub fn from_config(config: DownloaderConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.request_timeout, config.connect_timeout)?;
        Ok(Downloader::new(
            config,
            Arc::new(fetcher),
            Arc::new(ConsoleSink::new()),
        ))
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: RunPhase) {
        debug!(?phase, "run phase changed");
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn current_run(&self) -> Option<Arc<RunState>> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_current_run(&self, state: Option<Arc<RunState>>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_cancel_signal(&self, signal: Option<CancellationToken>) {
        *self.cancel_signal.lock().unwrap_or_else(|e| e.into_inner()) = signal;
    }

    /// Stops the active run, if any. Safe to call repeatedly and from other
    /// tasks while `run` is in progress, including while it is still planning.
    pub fn cancel(&self) {
        let signal = self
            .cancel_signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(signal) = signal {
            if !signal.is_cancelled() {
                info!("cancelling download");
            }
            signal.cancel();
        }
    }

    /// Percent complete of the active run.
    pub fn percent_complete(&self) -> Option<u64> {
        self.current_run().map(|state| state.percent_complete())
    }

    /// Tiles per second of the active run, as of the last sample.
    pub fn current_throughput(&self) -> Option<u64> {
        self.current_run().map(|state| state.current_throughput())
    }

    /// Counts the tiles a request covers without downloading anything.
    pub fn plan(&self, request: &DownloadRequest) -> Result<PlanEstimate> {
        let plan = Plan::new(request)?;
        Ok(PlanEstimate {
            expected_total: plan.expected_total,
            estimated_bytes: plan
                .expected_total
                .saturating_mul(self.config.estimated_tile_bytes),
            grids: plan.grids,
        })
    }

    /// Downloads every tile of the request and reports on the result.
    ///
    /// Only an invalid request is an error. Tile failures, cancellation and a
    /// closed progress sink all still produce a report.
    #[instrument(skip(self, request), fields(zooms = ?request.zooms, dir = %request.target_dir.display()))]
    pub async fn run(&self, request: &DownloadRequest) -> Result<DownloadReport> {
        let cancelled = CancellationToken::new();
        self.set_cancel_signal(Some(cancelled.clone()));
        self.set_phase(RunPhase::Planning);
        let plan = match self.validate_and_plan(request) {
            Ok(plan) => plan,
            Err(err) => {
                self.set_cancel_signal(None);
                self.set_phase(RunPhase::Idle);
                return Err(err);
            }
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let (state, mut failures_rx) = RunState::with_cancel_token(plan.expected_total, cancelled);
        let state = Arc::new(state);
        self.set_current_run(Some(state.clone()));

        let ctx = Arc::new(TaskContext {
            fetcher: self.fetcher.clone(),
            source: TileSource::new(self.config.url_template.clone()),
            layout: TileLayout::new(&request.target_dir, self.config.extension.clone()),
            overwrite: request.overwrite,
            state: state.clone(),
        });

        let tasks = plan.column_tasks();
        info!(
            expected_total = plan.expected_total,
            columns = tasks.len(),
            workers = self.config.workers,
            overwrite = request.overwrite,
            "starting download"
        );

        self.set_phase(RunPhase::Running);
        let mut pool = WorkerPool::new(self.config.workers);
        if state.is_cancelled() {
            info!("cancelled while planning, no columns submitted");
        } else {
            for task in tasks {
                pool.submit(task.run(ctx.clone()));
            }
        }
        let monitor = self.config.monitor.spawn(state.clone(), self.sink.clone());

        let outcome = self.drain(&mut pool, &state).await;

        state.finish();
        monitor.join().await;
        self.set_current_run(None);
        self.set_cancel_signal(None);
        self.set_phase(outcome.into());

        let mut failed_tiles = Vec::new();
        while let Ok(failure) = failures_rx.try_recv() {
            debug!(tile = %failure.tile, reason = %failure.reason, "collected tile failure");
            failed_tiles.push(failure.url);
        }

        let layout = ctx.layout.clone();
        let total_bytes = tokio::task::spawn_blocking(move || layout.total_downloaded_bytes())
            .await
            .map_err(anyhow::Error::from)
            .and_then(|bytes| bytes)
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to measure downloaded tiles");
                0
            });

        let report = DownloadReport {
            outcome,
            started_at,
            elapsed_seconds: start.elapsed().as_secs_f64(),
            expected_total: state.expected_total(),
            success_count: state.success_count(),
            fetched_count: state.fetched_count(),
            failed_count: state.failed_count(),
            failed_tiles,
            total_bytes,
        };
        report.log_summary();
        Ok(report)
    }

    fn validate_and_plan(&self, request: &DownloadRequest) -> Result<Plan> {
        if self.config.workers == 0 {
            return Err(InvalidRequest::new("at least one worker is required").into());
        }
        Plan::new(request)
    }

    /// Collects finished columns until all are done or the run is stopped.
    async fn drain(&self, pool: &mut WorkerPool<ColumnOutcome>, state: &RunState) -> RunOutcome {
        let outcome = loop {
            if state.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            if !self.sink.is_open() {
                warn!("progress consumer disconnected, stopping download");
                state.cancel();
                break RunOutcome::Disconnected;
            }
            if pool.is_empty() {
                return RunOutcome::Completed;
            }

            let completion = tokio::select! {
                biased;
                _ = state.cancelled_token().cancelled() => continue,
                completion = pool.next_completed() => completion,
            };
            match completion {
                None => return RunOutcome::Completed,
                Some(completion) => debug!(?completion, remaining = pool.len(), "column finished"),
            }
        };

        // Columns still queued never start; running ones stop at their next row.
        pool.close();
        let mut stopped_columns = 0;
        while let Some(completion) = pool.next_completed().await {
            if completion != Completion::Finished(ColumnOutcome::Completed) {
                stopped_columns += 1;
            }
        }
        info!(stopped_columns, "download stopped before all columns finished");
        outcome
    }
}
