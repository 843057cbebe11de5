//! Periodic progress and throughput sampling for a running download.
//!
//! Two independent loops read the shared [`RunState`]:
//!
//! - the throughput sampler swaps out the per-interval fetch counter every
//!   `throughput_period` and publishes it as tiles per second,
//! - the progress sampler renders percent complete every `progress_period`.
//!
//! Both end as soon as the run is finished or cancelled, or when the sink
//! reports that nobody is listening any more.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::run_state::RunState;

pub const THROUGHPUT_PERIOD: Duration = Duration::from_secs(1);
pub const PROGRESS_PERIOD: Duration = Duration::from_millis(200);

/// Receives progress updates for presentation, e.g. a console line or a
/// live connection to a UI.
pub trait ProgressSink: Send + Sync {
    /// Whether the consumer is still there. A closed sink ends the run.
    fn is_open(&self) -> bool {
        true
    }

    fn progress(&self, percent: u64, done: u64, expected: u64);

    fn speed(&self, tiles_per_second: u64);

    /// Called once after the last progress update of a run.
    fn finish(&self) {}
}

/// Renders a single self-overwriting status line on stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    speed: AtomicU64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        ConsoleSink::default()
    }
}

pub fn render_progress_line(percent: u64, done: u64, expected: u64, tiles_per_second: u64) -> String {
    format!(
        "\rprogress: {}%\t{}\t{}/{}\t{} tiles/s",
        percent,
        "]".repeat(percent as usize),
        done,
        expected,
        tiles_per_second
    )
}

impl ProgressSink for ConsoleSink {
    fn progress(&self, percent: u64, done: u64, expected: u64) {
        let line = render_progress_line(percent, done, expected, self.speed.load(Ordering::Relaxed));
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(line.as_bytes());
        let _ = stdout.flush();
    }

    fn speed(&self, tiles_per_second: u64) {
        self.speed.store(tiles_per_second, Ordering::Relaxed);
    }

    fn finish(&self) {
        println!();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMonitor {
    pub throughput_period: Duration,
    pub progress_period: Duration,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        ProgressMonitor {
            throughput_period: THROUGHPUT_PERIOD,
            progress_period: PROGRESS_PERIOD,
        }
    }
}

pub struct MonitorHandle {
    throughput: JoinHandle<()>,
    progress: JoinHandle<()>,
}

impl MonitorHandle {
    /// Waits for both samplers to stop. They only stop once the run is
    /// finished or cancelled, or the sink has closed.
    pub async fn join(self) {
        let _ = self.throughput.await;
        let _ = self.progress.await;
    }
}

impl ProgressMonitor {
    pub fn spawn(&self, state: Arc<RunState>, sink: Arc<dyn ProgressSink>) -> MonitorHandle {
        let throughput = tokio::spawn(sample_throughput(
            state.clone(),
            sink.clone(),
            self.throughput_period,
        ));
        let progress = tokio::spawn(sample_progress(state, sink, self.progress_period));
        MonitorHandle {
            throughput,
            progress,
        }
    }
}

fn tiles_per_second(count: u64, period: Duration) -> u64 {
    let secs = period.as_secs_f64();
    if secs <= 0.0 {
        return count;
    }
    (count as f64 / secs).round() as u64
}

async fn sample_throughput(state: Arc<RunState>, sink: Arc<dyn ProgressSink>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = state.cancelled_token().cancelled() => break,
            _ = state.finished_token().cancelled() => break,
            _ = ticker.tick() => {
                if !sink.is_open() {
                    debug!("progress sink closed, stopping throughput sampler");
                    break;
                }
                let speed = tiles_per_second(state.take_interval_count(), period);
                state.record_throughput(speed);
                sink.speed(speed);
            }
        }
    }
}

async fn sample_progress(state: Arc<RunState>, sink: Arc<dyn ProgressSink>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !state.is_stopped() {
        tokio::select! {
            biased;
            _ = state.cancelled_token().cancelled() => break,
            _ = state.finished_token().cancelled() => break,
            _ = ticker.tick() => {
                if !sink.is_open() {
                    debug!("progress sink closed, stopping progress sampler");
                    return;
                }
                sink.progress(state.percent_complete(), state.success_count(), state.expected_total());
            }
        }
    }

    if sink.is_open() {
        sink.progress(state.percent_complete(), state.success_count(), state.expected_total());
        sink.finish();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout};

    #[derive(Debug)]
    pub struct RecordingSink {
        pub open: AtomicBool,
        /// Close the sink after this many `is_open` checks.
        pub close_after_checks: Option<u64>,
        pub checks: AtomicU64,
        pub progress: Mutex<Vec<u64>>,
        pub speeds: Mutex<Vec<u64>>,
        pub finished: AtomicBool,
    }

    impl Default for RecordingSink {
        fn default() -> Self {
            RecordingSink {
                open: AtomicBool::new(true),
                close_after_checks: None,
                checks: AtomicU64::new(0),
                progress: Mutex::new(Vec::new()),
                speeds: Mutex::new(Vec::new()),
                finished: AtomicBool::new(false),
            }
        }
    }

    impl ProgressSink for RecordingSink {
        fn is_open(&self) -> bool {
            let checks = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(limit) = self.close_after_checks {
                if checks > limit {
                    self.open.store(false, Ordering::SeqCst);
                }
            }
            self.open.load(Ordering::SeqCst)
        }

        fn progress(&self, percent: u64, _done: u64, _expected: u64) {
            self.progress.lock().unwrap().push(percent);
        }

        fn speed(&self, tiles_per_second: u64) {
            self.speeds.lock().unwrap().push(tiles_per_second);
        }

        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    const FAST: ProgressMonitor = ProgressMonitor {
        throughput_period: Duration::from_millis(20),
        progress_period: Duration::from_millis(5),
    };

    const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn speed_is_scaled_to_seconds() {
        assert_eq!(tiles_per_second(5, Duration::from_secs(1)), 5);
        assert_eq!(tiles_per_second(5, Duration::from_millis(500)), 10);
        assert_eq!(tiles_per_second(3, Duration::ZERO), 3);
    }

    #[test]
    fn console_line_has_a_bar_per_percent() {
        let line = render_progress_line(3, 3, 100, 7);
        assert_eq!(line, "\rprogress: 3%\t]]]\t3/100\t7 tiles/s");
    }

    #[tokio::test]
    async fn samplers_report_and_stop_when_finished() {
        let (state, _rx) = RunState::new(4);
        let state = Arc::new(state);
        let sink = Arc::new(RecordingSink::default());
        let handle = FAST.spawn(state.clone(), sink.clone());

        state.record_fetched();
        state.record_fetched();
        sleep(Duration::from_millis(60)).await;
        state.finish();
        timeout(JOIN_TIMEOUT, handle.join()).await.unwrap();

        assert!(sink.progress.lock().unwrap().contains(&50));
        assert!(sink.finished.load(Ordering::SeqCst));
        let speeds = sink.speeds.lock().unwrap();
        assert!(!speeds.is_empty());
        // 2 tiles in a 20ms window is 100 tiles per second; later windows are empty.
        assert_eq!(speeds.iter().sum::<u64>(), 100);
        assert_eq!(state.current_throughput(), *speeds.last().unwrap());
    }

    #[tokio::test]
    async fn empty_run_reports_complete() {
        let (state, _rx) = RunState::new(0);
        let state = Arc::new(state);
        let sink = Arc::new(RecordingSink::default());
        let handle = FAST.spawn(state.clone(), sink.clone());

        sleep(Duration::from_millis(20)).await;
        state.finish();
        timeout(JOIN_TIMEOUT, handle.join()).await.unwrap();

        let progress = sink.progress.lock().unwrap();
        assert!(!progress.is_empty());
        assert!(progress.iter().all(|p| *p == 100));
    }

    #[tokio::test]
    async fn samplers_stop_on_cancel() {
        let (state, _rx) = RunState::new(10);
        let state = Arc::new(state);
        let sink = Arc::new(RecordingSink::default());
        let handle = FAST.spawn(state.clone(), sink.clone());

        state.cancel();
        timeout(JOIN_TIMEOUT, handle.join()).await.unwrap();
        assert!(!state.is_finished());
    }

    #[tokio::test]
    async fn samplers_stop_when_sink_closes() {
        let (state, _rx) = RunState::new(10);
        let state = Arc::new(state);
        let sink = Arc::new(RecordingSink::default());
        let handle = FAST.spawn(state.clone(), sink.clone());

        sleep(Duration::from_millis(30)).await;
        sink.open.store(false, Ordering::SeqCst);
        timeout(JOIN_TIMEOUT, handle.join()).await.unwrap();

        assert!(!state.is_stopped());
        assert!(!sink.finished.load(Ordering::SeqCst));
    }
}
