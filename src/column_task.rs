use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::TileFetchFailure;
use crate::fetcher::TileFetcher;
use crate::run_state::RunState;
use crate::tiles::{TileCoordinate, TileLayout, TileSource};

/// Everything a column needs besides its own coordinates.
pub struct TaskContext {
    pub fetcher: Arc<dyn TileFetcher>,
    pub source: TileSource,
    pub layout: TileLayout,
    pub overwrite: bool,
    pub state: Arc<RunState>,
}

/// One tile column at one zoom level, downloaded top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTask {
    pub zoom: u8,
    pub col: u32,
    pub row_min: u32,
    pub row_max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOutcome {
    Completed,
    /// Stopped at a row boundary because the run was cancelled.
    Cancelled,
}

impl ColumnTask {
    pub async fn run(self, ctx: Arc<TaskContext>) -> ColumnOutcome {
        let span = info_span!("column", zoom = self.zoom, col = self.col);
        self.download_rows(&ctx).instrument(span).await
    }

    async fn download_rows(self, ctx: &TaskContext) -> ColumnOutcome {
        for row in self.row_min..=self.row_max {
            if ctx.state.is_cancelled() {
                debug!(row, "cancelled, abandoning remaining rows");
                return ColumnOutcome::Cancelled;
            }
            let tile = TileCoordinate::new(self.zoom, self.col, row);
            download_tile(ctx, tile).await;
        }
        ColumnOutcome::Completed
    }
}

async fn download_tile(ctx: &TaskContext, tile: TileCoordinate) {
    let path = match ctx.layout.resolve_path_if_absent(tile, ctx.overwrite) {
        Some(path) => path,
        None => {
            debug!(%tile, "tile already on disk, skipping");
            ctx.state.record_skipped();
            return;
        }
    };

    let url = ctx.source.tile_url(tile);
    match ctx.fetcher.fetch(&url, &path).await {
        Ok(bytes) => {
            debug!(%tile, bytes, "downloaded tile");
            ctx.state.record_fetched();
        }
        Err(err) => {
            warn!(%tile, url = %url, error = %err, "failed to download tile");
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %remove_err, "could not remove partial tile");
                }
            }
            ctx.state.record_failure(TileFetchFailure {
                tile,
                url,
                reason: format!("{:#}", err),
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    pub type CancelHook = Arc<dyn Fn() + Send + Sync>;

    /// In-memory tile server: writes the URL as the tile body.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
        pub failing_urls: Mutex<HashSet<String>>,
        pub delay: Duration,
        /// Invoke the hook once this many fetches have been started.
        pub cancel_after: Option<(usize, CancelHook)>,
    }

    impl FakeFetcher {
        pub fn failing(urls: &[&str]) -> Self {
            FakeFetcher {
                failing_urls: Mutex::new(urls.iter().map(|u| u.to_string()).collect()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn serve(&self, url: &str, dest: &Path) -> Result<u64> {
            let started = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some((limit, hook)) = &self.cancel_after {
                if started >= *limit {
                    hook();
                }
            }
            let should_fail = self.failing_urls.lock().unwrap().contains(url);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = if should_fail {
                // Leave a truncated file behind like an interrupted transfer would.
                tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
                tokio::fs::write(dest, b"partial").await?;
                Err(anyhow!("connection reset"))
            } else {
                tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
                tokio::fs::write(dest, url.as_bytes()).await?;
                Ok(url.len() as u64)
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl TileFetcher for FakeFetcher {
        fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
            self.serve(url, dest).boxed()
        }
    }

    fn context(fetcher: Arc<FakeFetcher>, dir: &Path, overwrite: bool, total: u64) -> Arc<TaskContext> {
        let (state, _rx) = RunState::new(total);
        Arc::new(TaskContext {
            fetcher,
            source: TileSource::new("http://tiles/{z}/{x}/{y}.png"),
            layout: TileLayout::new(dir, "png"),
            overwrite,
            state: Arc::new(state),
        })
    }

    const COLUMN: ColumnTask = ColumnTask {
        zoom: 3,
        col: 4,
        row_min: 1,
        row_max: 3,
    };

    #[tokio::test]
    async fn downloads_every_row_in_the_column() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = Arc::new(FakeFetcher::default());
        let ctx = context(fetcher.clone(), dir.path(), false, 3);

        assert_eq!(COLUMN.run(ctx.clone()).await, ColumnOutcome::Completed);

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(ctx.state.success_count(), 3);
        for row in 1..=3 {
            assert!(dir.path().join(format!("3/4/{}.png", row)).exists());
        }
        Ok(())
    }

    #[tokio::test]
    async fn existing_tiles_are_skipped_unless_overwriting() -> Result<()> {
        let dir = tempdir()?;
        let existing = dir.path().join("3/4/2.png");
        std::fs::create_dir_all(existing.parent().unwrap())?;
        std::fs::write(&existing, b"old")?;

        let fetcher = Arc::new(FakeFetcher::default());
        let ctx = context(fetcher.clone(), dir.path(), false, 3);
        COLUMN.run(ctx.clone()).await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(ctx.state.success_count(), 3);
        assert_eq!(ctx.state.take_interval_count(), 2);
        assert_eq!(std::fs::read(&existing)?, b"old");

        let fetcher = Arc::new(FakeFetcher::default());
        let ctx = context(fetcher.clone(), dir.path(), true, 3);
        COLUMN.run(ctx.clone()).await;
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(std::fs::read(&existing)?, b"http://tiles/3/4/2.png");
        Ok(())
    }

    #[tokio::test]
    async fn failed_tile_is_removed_and_siblings_continue() -> Result<()> {
        let dir = tempdir()?;
        let fetcher = Arc::new(FakeFetcher::failing(&["http://tiles/3/4/2.png"]));
        let ctx = context(fetcher.clone(), dir.path(), false, 3);

        assert_eq!(COLUMN.run(ctx.clone()).await, ColumnOutcome::Completed);

        assert!(!dir.path().join("3/4/2.png").exists());
        assert!(dir.path().join("3/4/1.png").exists());
        assert!(dir.path().join("3/4/3.png").exists());
        assert_eq!(ctx.state.success_count(), 2);
        assert_eq!(ctx.state.failed_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_column_stops_at_next_row() -> Result<()> {
        let dir = tempdir()?;
        let (state, _rx) = RunState::new(3);
        let state = Arc::new(state);
        let hook_state = state.clone();
        let fetcher = Arc::new(FakeFetcher {
            cancel_after: Some((1, Arc::new(move || hook_state.cancel()))),
            ..Default::default()
        });
        let ctx = Arc::new(TaskContext {
            fetcher: fetcher.clone(),
            source: TileSource::new("http://tiles/{z}/{x}/{y}.png"),
            layout: TileLayout::new(dir.path(), "png"),
            overwrite: false,
            state: state.clone(),
        });

        assert_eq!(COLUMN.run(ctx).await, ColumnOutcome::Cancelled);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(state.success_count(), 1);
        Ok(())
    }
}
