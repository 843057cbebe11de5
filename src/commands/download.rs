use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::downloader::Downloader;
use crate::planner::DownloadRequest;

pub async fn download(
    downloader: Arc<Downloader>,
    request: &DownloadRequest,
    report_path: Option<&Path>,
) -> Result<()> {
    let estimate = downloader.plan(request)?;
    info!(
        tiles = estimate.expected_total,
        size = %estimate.humanized_size(),
        "planned download"
    );

    let canceller = downloader.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(
                percent = ?canceller.percent_complete(),
                tiles_per_second = ?canceller.current_throughput(),
                "interrupted, finishing in-flight tiles"
            );
            canceller.cancel();
        }
    });

    let report = downloader.run(request).await;
    interrupt.abort();
    let report = report?;
    debug!(phase = ?downloader.phase(), "downloader settled");

    if let Some(path) = report_path {
        report.write_json(path)?;
    }
    Ok(())
}
