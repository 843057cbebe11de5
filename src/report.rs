use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use crate::planner::TileGrid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// The progress consumer went away mid-run; handled like a cancellation.
    Disconnected,
}

/// Dry-run estimate of what a download would fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEstimate {
    pub expected_total: u64,
    pub estimated_bytes: u64,
    pub grids: Vec<TileGrid>,
}

impl PlanEstimate {
    pub fn humanized_size(&self) -> String {
        format_size(self.estimated_bytes, DECIMAL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadReport {
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub expected_total: u64,
    pub success_count: u64,
    pub fetched_count: u64,
    pub failed_count: u64,
    pub failed_tiles: Vec<String>,
    pub total_bytes: u64,
}

impl DownloadReport {
    /// Tiles never reached because the run stopped early.
    pub fn abandoned_count(&self) -> u64 {
        self.expected_total
            .saturating_sub(self.success_count)
            .saturating_sub(self.failed_count)
    }

    pub fn log_summary(&self) {
        for url in &self.failed_tiles {
            warn!(url = %url, "tile download failed");
        }
        info!(
            outcome = ?self.outcome,
            failed = self.failed_count,
            succeeded = self.success_count,
            abandoned = self.abandoned_count(),
            expected = self.expected_total,
            "download finished"
        );
        info!("total time: {:.1} s", self.elapsed_seconds);
        info!("total size: {}", format_size(self.total_bytes, DECIMAL));
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)?;
        info!("wrote download report to {}", path.display());
        Ok(())
    }
}
