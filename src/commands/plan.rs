use anyhow::Result;
use humansize::{format_size, DECIMAL};
use tracing::info;

use crate::coordinates::tile_to_lon_lat;
use crate::downloader::Downloader;
use crate::planner::DownloadRequest;

pub fn plan(downloader: &Downloader, request: &DownloadRequest) -> Result<()> {
    let estimate = downloader.plan(request)?;
    for grid in &estimate.grids {
        let (west, north) = tile_to_lon_lat(grid.zoom, grid.col_min, grid.row_min);
        let (east, south) = tile_to_lon_lat(grid.zoom, grid.col_max + 1, grid.row_max + 1);
        info!(
            zoom = grid.zoom,
            cols = ?(grid.col_min..=grid.col_max),
            rows = ?(grid.row_min..=grid.row_max),
            tiles = grid.tile_count(),
            covered = %format!("{:.4},{:.4} to {:.4},{:.4}", west, south, east, north),
            "planned zoom level"
        );
    }
    println!(
        "would download {} tiles (approx {}, assuming {} per tile)",
        estimate.expected_total,
        estimate.humanized_size(),
        format_size(downloader.config().estimated_tile_bytes, DECIMAL)
    );
    Ok(())
}
