use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub col: u32,
    pub row: u32,
}

impl TileCoordinate {
    pub fn new(zoom: u8, col: u32, row: u32) -> Self {
        TileCoordinate { zoom, col, row }
    }
}

impl Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// Remote tile server, addressed through a URL template containing `{z}`,
/// `{x}` (column) and `{y}` (row) placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSource {
    url_template: String,
}

impl TileSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        TileSource {
            url_template: url_template.into(),
        }
    }

    pub fn tile_url(&self, tile: TileCoordinate) -> String {
        self.url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.col.to_string())
            .replace("{y}", &tile.row.to_string())
    }
}

/// On-disk layout of downloaded tiles: `<base_dir>/<z>/<x>/<y>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    base_dir: PathBuf,
    extension: String,
}

impl TileLayout {
    pub fn new(base_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        TileLayout {
            base_dir: base_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn resolve_path(&self, tile: TileCoordinate) -> PathBuf {
        self.base_dir
            .join(tile.zoom.to_string())
            .join(tile.col.to_string())
            .join(format!("{}.{}", tile.row, self.extension))
    }

    /// Like `resolve_path`, but returns `None` when the tile is already on disk
    /// and must not be overwritten.
    pub fn resolve_path_if_absent(&self, tile: TileCoordinate, overwrite: bool) -> Option<PathBuf> {
        let path = self.resolve_path(tile);
        if !overwrite && path.exists() {
            None
        } else {
            Some(path)
        }
    }

    /// Sum of the sizes of every file under the base directory.
    pub fn total_downloaded_bytes(&self) -> Result<u64> {
        if !self.base_dir.exists() {
            return Ok(0);
        }
        let mut total = 0;
        for entry in WalkDir::new(&self.base_dir) {
            let entry = entry.with_context(|| {
                format!("failed to walk tile directory {}", self.base_dir.display())
            })?;
            if entry.file_type().is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}
