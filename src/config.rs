use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::progress::ProgressMonitor;

pub static DEFAULT_TILE_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
pub static DEFAULT_EXTENSION: &str = "png";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Rough average size of one raster tile, used for dry-run size estimates.
pub const DEFAULT_ESTIMATED_TILE_BYTES: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloaderConfig {
    pub url_template: String,
    pub extension: String,
    pub workers: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub estimated_tile_bytes: u64,
    pub log_dir: PathBuf,
    pub monitor: ProgressMonitor,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            url_template: DEFAULT_TILE_URL.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            workers: DEFAULT_WORKERS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            estimated_tile_bytes: DEFAULT_ESTIMATED_TILE_BYTES,
            log_dir: PathBuf::from("./logs"),
            monitor: ProgressMonitor::default(),
        }
    }
}

impl DownloaderConfig {
    /// Reads `TILE_*` variables from the environment, falling back to the
    /// defaults for any that are unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = DownloaderConfig::default();
        Ok(DownloaderConfig {
            url_template: lookup("TILE_URL").unwrap_or(defaults.url_template),
            extension: lookup("TILE_EXTENSION").unwrap_or(defaults.extension),
            workers: parse_var(&lookup, "TILE_WORKERS")?.unwrap_or(defaults.workers),
            request_timeout: parse_var(&lookup, "TILE_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            connect_timeout: parse_var(&lookup, "TILE_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            estimated_tile_bytes: parse_var(&lookup, "TILE_ESTIMATED_BYTES")?
                .unwrap_or(defaults.estimated_tile_bytes),
            log_dir: lookup("TILE_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            monitor: defaults.monitor,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("{} must be a number, got {:?}", key, value))
        })
        .transpose()
}
