use anyhow::Result;
use argh::FromArgs;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod column_task;
mod commands;
mod config;
mod coordinates;
mod downloader;
mod error;
mod fetcher;
mod planner;
mod progress;
mod report;
mod run_state;
mod tiles;
mod worker_pool;

use commands::{download, plan};
use config::DownloaderConfig;
use downloader::Downloader;
use planner::{BoundingBox, DownloadRequest};

#[derive(FromArgs)]
/// Downloads slippy-map raster tiles covering a bounding box.
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Plan(PlanArgs),
    Download(DownloadArgs),
}

#[derive(FromArgs)]
/// Count the tiles a download would fetch, without fetching anything.
#[argh(subcommand, name = "plan")]
struct PlanArgs {
    /// western edge of the bounding box (degrees longitude)
    #[argh(option)]
    min_lng: f64,

    /// southern edge of the bounding box (degrees latitude)
    #[argh(option)]
    min_lat: f64,

    /// eastern edge of the bounding box (degrees longitude)
    #[argh(option)]
    max_lng: f64,

    /// northern edge of the bounding box (degrees latitude)
    #[argh(option)]
    max_lat: f64,

    /// zoom level to fetch, may be repeated
    #[argh(option, short = 'z')]
    zoom: Vec<u8>,

    /// inclusive range of zoom levels to fetch, e.g. 10-14
    #[argh(option, from_str_fn(parse_zoom_range))]
    zoom_range: Option<(u8, u8)>,
}

#[derive(FromArgs)]
/// Download every tile in the bounding box at the requested zoom levels.
#[argh(subcommand, name = "download")]
struct DownloadArgs {
    /// western edge of the bounding box (degrees longitude)
    #[argh(option)]
    min_lng: f64,

    /// southern edge of the bounding box (degrees latitude)
    #[argh(option)]
    min_lat: f64,

    /// eastern edge of the bounding box (degrees longitude)
    #[argh(option)]
    max_lng: f64,

    /// northern edge of the bounding box (degrees latitude)
    #[argh(option)]
    max_lat: f64,

    /// zoom level to fetch, may be repeated
    #[argh(option, short = 'z')]
    zoom: Vec<u8>,

    /// inclusive range of zoom levels to fetch, e.g. 10-14
    #[argh(option, from_str_fn(parse_zoom_range))]
    zoom_range: Option<(u8, u8)>,

    /// directory to store tiles in
    #[argh(option, short = 'd', default = "PathBuf::from(\"tiles\")")]
    dir: PathBuf,

    /// re-download tiles that already exist on disk
    #[argh(switch)]
    overwrite: bool,

    /// number of columns downloaded concurrently (overrides TILE_WORKERS)
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// tile URL template with {z}, {x} and {y} placeholders (overrides TILE_URL)
    #[argh(option, short = 'u')]
    url: Option<String>,

    /// write the final report as JSON to this file
    #[argh(option)]
    report: Option<PathBuf>,
}

fn parse_zoom_range(value: &str) -> Result<(u8, u8), String> {
    let (min, max) = value
        .split_once('-')
        .ok_or_else(|| format!("expected a range like 10-14, got {:?}", value))?;
    let min: u8 = min.trim().parse().map_err(|e| format!("bad zoom {:?}: {}", min, e))?;
    let max: u8 = max.trim().parse().map_err(|e| format!("bad zoom {:?}: {}", max, e))?;
    if min > max {
        return Err(format!("zoom range {} is reversed", value));
    }
    Ok((min, max))
}

fn zooms(zoom: &[u8], zoom_range: Option<(u8, u8)>) -> Vec<u8> {
    let mut zooms = zoom.to_vec();
    if let Some((min, max)) = zoom_range {
        zooms.extend(min..=max);
    }
    zooms
}

#[tokio::main]
pub async fn main() -> Result<()> {
    dotenv().ok();
    let mut config = DownloaderConfig::from_env()?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "map-tile-downloader.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("map_tile_downloader=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    let args: Args = argh::from_env();

    match args.command {
        Command::Plan(args) => {
            let request = DownloadRequest {
                zooms: zooms(&args.zoom, args.zoom_range),
                bbox: BoundingBox::new(args.min_lng, args.min_lat, args.max_lng, args.max_lat),
                target_dir: PathBuf::from("tiles"),
                overwrite: false,
            };
            let downloader = Downloader::from_config(config)?;
            plan(&downloader, &request)
        }
        Command::Download(args) => {
            if let Some(workers) = args.workers {
                config.workers = workers;
            }
            if let Some(url) = args.url {
                config.url_template = url;
            }
            let request = DownloadRequest {
                zooms: zooms(&args.zoom, args.zoom_range),
                bbox: BoundingBox::new(args.min_lng, args.min_lat, args.max_lng, args.max_lat),
                target_dir: args.dir,
                overwrite: args.overwrite,
            };
            let downloader = Arc::new(Downloader::from_config(config)?);
            download(downloader, &request, args.report.as_deref()).await
        }
    }
}
