use anyhow::{Context, Result};
use argh::FromArgs;
use dotenv::dotenv;
use std::env;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod geo;
mod observers;
mod planner;
mod scheduler;
mod tile_client;
mod tile_store;

use commands::{download_tiles, plan_tiles, status, wait_for_tiles, WaitOptions};
use config::{
    validate_scheduler, DownloadConfig, ProviderConfig, Region, StoreConfig, DEFAULT_CONCURRENCY,
    DEFAULT_EXTENSION, DEFAULT_TILES_DIR, DEFAULT_TILE_URL, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
use geo::GeoBoundingBox;
use tile_store::TileStore;

#[derive(FromArgs)]
/// Downloads slippy-map tiles covering a bounding box into a resumable local cache
struct Args {
    /// southern edge of the bounding box in degrees
    #[argh(option, default = "10.33")]
    min_lat: f64,

    /// northern edge of the bounding box in degrees
    #[argh(option, default = "10.79")]
    max_lat: f64,

    /// western edge of the bounding box in degrees
    #[argh(option, default = "106.36")]
    min_lon: f64,

    /// eastern edge of the bounding box in degrees
    #[argh(option, default = "106.71")]
    max_lon: f64,

    /// lowest zoom level to cover
    #[argh(option, default = "10")]
    min_zoom: u8,

    /// highest zoom level to cover
    #[argh(option, default = "15")]
    max_zoom: u8,

    /// cover only this zoom level (overrides --min-zoom and --max-zoom)
    #[argh(option, short = 'z')]
    zoom: Option<u8>,

    /// tile cache directory (default: $TILES_DIR or docs/tiles)
    #[argh(option)]
    tiles_dir: Option<String>,

    /// file extension of stored tiles
    #[argh(option, default = "String::from(DEFAULT_EXTENSION)")]
    extension: String,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Plan(PlanArgs),
    Download(DownloadArgs),
    Status(StatusArgs),
    Wait(WaitArgs),
}

#[derive(FromArgs)]
/// Print the tiles needed per zoom level
#[argh(subcommand, name = "plan")]
struct PlanArgs {}

#[derive(FromArgs)]
/// Download every tile that is not in the cache yet
#[argh(subcommand, name = "download")]
struct DownloadArgs {
    /// number of concurrent requests
    #[argh(option, short = 't', default = "DEFAULT_CONCURRENCY")]
    threads: usize,

    /// pause in milliseconds each worker takes before a request
    #[argh(option, default = "0")]
    delay_ms: u64,

    /// attempts per tile for timeouts, 429s and 5xx responses
    #[argh(option, default = "1")]
    attempts: u32,

    /// request timeout in seconds
    #[argh(option, default = "DEFAULT_TIMEOUT.as_secs()")]
    timeout_secs: u64,

    /// tile URL template with {z}, {x} and {y} (default: $TILE_URL or OpenStreetMap)
    #[argh(option)]
    url: Option<String>,

    /// user agent header sent to the tile server (default: $TILE_USER_AGENT)
    #[argh(option)]
    user_agent: Option<String>,

    /// write a JSON run report to this path
    #[argh(option)]
    report: Option<String>,

    /// do not ring the terminal bell when finished
    #[argh(switch)]
    no_bell: bool,
}

#[derive(FromArgs)]
/// Show how many planned tiles are already cached
#[argh(subcommand, name = "status")]
struct StatusArgs {
    /// keep refreshing every this many seconds until complete
    #[argh(option)]
    watch: Option<u64>,
}

#[derive(FromArgs)]
/// Wait for another process to fill the cache, then ring the bell
#[argh(subcommand, name = "wait")]
struct WaitArgs {
    /// tile count to wait for (default: the planned total)
    #[argh(option)]
    expected: Option<u64>,

    /// seconds between checks
    #[argh(option, default = "5")]
    interval: u64,

    /// unchanged checks before the download is considered stalled
    #[argh(option, default = "10")]
    stall_checks: u32,

    /// finish a stalled wait once this many tiles exist
    #[argh(option)]
    good_enough: Option<u64>,
}

fn env_or(name: &str, fallback: &str) -> String {
    env::var(name).unwrap_or_else(|_| fallback.to_string())
}

#[tokio::main]
pub async fn main() -> Result<()> {
    dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "tile-fetcher.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let args: Args = argh::from_env();

    let (min_zoom, max_zoom) = match args.zoom {
        Some(zoom) => (zoom, zoom),
        None => (args.min_zoom, args.max_zoom),
    };
    let bbox = GeoBoundingBox::new(args.min_lat, args.max_lat, args.min_lon, args.max_lon)
        .context("Invalid bounding box")?;
    let region = Region::new(bbox, min_zoom, max_zoom).context("Invalid zoom range")?;
    let tiles_dir = args
        .tiles_dir
        .unwrap_or_else(|| env_or("TILES_DIR", DEFAULT_TILES_DIR));
    let store_config =
        StoreConfig::new(tiles_dir, &args.extension).context("Invalid tile store settings")?;

    match args.command {
        Command::Plan(_) => plan_tiles(&region),
        Command::Download(download) => {
            let provider = ProviderConfig::new(
                download
                    .url
                    .unwrap_or_else(|| env_or("TILE_URL", DEFAULT_TILE_URL)),
                download
                    .user_agent
                    .unwrap_or_else(|| env_or("TILE_USER_AGENT", DEFAULT_USER_AGENT)),
                Duration::from_secs(download.timeout_secs),
            )
            .context("Invalid tile server settings")?;
            let scheduler = validate_scheduler(
                download.threads,
                Duration::from_millis(download.delay_ms),
                download.attempts,
            )
            .context("Invalid download settings")?;
            let config = DownloadConfig {
                region,
                store: store_config,
                provider,
                scheduler,
            };
            download_tiles(&config, download.report.as_deref(), !download.no_bell).await?;
            Ok(())
        }
        Command::Status(status_args) => {
            let store = TileStore::new(&store_config);
            status(&region, &store, status_args.watch.map(Duration::from_secs)).await
        }
        Command::Wait(wait) => {
            let store = TileStore::new(&store_config);
            let options = WaitOptions {
                min_zoom: region.min_zoom,
                max_zoom: region.max_zoom,
                expected: wait.expected.unwrap_or_else(|| region.plan().total()),
                interval: Duration::from_secs(wait.interval.max(1)),
                stall_checks: wait.stall_checks,
                good_enough: wait.good_enough,
            };
            wait_for_tiles(&store, &options).await?;
            Ok(())
        }
    }
}
