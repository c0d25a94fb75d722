use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{DownloadConfig, Region};
use crate::observers::{Broadcast, CompletionBell, ProgressLogger};
use crate::planner::Plan;
use crate::scheduler::{AggregateStats, ProgressObserver, Scheduler};
use crate::tile_client::HttpTileClient;
use crate::tile_store::TileStore;

const PROGRESS_EVERY: u64 = 50;

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    region: &'a Region,
    plan: &'a Plan,
    concurrency: usize,
    stats: AggregateStats,
}

pub async fn download_tiles(
    config: &DownloadConfig,
    report_path: Option<&str>,
    bell: bool,
) -> Result<AggregateStats> {
    let started_at = Utc::now();
    let plan = config.region.plan();
    let total = plan.total();
    info!(
        total,
        min_zoom = config.region.min_zoom,
        max_zoom = config.region.max_zoom,
        "planned tiles"
    );

    let store = TileStore::new(&config.store);
    let client =
        HttpTileClient::new(&config.provider).context("Failed to build tile HTTP client")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight tiles");
            interrupt.cancel();
        }
    });

    let mut observers: Vec<Box<dyn ProgressObserver>> =
        vec![Box::new(ProgressLogger::new(total, PROGRESS_EVERY))];
    if bell {
        observers.push(Box::new(CompletionBell::new(1)));
    }
    let observer = Broadcast(observers);

    let scheduler = Scheduler::new(config.scheduler.clone()).with_cancellation(cancel);
    let stats = scheduler
        .run(plan.coords(), &store, &client, &observer)
        .instrument(info_span!("download", root = %store.root().display()))
        .await;

    println!("fetched:         {}", stats.fetched);
    println!("already present: {}", stats.already_present);
    println!(
        "failed:          {} (http {}, transport {}, store {})",
        stats.failed, stats.failed_http, stats.failed_transport, stats.failed_store
    );
    if stats.cancelled > 0 {
        println!("not attempted:   {}", stats.cancelled);
    }
    println!("saved under:     {}", store.root().display());

    if let Some(path) = report_path {
        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            region: &config.region,
            plan: &plan,
            concurrency: config.scheduler.concurrency,
            stats,
        };
        let mut file =
            File::create(path).with_context(|| format!("Failed to create report {}", path))?;
        write!(file, "{}", serde_json::to_string_pretty(&report)?)?;
        info!(path, "wrote run report");
    }

    if !stats.is_complete() {
        if stats.cancelled > 0 {
            bail!(
                "download interrupted with {} tiles not attempted, re-run to resume",
                stats.cancelled
            );
        }
        bail!("{} tiles failed, re-run to retry them", stats.failed);
    }
    Ok(stats)
}
