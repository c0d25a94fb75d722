//! Bounded-concurrency tile download engine.
//!
//! A run first diffs the requested coordinates against the [`TileStore`]
//! (synchronously, no network), then hands the missing ones to a fixed pool of
//! workers. Each worker pulls the next undispatched coordinate from a shared
//! queue, fetches it, and writes it to the store before reporting the outcome.
//! The store is the only state that survives a run, so running the same plan
//! again only fetches whatever is still missing.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::geo::TileCoord;
use crate::tile_client::{FetchError, TileFetcher};
use crate::tile_store::TileStore;

/// Final state of one tile in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FetchOutcome {
    AlreadyPresent,
    Fetched,
    FailedHttp(u16),
    FailedTransport(String),
    /// The body arrived but could not be persisted.
    FailedStore(String),
    /// Taken from the queue, then abandoned before its request because the run was cancelled.
    Cancelled,
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FetchOutcome::FailedHttp(_)
                | FetchOutcome::FailedTransport(_)
                | FetchOutcome::FailedStore(_)
        )
    }
}

impl From<FetchError> for FetchOutcome {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Http(status) => FetchOutcome::FailedHttp(status),
            FetchError::Transport(reason) => FetchOutcome::FailedTransport(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub fetched: u64,
    pub already_present: u64,
    /// Sum of the three `failed_*` counters.
    pub failed: u64,
    pub failed_http: u64,
    pub failed_transport: u64,
    pub failed_store: u64,
    /// Never requested because the run was cancelled.
    pub cancelled: u64,
}

impl AggregateStats {
    fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::AlreadyPresent => self.already_present += 1,
            FetchOutcome::Fetched => self.fetched += 1,
            FetchOutcome::FailedHttp(_) => self.failed_http += 1,
            FetchOutcome::FailedTransport(_) => self.failed_transport += 1,
            FetchOutcome::FailedStore(_) => self.failed_store += 1,
            FetchOutcome::Cancelled => self.cancelled += 1,
        }
        if outcome.is_failure() {
            self.failed += 1;
        }
    }

    /// Tiles with a final outcome.
    pub fn completed(&self) -> u64 {
        self.fetched + self.already_present + self.failed
    }

    pub fn total(&self) -> u64 {
        self.completed() + self.cancelled
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Receives scheduler notifications.
///
/// `on_tile` is called under the scheduler's stats lock, once per tile, with
/// the stats already including that tile. Keep it short.
pub trait ProgressObserver: Send + Sync {
    fn on_tile(&self, coord: &TileCoord, outcome: &FetchOutcome, stats: &AggregateStats);

    fn on_finish(&self, _stats: &AggregateStats) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(&TileCoord, &FetchOutcome, &AggregateStats) + Send + Sync,
{
    fn on_tile(&self, coord: &TileCoord, outcome: &FetchOutcome, stats: &AggregateStats) {
        self(coord, outcome, stats)
    }
}

impl ProgressObserver for () {
    fn on_tile(&self, _coord: &TileCoord, _outcome: &FetchOutcome, _stats: &AggregateStats) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per tile, including the first one.
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles for every further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    /// Pause each worker takes before every request.
    pub request_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            concurrency: crate::config::DEFAULT_CONCURRENCY,
            request_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }
}

struct Tally<'a, O> {
    stats: Mutex<AggregateStats>,
    observer: &'a O,
}

impl<'a, O: ProgressObserver> Tally<'a, O> {
    fn record(&self, coord: &TileCoord, outcome: FetchOutcome) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.record(&outcome);
        self.observer.on_tile(coord, &outcome, &stats);
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Scheduler {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops dispatching new tiles once `cancel` fires. In-flight requests finish normally.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run<F, O>(
        &self,
        coords: impl IntoIterator<Item = TileCoord>,
        store: &TileStore,
        fetcher: &F,
        observer: &O,
    ) -> AggregateStats
    where
        F: TileFetcher,
        O: ProgressObserver,
    {
        let tally = Tally {
            stats: Mutex::new(AggregateStats::default()),
            observer,
        };

        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for coord in coords {
            if !seen.insert(coord) {
                continue;
            }
            if store.exists(&coord) {
                tally.record(&coord, FetchOutcome::AlreadyPresent);
            } else {
                missing.push(coord);
            }
        }

        let workers = self.config.concurrency.max(1).min(missing.len());
        info!(
            requested = seen.len(),
            missing = missing.len(),
            workers,
            "diffed tiles against store"
        );

        let queue = Mutex::new(missing.into_iter());
        join_all((0..workers).map(|worker| {
            self.worker(&queue, store, fetcher, &tally)
                .instrument(info_span!("worker", worker))
        }))
        .await;

        let undispatched = queue
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64;
        let mut stats = tally
            .stats
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        stats.cancelled += undispatched;
        if undispatched > 0 {
            warn!(undispatched, "run cancelled before every tile was dispatched");
        }
        info!(
            fetched = stats.fetched,
            already_present = stats.already_present,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "finished run"
        );
        observer.on_finish(&stats);
        stats
    }

    async fn worker<F, O, I>(
        &self,
        queue: &Mutex<I>,
        store: &TileStore,
        fetcher: &F,
        tally: &Tally<'_, O>,
    ) where
        F: TileFetcher,
        O: ProgressObserver,
        I: Iterator<Item = TileCoord>,
    {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
            let coord = match next {
                Some(coord) => coord,
                None => break,
            };
            let outcome = self.fetch_and_store(coord, store, fetcher).await;
            tally.record(&coord, outcome);
        }
    }

    /// Sleeps for `duration` unless the run is cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn fetch_and_store<F: TileFetcher>(
        &self,
        coord: TileCoord,
        store: &TileStore,
        fetcher: &F,
    ) -> FetchOutcome {
        let retry = self.config.retry;
        let mut attempt = 1;
        let mut last_error: Option<FetchError> = None;
        loop {
            if !self.config.request_delay.is_zero() && !self.pause(self.config.request_delay).await
            {
                debug!(tile = %coord, attempt, "cancelled before request");
                return last_error.map_or(FetchOutcome::Cancelled, FetchOutcome::from);
            }
            let fetched = fetcher.fetch(coord).await.and_then(|bytes| {
                // an empty file reads as absent, so storing one would fetch it forever
                if bytes.is_empty() {
                    Err(FetchError::Transport("body: empty response".to_string()))
                } else {
                    Ok(bytes)
                }
            });
            match fetched {
                Ok(bytes) => {
                    return match store.write(&coord, bytes).await {
                        Ok(()) => FetchOutcome::Fetched,
                        Err(err) => {
                            warn!(tile = %coord, error = %err, "failed to store tile");
                            FetchOutcome::FailedStore(err.to_string())
                        }
                    };
                }
                Err(err)
                    if err.is_transient()
                        && attempt < retry.max_attempts
                        && !self.cancel.is_cancelled() =>
                {
                    let wait = retry.backoff_after(attempt);
                    debug!(tile = %coord, error = %err, attempt, ?wait, "retrying tile");
                    if !self.pause(wait).await {
                        warn!(tile = %coord, error = %err, attempt, "cancelled before retry");
                        return err.into();
                    }
                    last_error = Some(err);
                    attempt += 1;
                }
                Err(err) => {
                    warn!(tile = %coord, error = %err, attempt, "failed to fetch tile");
                    return err.into();
                }
            }
        }
    }
}
