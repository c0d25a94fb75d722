use std::io::Write;
use tracing::{info, warn};

use crate::geo::TileCoord;
use crate::scheduler::{AggregateStats, FetchOutcome, ProgressObserver};

/// Logs a progress line every `every` tiles and once more on the last tile.
pub struct ProgressLogger {
    total: u64,
    every: u64,
}

impl ProgressLogger {
    pub fn new(total: u64, every: u64) -> Self {
        ProgressLogger {
            total,
            every: every.max(1),
        }
    }

    fn should_log(&self, completed: u64) -> bool {
        completed % self.every == 0 || completed == self.total
    }
}

pub fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        done * 100 / total
    }
}

impl ProgressObserver for ProgressLogger {
    fn on_tile(&self, coord: &TileCoord, outcome: &FetchOutcome, stats: &AggregateStats) {
        if outcome.is_failure() {
            warn!(tile = %coord, ?outcome, "tile failed");
        }
        let completed = stats.completed();
        if self.should_log(completed) {
            info!(
                completed,
                total = self.total,
                percent = percent(completed, self.total),
                fetched = stats.fetched,
                already_present = stats.already_present,
                failed = stats.failed,
                "progress"
            );
        }
    }

    fn on_finish(&self, stats: &AggregateStats) {
        info!(
            fetched = stats.fetched,
            already_present = stats.already_present,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "download finished"
        );
    }
}

/// Rings the terminal bell when a run finishes.
pub struct CompletionBell {
    rings: u32,
}

impl CompletionBell {
    pub fn new(rings: u32) -> Self {
        CompletionBell { rings }
    }
}

pub fn ring_bell(rings: u32) {
    let mut stdout = std::io::stdout();
    for _ in 0..rings {
        let _ = stdout.write_all(b"\x07");
    }
    let _ = stdout.flush();
}

impl ProgressObserver for CompletionBell {
    fn on_tile(&self, _coord: &TileCoord, _outcome: &FetchOutcome, _stats: &AggregateStats) {}

    fn on_finish(&self, _stats: &AggregateStats) {
        ring_bell(self.rings);
    }
}

/// Forwards every notification to each inner observer in order.
pub struct Broadcast(pub Vec<Box<dyn ProgressObserver>>);

impl ProgressObserver for Broadcast {
    fn on_tile(&self, coord: &TileCoord, outcome: &FetchOutcome, stats: &AggregateStats) {
        for observer in &self.0 {
            observer.on_tile(coord, outcome, stats);
        }
    }

    fn on_finish(&self, stats: &AggregateStats) {
        for observer in &self.0 {
            observer.on_finish(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        tiles: AtomicU64,
        finished: AtomicU64,
    }

    impl ProgressObserver for Counter {
        fn on_tile(&self, _coord: &TileCoord, _outcome: &FetchOutcome, _stats: &AggregateStats) {
            self.tiles.fetch_add(1, Ordering::Relaxed);
        }

        fn on_finish(&self, _stats: &AggregateStats) {
            self.finished.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Shared(Arc<Counter>);

    impl ProgressObserver for Shared {
        fn on_tile(&self, coord: &TileCoord, outcome: &FetchOutcome, stats: &AggregateStats) {
            self.0.on_tile(coord, outcome, stats)
        }

        fn on_finish(&self, stats: &AggregateStats) {
            self.0.on_finish(stats)
        }
    }

    #[test]
    fn logs_on_interval_and_last_tile() {
        let logger = ProgressLogger::new(120, 50);
        assert!(!logger.should_log(1));
        assert!(logger.should_log(50));
        assert!(logger.should_log(100));
        assert!(!logger.should_log(119));
        assert!(logger.should_log(120));
    }

    #[test]
    fn percent_handles_empty_totals() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn broadcast_reaches_every_observer() {
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        let observers: Vec<Box<dyn ProgressObserver>> = vec![
            Box::new(Shared(first.clone())),
            Box::new(Shared(second.clone())),
        ];
        let broadcast = Broadcast(observers);
        let coord = TileCoord { zoom: 1, x: 0, y: 1 };
        let stats = AggregateStats::default();
        broadcast.on_tile(&coord, &FetchOutcome::Fetched, &stats);
        broadcast.on_tile(&coord, &FetchOutcome::FailedHttp(500), &stats);
        broadcast.on_finish(&stats);
        for counter in [first, second] {
            assert_eq!(counter.tiles.load(Ordering::Relaxed), 2);
            assert_eq!(counter.finished.load(Ordering::Relaxed), 1);
        }
    }
}
