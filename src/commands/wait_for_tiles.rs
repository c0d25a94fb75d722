use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::observers::{percent, ring_bell};
use crate::tile_store::TileStore;

pub struct WaitOptions {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub expected: u64,
    pub interval: Duration,
    /// Unchanged polls after which a stalled download is reported.
    pub stall_checks: u32,
    /// Accept a stalled download once at least this many tiles exist.
    pub good_enough: Option<u64>,
}

fn count_stored(store: &TileStore, min_zoom: u8, max_zoom: u8) -> u64 {
    (min_zoom..=max_zoom).map(|zoom| store.scan(zoom)).sum()
}

/// Polls the tile tree, which another process is filling, and rings the bell once it is full.
pub async fn wait_for_tiles(store: &TileStore, options: &WaitOptions) -> Result<u64> {
    info!(
        expected = options.expected,
        root = %store.root().display(),
        "waiting for tiles"
    );
    let mut last_count = None;
    let mut unchanged = 0;
    loop {
        let count = count_stored(store, options.min_zoom, options.max_zoom);
        if last_count != Some(count) {
            println!(
                "progress: {}/{} ({}%)",
                count,
                options.expected,
                percent(count, options.expected)
            );
            last_count = Some(count);
            unchanged = 0;
        } else {
            unchanged += 1;
        }

        if count >= options.expected {
            println!("download complete");
            ring_bell(2);
            return Ok(count);
        }

        if unchanged > options.stall_checks {
            warn!(count, expected = options.expected, "no new tiles for a while");
            if let Some(good_enough) = options.good_enough {
                if count >= good_enough {
                    println!("{} tiles stored, enough to use", count);
                    ring_bell(2);
                    return Ok(count);
                }
            }
            unchanged = 0;
        }

        sleep(options.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::geo::TileCoord;
    use tempfile::tempdir;

    fn options(expected: u64, good_enough: Option<u64>) -> WaitOptions {
        WaitOptions {
            min_zoom: 1,
            max_zoom: 2,
            expected,
            interval: Duration::from_millis(1),
            stall_checks: 2,
            good_enough,
        }
    }

    #[tokio::test]
    async fn returns_once_expected_tiles_exist() {
        let dir = tempdir().unwrap();
        let store = TileStore::new(&StoreConfig::new(dir.path(), "png").unwrap());
        let filler = store.clone();
        let writer = tokio::spawn(async move {
            for y in 0..4 {
                sleep(Duration::from_millis(2)).await;
                filler
                    .write(&TileCoord { zoom: 2, x: 1, y }, vec![1])
                    .await
                    .unwrap();
            }
        });
        let count = wait_for_tiles(&store, &options(4, None)).await.unwrap();
        assert_eq!(count, 4);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn accepts_stalled_download_above_threshold() {
        let dir = tempdir().unwrap();
        let store = TileStore::new(&StoreConfig::new(dir.path(), "png").unwrap());
        store
            .write(&TileCoord { zoom: 1, x: 0, y: 0 }, vec![1])
            .await
            .unwrap();
        // tiles outside the watched zooms are ignored
        store
            .write(&TileCoord { zoom: 3, x: 0, y: 0 }, vec![1])
            .await
            .unwrap();
        let count = wait_for_tiles(&store, &options(10, Some(1))).await.unwrap();
        assert_eq!(count, 1);
    }
}
