use anyhow::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::Region;
use crate::observers::percent;
use crate::planner::Plan;
use crate::tile_store::TileStore;

const BAR_WIDTH: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomStatus {
    pub zoom: u8,
    pub present: u64,
    pub required: u64,
}

impl ZoomStatus {
    pub fn is_complete(&self) -> bool {
        self.present >= self.required
    }

    fn bar(&self) -> String {
        let filled = if self.required == 0 {
            BAR_WIDTH
        } else {
            (BAR_WIDTH * self.present / self.required).min(BAR_WIDTH)
        };
        format!(
            "{}{}",
            "=".repeat(filled as usize),
            "-".repeat((BAR_WIDTH - filled) as usize)
        )
    }
}

pub fn collect_status(plan: &Plan, store: &TileStore) -> Vec<ZoomStatus> {
    plan.ranges
        .values()
        .map(|range| ZoomStatus {
            zoom: range.zoom,
            present: store.count_present(range),
            required: range.required_count(),
        })
        .collect()
}

fn print_status(statuses: &[ZoomStatus], previous: Option<&[ZoomStatus]>) {
    for (i, status) in statuses.iter().enumerate() {
        let gained = previous
            .and_then(|previous| previous.get(i))
            .map(|before| status.present.saturating_sub(before.present))
            .filter(|gained| *gained > 0)
            .map(|gained| format!(" (+{})", gained))
            .unwrap_or_default();
        println!(
            "[{}] z{:>2}: {:>6}/{:<6} |{}| {:>3}%  remaining {}{}",
            if status.is_complete() { "OK" } else { "DL" },
            status.zoom,
            status.present,
            status.required,
            status.bar(),
            percent(status.present, status.required),
            status.required - status.present.min(status.required),
            gained
        );
    }
    let present: u64 = statuses.iter().map(|status| status.present).sum();
    let required: u64 = statuses.iter().map(|status| status.required).sum();
    println!(
        "total: {}/{} ({}%), remaining {}",
        present,
        required,
        percent(present, required),
        required.saturating_sub(present)
    );
}

/// Prints per-zoom completeness; with `watch` set, keeps polling until every zoom is complete.
pub async fn status(region: &Region, store: &TileStore, watch: Option<Duration>) -> Result<()> {
    let plan = region.plan();
    let mut previous: Option<Vec<ZoomStatus>> = None;
    let mut checks = 0u64;
    loop {
        let statuses = collect_status(&plan, store);
        checks += 1;
        debug!(checks, "checked tile store");
        print_status(&statuses, previous.as_deref());
        let complete = statuses.iter().all(ZoomStatus::is_complete);
        if complete {
            println!("all tiles downloaded");
            return Ok(());
        }
        let interval = match watch {
            Some(interval) => interval,
            None => return Ok(()),
        };
        previous = Some(statuses);
        tokio::select! {
            _ = sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("stopped watching after {} checks", checks);
                return Ok(());
            }
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::geo::GeoBoundingBox;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reports_partial_zoom_levels() {
        let dir = tempdir().unwrap();
        let store = TileStore::new(&StoreConfig::new(dir.path(), "png").unwrap());
        let bbox = GeoBoundingBox::new(10.33, 10.79, 106.36, 106.71).unwrap();
        let region = Region::new(bbox, 10, 11).unwrap();
        let plan = region.plan();
        for coord in plan.ranges[&10].coords() {
            store.write(&coord, vec![1]).await.unwrap();
        }
        let statuses = collect_status(&plan, &store);
        assert_eq!(
            statuses,
            vec![
                ZoomStatus {
                    zoom: 10,
                    present: 4,
                    required: 4
                },
                ZoomStatus {
                    zoom: 11,
                    present: 0,
                    required: 9
                },
            ]
        );
        assert!(statuses[0].is_complete());
        assert!(!statuses[1].is_complete());
    }

    #[test]
    fn bar_fills_proportionally() {
        let half = ZoomStatus {
            zoom: 3,
            present: 5,
            required: 10,
        };
        assert_eq!(half.bar(), format!("{}{}", "=".repeat(15), "-".repeat(15)));
        let done = ZoomStatus {
            zoom: 3,
            present: 10,
            required: 10,
        };
        assert_eq!(done.bar(), "=".repeat(30));
    }
}
