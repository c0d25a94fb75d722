use anyhow::Result;

use crate::config::Region;
use crate::geo::{tile_to_lat_lon, TileCoord};

pub fn plan_tiles(region: &Region) -> Result<()> {
    let bbox = &region.bbox;
    println!(
        "lat {}..{}, lon {}..{}, zoom {}..={}",
        bbox.min_lat(),
        bbox.max_lat(),
        bbox.min_lon(),
        bbox.max_lon(),
        region.min_zoom,
        region.max_zoom
    );

    let plan = region.plan();
    for range in plan.ranges.values() {
        let (north, west) = tile_to_lat_lon(&TileCoord {
            zoom: range.zoom,
            x: range.x_min,
            y: range.y_min,
        });
        let (south, east) = tile_to_lat_lon(&TileCoord {
            zoom: range.zoom,
            x: range.x_max + 1,
            y: range.y_max + 1,
        });
        println!(
            "zoom {:>2}: x {}..={} y {}..={} -> {} tiles (covers lat {:.4}..{:.4}, lon {:.4}..{:.4})",
            range.zoom,
            range.x_min,
            range.x_max,
            range.y_min,
            range.y_max,
            range.required_count(),
            south,
            north,
            west,
            east
        );
    }
    println!("total: {} tiles", plan.total());
    Ok(())
}
