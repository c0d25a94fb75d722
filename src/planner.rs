use serde::Serialize;
use std::collections::BTreeMap;
use std::iter::FusedIterator;
use tracing::{debug, instrument};

use crate::geo::{project, GeoBoundingBox, TileCoord};

/// Inclusive rectangle of tiles covering a bounding box at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileRange {
    pub zoom: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileRange {
    pub fn width(&self) -> u64 {
        (self.x_max - self.x_min) as u64 + 1
    }

    pub fn height(&self) -> u64 {
        (self.y_max - self.y_min) as u64 + 1
    }

    pub fn required_count(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.zoom == self.zoom
            && (self.x_min..=self.x_max).contains(&coord.x)
            && (self.y_min..=self.y_max).contains(&coord.y)
    }

    /// Enumerates every tile in the range, column by column. Each call starts over.
    pub fn coords(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            next_x: self.x_min as u64,
            next_y: self.y_min as u64,
            remaining: self.required_count(),
        }
    }
}

pub struct TileRangeIter {
    range: TileRange,
    next_x: u64,
    next_y: u64,
    remaining: u64,
}

impl Iterator for TileRangeIter {
    type Item = TileCoord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let coord = TileCoord {
            zoom: self.range.zoom,
            x: self.next_x as u32,
            y: self.next_y as u32,
        };
        self.remaining -= 1;
        if self.next_y == self.range.y_max as u64 {
            self.next_y = self.range.y_min as u64;
            self.next_x += 1;
        } else {
            self.next_y += 1;
        }
        Some(coord)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl FusedIterator for TileRangeIter {}

/// Computes the tile range covering `bbox` at `zoom`.
///
/// The y axis grows southwards, so the north-west corner yields the smallest
/// row and the south-east corner the largest. Both axes are still min/max
/// normalized rather than trusting that orientation.
pub fn plan(bbox: &GeoBoundingBox, zoom: u8) -> TileRange {
    let north_west = project(bbox.max_lat(), bbox.min_lon(), zoom);
    let south_east = project(bbox.min_lat(), bbox.max_lon(), zoom);
    TileRange {
        zoom,
        x_min: north_west.x.min(south_east.x),
        x_max: north_west.x.max(south_east.x),
        y_min: north_west.y.min(south_east.y),
        y_max: north_west.y.max(south_east.y),
    }
}

/// Plans every zoom in `zoom_min..=zoom_max` independently.
pub fn plan_multi_zoom(
    bbox: &GeoBoundingBox,
    zoom_min: u8,
    zoom_max: u8,
) -> BTreeMap<u8, TileRange> {
    (zoom_min..=zoom_max)
        .map(|zoom| (zoom, plan(bbox, zoom)))
        .collect()
}

/// Per-zoom ranges for a whole download, in ascending zoom order.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub ranges: BTreeMap<u8, TileRange>,
}

impl Plan {
    #[instrument(level = "debug")]
    pub fn new(bbox: &GeoBoundingBox, zoom_min: u8, zoom_max: u8) -> Plan {
        let ranges = plan_multi_zoom(bbox, zoom_min, zoom_max);
        for range in ranges.values() {
            debug!(
                zoom = range.zoom,
                x_min = range.x_min,
                x_max = range.x_max,
                y_min = range.y_min,
                y_max = range.y_max,
                count = range.required_count(),
                "planned zoom level"
            );
        }
        Plan { ranges }
    }

    pub fn total(&self) -> u64 {
        self.ranges.values().map(TileRange::required_count).sum()
    }

    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.ranges.values().flat_map(TileRange::coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn saigon() -> GeoBoundingBox {
        GeoBoundingBox::new(10.33, 10.79, 106.36, 106.71).unwrap()
    }

    #[test]
    fn plans_saigon_at_zoom_15() {
        let range = plan(&saigon(), 15);
        assert_eq!(
            range,
            TileRange {
                zoom: 15,
                x_min: 26065,
                x_max: 26096,
                y_min: 15396,
                y_max: 15438,
            }
        );
        assert_eq!(range.required_count(), 1376);
    }

    #[test]
    fn plans_every_zoom_independently() {
        let ranges = plan_multi_zoom(&saigon(), 10, 15);
        let counts: Vec<u64> = ranges.values().map(TileRange::required_count).collect();
        assert_eq!(counts, vec![4, 9, 30, 99, 374, 1376]);
        assert_eq!(Plan::new(&saigon(), 10, 15).total(), 1892);
    }

    #[test]
    fn ranges_are_normalized_and_match_enumeration() {
        let boxes = [
            (10.33, 10.79, 106.36, 106.71),
            (-33.95, -33.80, 151.10, 151.30),
            (40.60, 40.90, -74.10, -73.70),
            (-10.0, 10.0, -5.0, 5.0),
            (60.0, 70.0, -179.5, 179.5),
        ];
        for (min_lat, max_lat, min_lon, max_lon) in boxes {
            let bbox = GeoBoundingBox::new(min_lat, max_lat, min_lon, max_lon).unwrap();
            for zoom in 0..=10 {
                let range = plan(&bbox, zoom);
                assert!(range.x_min <= range.x_max);
                assert!(range.y_min <= range.y_max);
                let coords: Vec<TileCoord> = range.coords().collect();
                assert_eq!(coords.len() as u64, range.required_count());
                assert!(coords.iter().all(|coord| range.contains(coord)));
            }
        }
    }

    #[test]
    fn enumeration_is_unique_and_restartable() {
        let range = plan(&saigon(), 13);
        let first: Vec<TileCoord> = range.coords().collect();
        let second: Vec<TileCoord> = range.coords().collect();
        assert_eq!(first, second);
        let unique: HashSet<TileCoord> = first.iter().copied().collect();
        assert_eq!(unique.len(), first.len());
        assert_eq!(range.coords().size_hint(), (99, Some(99)));
    }

    #[test]
    fn single_tile_range() {
        let bbox = GeoBoundingBox::new(10.0, 10.001, 106.0, 106.001).unwrap();
        let range = plan(&bbox, 5);
        assert_eq!(range.required_count(), 1);
        let mut coords = range.coords();
        assert_eq!(coords.next(), Some(TileCoord { zoom: 5, x: 25, y: 15 }));
        assert_eq!(coords.next(), None);
        assert_eq!(coords.next(), None);
    }
}
