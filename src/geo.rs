//! Web Mercator (slippy-map) projection between geographic coordinates and tile indices.

use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;

use crate::config::ConfigError;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;
pub const MAX_LON: f64 = 180.0;
pub const MAX_ZOOM: u8 = 22;

/// One tile at one zoom level. `x` and `y` are always below `2^zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBoundingBox {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl GeoBoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self, ConfigError> {
        let finite = [min_lat, max_lat, min_lon, max_lon]
            .iter()
            .all(|value| value.is_finite());
        if !finite || min_lat >= max_lat || min_lon >= max_lon {
            return Err(ConfigError::InvalidBoundingBox {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            });
        }
        if min_lat < -MAX_LAT || max_lat > MAX_LAT {
            return Err(ConfigError::LatitudeOutOfRange(if min_lat < -MAX_LAT {
                min_lat
            } else {
                max_lat
            }));
        }
        if min_lon < -MAX_LON || max_lon > MAX_LON {
            return Err(ConfigError::LongitudeOutOfRange(if min_lon < -MAX_LON {
                min_lon
            } else {
                max_lon
            }));
        }
        Ok(GeoBoundingBox {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }
}

/// Number of tiles along one axis at `zoom`, saturating far past [`MAX_ZOOM`].
pub fn grid_size(zoom: u8) -> u64 {
    1u64.checked_shl(zoom as u32).unwrap_or(u64::MAX)
}

/// Maps a latitude/longitude in degrees to the tile containing it at `zoom`.
///
/// Uses the `asinh(tan(lat))` form of the Mercator y formula so tile indices
/// match the canonical OSM scheme bit for bit. Points on the east edge or the
/// latitude limit are clamped onto the last tile of the grid.
pub fn project(lat: f64, lon: f64, zoom: u8) -> TileCoord {
    let n = 2.0_f64.powi(zoom as i32);
    let x = ((lon + 180.0) / 360.0 * n).floor();
    let lat_rad = lat.to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();

    let last = (grid_size(zoom) - 1) as f64;
    TileCoord {
        zoom,
        x: x.clamp(0.0, last) as u32,
        y: y.clamp(0.0, last) as u32,
    }
}

/// North-west corner of a tile as `(lat, lon)` in degrees.
pub fn tile_to_lat_lon(tile: &TileCoord) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);
    let lon = tile.x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * tile.y as f64 / n)).sinh().atan().to_degrees();
    (lat, lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_saigon_reference_tile() {
        let tile = project(10.78, 106.70, 10);
        assert_eq!(tile, TileCoord { zoom: 10, x: 815, y: 481 });
    }

    #[test]
    fn projects_new_york_at_zoom_16() {
        let tile = project(40.7128, -74.0060, 16);
        assert_eq!(tile.x, 19295);
        assert_eq!(tile.y, 24640);
    }

    #[test]
    fn zoom_zero_is_a_single_tile() {
        assert_eq!(project(0.0, 0.0, 0), TileCoord { zoom: 0, x: 0, y: 0 });
        assert_eq!(project(-80.0, 179.9, 0), TileCoord { zoom: 0, x: 0, y: 0 });
    }

    #[test]
    fn clamps_world_edges_onto_the_grid() {
        let east = project(0.0, 180.0, 3);
        assert_eq!(east.x, 7);
        let north = project(MAX_LAT, -180.0, 3);
        assert_eq!((north.x, north.y), (0, 0));
        let south = project(-MAX_LAT, 0.0, 3);
        assert_eq!(south.y, 7);
    }

    #[test]
    fn north_west_corner_lies_inside_its_own_tile() {
        let tile = project(51.5074, -0.1278, 12);
        let (lat, lon) = tile_to_lat_lon(&tile);
        assert!(lat >= 51.5074);
        assert!(lon <= -0.1278);
        assert_eq!(project(lat - 1e-9, lon + 1e-9, 12), tile);
    }

    #[test]
    fn huge_zoom_does_not_overflow() {
        assert_eq!(grid_size(MAX_ZOOM), 4_194_304);
        assert_eq!(grid_size(64), u64::MAX);
        let tile = project(10.78, 106.70, u8::MAX);
        assert_eq!(tile.zoom, u8::MAX);
        assert_eq!(project(0.0, -180.0, 70).x, 0);
    }

    #[test]
    fn rejects_inverted_bounding_box() {
        assert!(matches!(
            GeoBoundingBox::new(10.79, 10.33, 106.36, 106.71),
            Err(ConfigError::InvalidBoundingBox { .. })
        ));
        assert!(matches!(
            GeoBoundingBox::new(10.33, 10.79, 106.71, 106.71),
            Err(ConfigError::InvalidBoundingBox { .. })
        ));
        assert!(matches!(
            GeoBoundingBox::new(f64::NAN, 10.79, 106.36, 106.71),
            Err(ConfigError::InvalidBoundingBox { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_bounding_box() {
        assert!(matches!(
            GeoBoundingBox::new(10.0, 89.0, 0.0, 1.0),
            Err(ConfigError::LatitudeOutOfRange(lat)) if lat == 89.0
        ));
        assert!(matches!(
            GeoBoundingBox::new(10.0, 11.0, -181.0, 1.0),
            Err(ConfigError::LongitudeOutOfRange(lon)) if lon == -181.0
        ));
    }
}
