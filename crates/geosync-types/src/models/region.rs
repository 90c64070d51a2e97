//! Region tiling: bounding boxes, tile keys, and viewport coverage.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in WGS-84 degrees.
///
/// Used both as the fetch unit sent to the remote service and as the
/// eviction/partition unit in the local store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Region {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self { min_lat, min_lon, max_lat, max_lon }
    }

    /// Whether a point lies inside this box (inclusive bounds).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Quantized tile coordinate on the fixed-degree region grid.
///
/// The key for everything keyed per region: in-flight sync dedup, the
/// persisted cursor table, and the eviction tag on cache entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RegionKey {
    /// Tile index along longitude.
    pub ix: i32,
    /// Tile index along latitude.
    pub iy: i32,
}

impl RegionKey {
    /// Tile containing the given point, on a grid of `tile_size_deg` tiles.
    pub fn for_point(lat: f64, lon: f64, tile_size_deg: f64) -> Self {
        Self {
            ix: (lon / tile_size_deg).floor() as i32,
            iy: (lat / tile_size_deg).floor() as i32,
        }
    }

    /// The bounding box this tile covers.
    pub fn bounds(&self, tile_size_deg: f64) -> Region {
        let min_lon = f64::from(self.ix) * tile_size_deg;
        let min_lat = f64::from(self.iy) * tile_size_deg;
        Region::new(min_lat, min_lon, min_lat + tile_size_deg, min_lon + tile_size_deg)
    }
}

impl std::fmt::Display for RegionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.ix, self.iy)
    }
}

/// The caller-facing view rectangle, tiled into covering [`RegionKey`]s.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Viewport {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self { min_lat, min_lon, max_lat, max_lon }
    }

    /// The set of grid tiles overlapping this viewport.
    ///
    /// Coverage is inclusive at the edges, so queries over the cover may
    /// over-fetch by up to one tile of granularity past the viewport.
    pub fn tiles(&self, tile_size_deg: f64) -> Vec<RegionKey> {
        let lo = RegionKey::for_point(self.min_lat, self.min_lon, tile_size_deg);
        let hi = RegionKey::for_point(self.max_lat, self.max_lon, tile_size_deg);
        let mut keys = Vec::new();
        for iy in lo.iy..=hi.iy {
            for ix in lo.ix..=hi.ix {
                keys.push(RegionKey { ix, iy });
            }
        }
        keys
    }

    /// Bounding box of the full tile cover (the over-fetch envelope).
    pub fn tile_cover_bounds(&self, tile_size_deg: f64) -> Region {
        let lo = RegionKey::for_point(self.min_lat, self.min_lon, tile_size_deg);
        let hi = RegionKey::for_point(self.max_lat, self.max_lon, tile_size_deg);
        let lo_bounds = lo.bounds(tile_size_deg);
        let hi_bounds = hi.bounds(tile_size_deg);
        Region::new(lo_bounds.min_lat, lo_bounds.min_lon, hi_bounds.max_lat, hi_bounds.max_lon)
    }
}

impl From<Viewport> for Region {
    fn from(v: Viewport) -> Self {
        Self::new(v.min_lat, v.min_lon, v.max_lat, v.max_lon)
    }
}
