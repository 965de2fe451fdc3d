// src/tiles/coord.rs v1
//! Tile addressing and conversion between projected coordinates and TMS tile indices

use crate::error::{CacheError, Result};
use crate::map::capabilities::TileServiceCapabilities;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One raster tile in TMS addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// A position in the map's internal projection. `lon`/`lat` hold easting/northing
/// when the map is projected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl FromStr for LonLat {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let values = parse_floats(s, 2)?;
        Ok(Self::new(values[0], values[1]))
    }
}

/// Bounding box in the internal (projected) coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicExtent {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl GeographicExtent {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self { left, bottom, right, top }
    }

    /// Degenerate extent covering a single point.
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    pub fn centre(&self) -> LonLat {
        LonLat::new((self.left + self.right) / 2.0, (self.bottom + self.top) / 2.0)
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).abs()
    }

    pub fn height(&self) -> f64 {
        (self.top - self.bottom).abs()
    }

    /// All four edges are finite numbers.
    pub fn is_finite(&self) -> bool {
        [self.left, self.bottom, self.right, self.top].iter().all(|v| v.is_finite())
    }
}

impl FromStr for GeographicExtent {
    type Err = CacheError;

    /// Parses `left,bottom,right,top`.
    fn from_str(s: &str) -> Result<Self> {
        let v = parse_floats(s, 4)?;
        let extent = Self::new(v[0], v[1], v[2], v[3]);
        if !extent.is_finite() {
            return Err(CacheError::Other(format!("Extent edges must be finite: '{}'", s)));
        }
        Ok(extent)
    }
}

fn parse_floats(s: &str, expected: usize) -> Result<Vec<f64>> {
    let values = s
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CacheError::Other(format!("Invalid number in '{}': {}", s, e)))?;

    if values.len() != expected {
        return Err(CacheError::Other(format!(
            "Expected {} comma separated values, got {} in '{}'",
            expected,
            values.len(),
            s
        )));
    }
    Ok(values)
}

/// Inclusive range of tile indices at one zoom level.
///
/// Ranges straight out of [`TileCoordinateMapper::tile_range_for_extent`] follow
/// the extent's edges and may be inverted; call [`TileRange::normalized`] first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub x_min: i64,
    pub x_max: i64,
    pub y_min: i64,
    pub y_max: i64,
}

impl TileRange {
    pub fn normalized(self) -> Self {
        Self {
            zoom: self.zoom,
            x_min: self.x_min.min(self.x_max),
            x_max: self.x_min.max(self.x_max),
            y_min: self.y_min.min(self.y_max),
            y_max: self.y_min.max(self.y_max),
        }
    }

    /// Number of addressable tiles in the range. Cells with a negative index
    /// lie outside the tile grid and are not counted. Saturates at `u64::MAX`.
    pub fn tile_count(&self) -> u64 {
        let r = self.normalized();
        let span = |min: i64, max: i64| -> Option<u64> {
            let min = min.max(0);
            if max < min {
                return Some(0);
            }
            let cells = max.checked_sub(min)?.checked_add(1)?;
            u64::try_from(cells).ok()
        };
        span(r.x_min, r.x_max)
            .zip(span(r.y_min, r.y_max))
            .and_then(|(columns, rows)| columns.checked_mul(rows))
            .unwrap_or(u64::MAX)
    }

    /// Every addressable tile in the range, x-major.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoordinate> {
        let r = self.normalized();
        let zoom = r.zoom;
        let (y_min, y_max) = (r.y_min.max(0), r.y_max);
        (r.x_min.max(0)..=r.x_max).flat_map(move |x| {
            (y_min..=y_max).filter_map(move |y| {
                match (u32::try_from(x), u32::try_from(y)) {
                    (Ok(x), Ok(y)) => Some(TileCoordinate::new(zoom, x, y)),
                    _ => None,
                }
            })
        })
    }
}

/// Converts projected positions to tile indices using the active tile
/// service's tile size and units-per-pixel table.
#[derive(Debug, Clone)]
pub struct TileCoordinateMapper {
    capabilities: TileServiceCapabilities,
}

impl TileCoordinateMapper {
    pub fn new(capabilities: TileServiceCapabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &TileServiceCapabilities {
        &self.capabilities
    }

    /// Column containing `easting`, or `None` when no resolution is known for `zoom`.
    pub fn lon_to_tile_x(&self, easting: f64, zoom: u8) -> Option<i64> {
        if !easting.is_finite() {
            return None;
        }
        let upp = self.capabilities.units_per_pixel(zoom)?;
        let span = self.capabilities.tile_width_px as f64 * upp;
        Some((easting / span).floor() as i64)
    }

    /// Row containing `northing`, or `None` when no resolution is known for `zoom`.
    pub fn lat_to_tile_y(&self, northing: f64, zoom: u8) -> Option<i64> {
        if !northing.is_finite() {
            return None;
        }
        let upp = self.capabilities.units_per_pixel(zoom)?;
        let span = self.capabilities.tile_height_px as f64 * upp;
        Some((northing / span).floor() as i64)
    }

    /// Applies the edge conversions to all four sides of `extent`. The result is
    /// not normalised.
    pub fn tile_range_for_extent(&self, extent: &GeographicExtent, zoom: u8) -> Option<TileRange> {
        Some(TileRange {
            zoom,
            x_min: self.lon_to_tile_x(extent.left, zoom)?,
            x_max: self.lon_to_tile_x(extent.right, zoom)?,
            y_min: self.lat_to_tile_y(extent.bottom, zoom)?,
            y_max: self.lat_to_tile_y(extent.top, zoom)?,
        })
    }

    /// Projected centre of a tile, the inverse of the edge conversions.
    pub fn tile_centre(&self, tile: TileCoordinate) -> Option<LonLat> {
        let upp = self.capabilities.units_per_pixel(tile.zoom)?;
        let w = self.capabilities.tile_width_px as f64 * upp;
        let h = self.capabilities.tile_height_px as f64 * upp;
        Some(LonLat::new((tile.x as f64 + 0.5) * w, (tile.y as f64 + 0.5) * h))
    }
}

/// Slippy-map column for a WGS84 longitude.
pub fn long2tile(lon: f64, zoom: u8) -> u32 {
    let n = 2_f64.powi(zoom as i32);
    ((lon + 180.0) / 360.0 * n).floor() as u32
}

/// Slippy-map row for a WGS84 latitude.
pub fn lat2tile(lat: f64, zoom: u8) -> u32 {
    let n = 2_f64.powi(zoom as i32);
    let lat_rad = lat.to_radians();
    ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0 * n).floor() as u32
}

/// Longitude of a slippy-map column's west edge.
pub fn tile2long(x: u32, zoom: u8) -> f64 {
    let n = 2_f64.powi(zoom as i32);
    x as f64 / n * 360.0 - 180.0
}

/// Latitude of a slippy-map row's north edge.
pub fn tile2lat(y: u32, zoom: u8) -> f64 {
    let n = 2_f64.powi(zoom as i32);
    ((1.0 - 2.0 * y as f64 / n) * std::f64::consts::PI).sinh().atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::capabilities::StackType;
    use std::collections::BTreeMap;

    fn unit_caps() -> TileServiceCapabilities {
        let mut table = BTreeMap::new();
        table.insert(0, 1.0);
        table.insert(1, 0.5);
        TileServiceCapabilities {
            tile_width_px: 256,
            tile_height_px: 256,
            units_per_pixel_by_zoom: table,
            stack: StackType::Open,
        }
    }

    #[test]
    fn test_edge_conversion() {
        let mapper = TileCoordinateMapper::new(unit_caps());
        assert_eq!(mapper.lon_to_tile_x(0.0, 0), Some(0));
        assert_eq!(mapper.lon_to_tile_x(255.9, 0), Some(0));
        assert_eq!(mapper.lon_to_tile_x(256.0, 0), Some(1));
        assert_eq!(mapper.lat_to_tile_y(512.0, 0), Some(2));
        assert_eq!(mapper.lat_to_tile_y(512.0, 1), Some(4));
        assert_eq!(mapper.lon_to_tile_x(-1.0, 0), Some(-1));
    }

    #[test]
    fn test_range_for_extent() {
        let mapper = TileCoordinateMapper::new(unit_caps());
        let extent = GeographicExtent::new(0.0, 0.0, 512.0, 512.0);
        let range = mapper.tile_range_for_extent(&extent, 0).unwrap();
        assert_eq!((range.x_min, range.x_max, range.y_min, range.y_max), (0, 2, 0, 2));
        assert_eq!(range.tile_count(), 9);
        assert_eq!(range.tiles().count(), 9);
    }

    #[test]
    fn test_inverted_range_normalizes() {
        let range = TileRange { zoom: 3, x_min: 5, x_max: 2, y_min: 7, y_max: 7 };
        let r = range.normalized();
        assert_eq!((r.x_min, r.x_max), (2, 5));
        assert_eq!(range.tile_count(), 4);
    }

    #[test]
    fn test_point_extent_at_tile_centre() {
        let mapper = TileCoordinateMapper::new(unit_caps());
        for zoom in 0..=1u8 {
            for &(x, y) in &[(0u32, 0u32), (3, 9), (1250, 2650)] {
                let tile = TileCoordinate::new(zoom, x, y);
                let centre = mapper.tile_centre(tile).unwrap();
                let range = mapper
                    .tile_range_for_extent(&GeographicExtent::point(centre.lon, centre.lat), zoom)
                    .unwrap();
                assert_eq!((range.x_min, range.x_max), (x as i64, x as i64));
                assert_eq!((range.y_min, range.y_max), (y as i64, y as i64));
            }
        }
    }

    #[test]
    fn test_unknown_zoom_uses_default_table() {
        let mapper = TileCoordinateMapper::new(unit_caps());
        // zoom 2 is missing from the table, default resolution is 256
        assert_eq!(mapper.lon_to_tile_x(65536.0, 2), Some(1));
        // beyond the default table as well
        assert_eq!(mapper.lon_to_tile_x(1.0, 40), None);
        assert!(mapper.tile_range_for_extent(&GeographicExtent::point(1.0, 1.0), 40).is_none());
    }

    #[test]
    fn test_negative_cells_are_outside_grid() {
        let range = TileRange { zoom: 0, x_min: -2, x_max: 1, y_min: 0, y_max: 0 };
        assert_eq!(range.tile_count(), 2);
        assert_eq!(range.tiles().count(), 2);
    }

    #[test]
    fn test_huge_ranges_saturate() {
        let mapper = TileCoordinateMapper::new(unit_caps());
        let edge = (1u64 << 32) as f64 * 256.0 - 1.0;
        let range = mapper
            .tile_range_for_extent(&GeographicExtent::new(0.0, 0.0, edge, edge), 0)
            .unwrap();
        assert_eq!((range.x_max, range.y_max), ((1i64 << 32) - 1, (1i64 << 32) - 1));
        assert_eq!(range.tile_count(), u64::MAX);

        let range = TileRange { zoom: 0, x_min: 0, x_max: i64::MAX, y_min: 0, y_max: 0 };
        assert_eq!(range.tile_count(), u64::MAX);

        // float to int conversion saturates at i64::MAX
        let range = mapper
            .tile_range_for_extent(&GeographicExtent::new(0.0, 0.0, 1e300, 1.0), 0)
            .unwrap();
        assert_eq!(range.tile_count(), u64::MAX);
    }

    #[test]
    fn test_non_finite_edges() {
        let mapper = TileCoordinateMapper::new(unit_caps());
        assert_eq!(mapper.lon_to_tile_x(f64::NAN, 0), None);
        assert_eq!(mapper.lat_to_tile_y(f64::INFINITY, 0), None);
        assert!(!GeographicExtent::new(0.0, 0.0, f64::NAN, 1.0).is_finite());
        assert!("0,0,inf,1".parse::<GeographicExtent>().is_err());
        assert!("0,0,NaN,1".parse::<GeographicExtent>().is_err());
    }

    #[test]
    fn test_slippy_round_trip() {
        // Edinburgh
        let x = long2tile(-3.1883, 12);
        let y = lat2tile(55.9533, 12);
        let lon = tile2long(x, 12);
        let lat = tile2lat(y, 12);
        assert!((lon - (-3.1883)).abs() < 0.1);
        assert!((lat - 55.9533).abs() < 0.1);
    }

    #[test]
    fn test_parse_extent() {
        let extent: GeographicExtent = "322499.99, 676321.01,323715.99,677925.01".parse().unwrap();
        assert_eq!(extent.left, 322499.99);
        assert_eq!(extent.top, 677925.01);
        assert!("1,2,3".parse::<GeographicExtent>().is_err());
        assert!("a,b".parse::<LonLat>().is_err());
    }
}
