// src/tiles/estimate.rs v1
//! Pre-flight download size estimation

use super::coord::{GeographicExtent, TileCoordinateMapper};
use serde::Serialize;

/// Average size of one tile in bytes (16 KB).
pub const AV_TILE_SIZE: u64 = 16384;

/// Maximum estimated download per save operation (50 MB).
pub const MAX_CACHE: u64 = 52_428_800;

/// Maximum number of saved maps kept in the catalog.
pub const MAX_NO_OF_SAVED_MAPS: usize = 3;

/// Summary shown before a save is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    pub tile_count: u64,
    pub bytes: u64,
    pub human_size: String,
    pub max_human_size: String,
    pub allowed: bool,
}

pub struct DownloadSizeEstimator {
    mapper: TileCoordinateMapper,
}

impl DownloadSizeEstimator {
    pub fn new(mapper: TileCoordinateMapper) -> Self {
        Self { mapper }
    }

    /// Count tiles covering `extent` for every zoom in `zoom_min..=zoom_max`.
    pub fn estimate_tile_count(&self, extent: Option<&GeographicExtent>, zoom_min: u8, zoom_max: u8) -> u64 {
        let extent = match extent {
            Some(extent) => extent,
            None => {
                log::warn!("Map has no bounds, can't calculate download size");
                return 0;
            }
        };

        if !extent.is_finite() {
            log::warn!("Map bounds are not finite, download size is unbounded");
            return u64::MAX;
        }

        (zoom_min..=zoom_max)
            .map(|zoom| match self.mapper.tile_range_for_extent(extent, zoom) {
                Some(range) => range.tile_count(),
                None => {
                    log::warn!("No resolution known for zoom level {}, skipping", zoom);
                    0
                }
            })
            .fold(0u64, u64::saturating_add)
    }

    pub fn estimate_bytes(tile_count: u64) -> u64 {
        tile_count.saturating_mul(AV_TILE_SIZE)
    }

    pub fn exceeds_cap(bytes: u64) -> bool {
        bytes > MAX_CACHE
    }

    pub fn save_stats(&self, extent: Option<&GeographicExtent>, zoom_min: u8, zoom_max: u8) -> SaveStats {
        let tile_count = self.estimate_tile_count(extent, zoom_min, zoom_max);
        let bytes = Self::estimate_bytes(tile_count);
        SaveStats {
            tile_count,
            bytes,
            human_size: bytes_to_size(bytes),
            max_human_size: bytes_to_size(MAX_CACHE),
            allowed: !Self::exceeds_cap(bytes),
        }
    }
}

/// Human readable size, rounded to a whole unit: `147456` -> `144KB`.
pub fn bytes_to_size(bytes: u64) -> String {
    const SIZES: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "n/a".to_string();
    }
    let i = ((bytes as f64).ln() / 1024_f64.ln()).floor() as usize;
    let i = i.min(SIZES.len() - 1);
    let value = (bytes as f64 / 1024_f64.powi(i as i32)).round();
    format!("{}{}", value, SIZES[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::capabilities::{StackType, TileServiceCapabilities};
    use std::collections::BTreeMap;

    fn estimator(upp: &[(u8, f64)]) -> DownloadSizeEstimator {
        let caps = TileServiceCapabilities {
            tile_width_px: 256,
            tile_height_px: 256,
            units_per_pixel_by_zoom: upp.iter().copied().collect::<BTreeMap<_, _>>(),
            stack: StackType::Open,
        };
        DownloadSizeEstimator::new(TileCoordinateMapper::new(caps))
    }

    #[test]
    fn test_nine_tiles_at_zoom_zero() {
        let est = estimator(&[(0, 1.0)]);
        let extent = GeographicExtent::new(0.0, 0.0, 512.0, 512.0);
        let count = est.estimate_tile_count(Some(&extent), 0, 0);
        assert_eq!(count, 9);
        assert_eq!(DownloadSizeEstimator::estimate_bytes(count), 147_456);
        assert!(!DownloadSizeEstimator::exceeds_cap(147_456));
    }

    #[test]
    fn test_multiple_zoom_levels_sum() {
        let est = estimator(&[(0, 1.0), (1, 0.5)]);
        let extent = GeographicExtent::new(0.0, 0.0, 512.0, 512.0);
        // 3x3 at zoom 0, 5x5 at zoom 1
        assert_eq!(est.estimate_tile_count(Some(&extent), 0, 1), 9 + 25);
    }

    #[test]
    fn test_missing_extent_counts_nothing() {
        let est = estimator(&[(0, 1.0)]);
        assert_eq!(est.estimate_tile_count(None, 0, 5), 0);
    }

    #[test]
    fn test_cap() {
        assert!(DownloadSizeEstimator::exceeds_cap(DownloadSizeEstimator::estimate_bytes(4000)));
        assert!(!DownloadSizeEstimator::exceeds_cap(MAX_CACHE));
        assert_eq!(DownloadSizeEstimator::estimate_bytes(3200), MAX_CACHE);
    }

    #[test]
    fn test_huge_extent_exceeds_cap() {
        let est = estimator(&[(0, 1.0), (1, 0.5)]);
        let edge = (1u64 << 32) as f64 * 256.0 - 1.0;
        let extent = GeographicExtent::new(0.0, 0.0, edge, edge);

        let count = est.estimate_tile_count(Some(&extent), 0, 1);
        assert_eq!(count, u64::MAX);
        let bytes = DownloadSizeEstimator::estimate_bytes(count);
        assert!(DownloadSizeEstimator::exceeds_cap(bytes));
        assert!(!est.save_stats(Some(&extent), 0, 1).allowed);
    }

    #[test]
    fn test_non_finite_extent_exceeds_cap() {
        let est = estimator(&[(0, 1.0)]);
        let extent = GeographicExtent::new(0.0, f64::NEG_INFINITY, 1.0, 1.0);
        assert_eq!(est.estimate_tile_count(Some(&extent), 0, 0), u64::MAX);
    }

    #[test]
    fn test_save_stats() {
        let est = estimator(&[(0, 1.0)]);
        let extent = GeographicExtent::new(0.0, 0.0, 512.0, 512.0);
        let stats = est.save_stats(Some(&extent), 0, 0);
        assert_eq!(stats.human_size, "144KB");
        assert_eq!(stats.max_human_size, "50MB");
        assert!(stats.allowed);
    }

    #[test]
    fn test_bytes_to_size() {
        assert_eq!(bytes_to_size(0), "n/a");
        assert_eq!(bytes_to_size(512), "512Bytes");
        assert_eq!(bytes_to_size(16384), "16KB");
        assert_eq!(bytes_to_size(65_536_000), "63MB");
    }
}
