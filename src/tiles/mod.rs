// src/tiles/mod.rs
//! Tile grid maths and download size estimation

pub mod coord;
pub mod estimate;

pub use coord::{
    lat2tile, long2tile, tile2lat, tile2long, GeographicExtent, LonLat, TileCoordinate,
    TileCoordinateMapper, TileRange,
};
pub use estimate::{
    bytes_to_size, DownloadSizeEstimator, SaveStats, AV_TILE_SIZE, MAX_CACHE, MAX_NO_OF_SAVED_MAPS,
};
