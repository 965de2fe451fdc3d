// src/map/mod.rs v1
//! Tile service description and the map view the cache reads from

pub mod capabilities;
pub mod view;

pub use capabilities::{StackType, TileServiceCapabilities};
pub use view::{base_map_full_url, tile_url, MapView, StaticMapView};
