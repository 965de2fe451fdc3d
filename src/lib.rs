// src/lib.rs
//! FieldTrip Cache Library
//!
//! Saves map tiles for offline use: works out which tiles cover a map extent,
//! refuses oversized downloads, drives a fixed pool of concurrent downloads and
//! keeps a catalog of saved maps.

pub mod cache;
pub mod config;
pub mod display;
pub mod error;
pub mod map;
pub mod tiles;

// Re-export main types for convenience
pub use cache::{CacheController, SavedMapCatalog, SavedMapEntry, TileDownloadQueue};
pub use config::{CacheConfig, PersistenceKind};
pub use error::{AdmissionError, CacheError, Result};
pub use map::{MapView, StaticMapView, TileServiceCapabilities};
pub use tiles::{DownloadSizeEstimator, GeographicExtent, TileCoordinate, TileCoordinateMapper};
