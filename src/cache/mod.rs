// src/cache/mod.rs v1
//! Offline map cache: download queue, tile persistence and saved map catalog

pub mod catalog;
pub mod controller;
pub mod fetch;
pub mod persist;
pub mod queue;
pub mod store;

pub use catalog::{sanitize_map_name, PointOfInterest, SavedMapCatalog, SavedMapEntry, TileRef};
pub use controller::{CacheController, SaveHandle, SaveReport};
pub use fetch::{HttpTileFetcher, TileFetcher};
pub use persist::{CacheStats, CanvasPersistence, FileTransferPersistence, TilePersistence};
pub use queue::{DownloadJob, JobState, ProgressCallback, SaveProgress, TileDownloadQueue, TileOutcome};
pub use store::{FileStore, KeyValueStore, MemoryStore};
