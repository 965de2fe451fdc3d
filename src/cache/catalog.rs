// src/cache/catalog.rs v1
//! Durable registry of saved offline maps
//!
//! All entries live in one JSON object under [`SAVED_MAPS`] in the key/value
//! store, keyed by sanitised map name.

use super::persist::TilePersistence;
use super::store::KeyValueStore;
use crate::error::{AdmissionError, Result};
use crate::tiles::{GeographicExtent, LonLat, TileCoordinate, MAX_NO_OF_SAVED_MAPS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage key of the current catalog format.
pub const SAVED_MAPS: &str = "saved-maps-v2";

/// Storage key of the old, incompatible format. Discarded, never migrated.
pub const SAVED_MAPS_VERSION_1: &str = "saved-maps";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub centre: LonLat,
    pub zoom: u8,
}

/// A persisted tile belonging to a saved map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRef {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    /// File path or in-memory key the tile was stored under.
    pub location: String,
}

impl TileRef {
    pub fn new(tile: TileCoordinate, location: String) -> Self {
        Self {
            zoom: tile.zoom,
            x: tile.x,
            y: tile.y,
            location,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        TileCoordinate::new(self.zoom, self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMapEntry {
    pub poi: PointOfInterest,
    pub bounds: GeographicExtent,
    #[serde(default)]
    pub images: Vec<TileRef>,
    /// Storage namespace the tiles were written under. Survives renames.
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl SavedMapEntry {
    /// Entry recorded when a save is admitted, before any tile lands.
    pub fn provisional(namespace: &str, poi: PointOfInterest, bounds: GeographicExtent) -> Self {
        Self {
            poi,
            bounds,
            images: Vec::new(),
            namespace: namespace.to_string(),
            created: None,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.images.len()
    }

    /// Whether the download behind this entry has drained.
    pub fn is_complete(&self) -> bool {
        self.created.is_some()
    }
}

/// Make a map name safe to use as a storage key and directory name.
pub fn sanitize_map_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct SavedMapCatalog {
    store: Arc<dyn KeyValueStore>,
    persistence: Arc<dyn TilePersistence>,
    // held across every read-modify-write of the record
    writer: Mutex<()>,
}

impl SavedMapCatalog {
    /// Open the catalog, discarding any catalog left in the old format.
    pub fn new(store: Arc<dyn KeyValueStore>, persistence: Arc<dyn TilePersistence>) -> Self {
        if store.get(SAVED_MAPS_VERSION_1).is_some() {
            log::info!("Discarding saved maps in old format");
            if let Err(e) = store.remove(SAVED_MAPS_VERSION_1) {
                log::warn!("Failed to remove {}: {}", SAVED_MAPS_VERSION_1, e);
            }
        }

        Self {
            store,
            persistence,
            writer: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All saved maps. A corrupt record is removed and treated as empty.
    pub fn list(&self) -> BTreeMap<String, SavedMapEntry> {
        let raw = match self.store.get(SAVED_MAPS) {
            Some(raw) => raw,
            None => return BTreeMap::new(),
        };

        match serde_json::from_str(&raw) {
            Ok(maps) => maps,
            Err(e) => {
                log::warn!("Saved maps record is corrupt, removing it: {}", e);
                if let Err(e) = self.store.remove(SAVED_MAPS) {
                    log::error!("Failed to remove corrupt saved maps record: {}", e);
                }
                BTreeMap::new()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<SavedMapEntry> {
        self.list().remove(name)
    }

    /// Insert or replace an entry. An empty namespace defaults to the name.
    pub fn put(&self, name: &str, entry: SavedMapEntry) -> Result<()> {
        let _guard = self.lock();
        let mut maps = self.list();
        maps.insert(name.to_string(), with_namespace(name, entry));
        self.write(&maps)
    }

    /// Insert a new entry unless the name is taken or the catalog is full.
    /// The checks and the write happen as one step.
    pub fn insert_new(&self, name: &str, entry: SavedMapEntry) -> std::result::Result<(), AdmissionError> {
        let _guard = self.lock();
        let mut maps = self.list();
        if maps.contains_key(name) {
            return Err(AdmissionError::AlreadyExists(name.to_string()));
        }
        if maps.len() >= MAX_NO_OF_SAVED_MAPS {
            return Err(AdmissionError::TooManyMaps { max: MAX_NO_OF_SAVED_MAPS });
        }

        maps.insert(name.to_string(), with_namespace(name, entry));
        if let Err(e) = self.write(&maps) {
            log::error!("Failed to record {}: {}", name, e);
        }
        Ok(())
    }

    /// Move an entry to a new key. Bounds and tiles are untouched.
    ///
    /// Returns `false` without changing anything if `new_name` is empty, is the
    /// same as `old_name`, or if `old_name` is not saved. An entry already
    /// saved under `new_name` is replaced.
    pub fn rename(&self, old_name: &str, new_name: &str) -> bool {
        let new_name = sanitize_map_name(new_name);
        if new_name.is_empty() || new_name == old_name {
            return false;
        }

        let _guard = self.lock();
        let mut maps = self.list();
        let entry = match maps.remove(old_name) {
            Some(entry) => entry,
            None => return false,
        };
        if let Some(replaced) = maps.insert(new_name.clone(), with_namespace(old_name, entry)) {
            log::warn!(
                "Rename of {} replaced {}; tiles under {} are left until the cache is cleared",
                old_name,
                new_name,
                replaced.namespace
            );
        }

        match self.write(&maps) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to rename {}: {}", old_name, e);
                false
            }
        }
    }

    /// Remove a saved map and its stored tiles. Unknown names are a no-op.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let entry = {
            let _guard = self.lock();
            let mut maps = self.list();
            let entry = match maps.remove(name) {
                Some(entry) => entry,
                None => return Ok(()),
            };
            self.write(&maps)?;
            with_namespace(name, entry)
        };

        if let Err(e) = self.persistence.remove_map(&entry.namespace).await {
            log::error!("Failed to remove tiles of {}: {}", name, e);
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.list().len()
    }

    pub fn can_save_more(&self) -> bool {
        self.count() < MAX_NO_OF_SAVED_MAPS
    }

    /// Remove every saved map and every stored tile.
    pub async fn clear(&self) -> Result<()> {
        self.persistence.clear().await?;
        let _guard = self.lock();
        self.store.remove(SAVED_MAPS)
    }

    fn write(&self, maps: &BTreeMap<String, SavedMapEntry>) -> Result<()> {
        let json = serde_json::to_string(maps)?;
        self.store.set(SAVED_MAPS, &json)
    }
}

fn with_namespace(name: &str, mut entry: SavedMapEntry) -> SavedMapEntry {
    if entry.namespace.is_empty() {
        entry.namespace = name.to_string();
    }
    entry
}
