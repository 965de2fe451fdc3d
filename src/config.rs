// src/config.rs v3
//! Configuration management with platform-specific storage

use crate::cache::queue::DOWNLOAD_THREADS;
use crate::error::{CacheError, Result};
use crate::map::capabilities::StackType;
use crate::map::view::base_map_full_url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How downloaded tiles are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceKind {
    /// Re-encode each tile on a canvas and keep it in memory.
    Canvas,
    /// Write tile bytes to the cache directory.
    FileTransfer,
}

impl PersistenceKind {
    /// Whether saved tiles outlive the process. Only durable strategies can
    /// back a catalog entry across runs.
    pub fn is_durable(&self) -> bool {
        matches!(self, PersistenceKind::FileTransfer)
    }
}

impl fmt::Display for PersistenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceKind::Canvas => write!(f, "canvas"),
            PersistenceKind::FileTransfer => write!(f, "file-transfer"),
        }
    }
}

impl FromStr for PersistenceKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "canvas" => Ok(PersistenceKind::Canvas),
            "file-transfer" | "file" => Ok(PersistenceKind::FileTransfer),
            other => Err(CacheError::Config(format!("Unknown persistence: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub map_server_url: String,
    pub tms_path: String,
    pub service_version: String,
    pub layer_name: String,
    pub stack: StackType,
    pub file_type: String,
    /// Root for the tile cache directory and the catalog store.
    pub data_dir: PathBuf,
    pub persistence: PersistenceKind,
    pub download_threads: usize,
    pub tile_timeout_secs: u64,
    pub capabilities_timeout_secs: u64,
    pub app_version: String,
    /// Sent with tile requests for usage logging when set.
    pub user_id: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl CacheConfig {
    /// Get platform-specific default configuration
    pub fn platform_default() -> Self {
        Self {
            map_server_url: "http://fieldtripgb.edina.ac.uk".to_string(),
            tms_path: "/mapcache/tms".to_string(),
            service_version: "1.0.0".to_string(),
            layer_name: "fieldtripgb@BNG".to_string(),
            stack: StackType::Open,
            file_type: "jpg".to_string(),
            data_dir: default_data_dir(),
            persistence: PersistenceKind::FileTransfer,
            download_threads: DOWNLOAD_THREADS,
            tile_timeout_secs: 30,
            capabilities_timeout_secs: 10,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            user_id: None,
        }
    }

    /// Load configuration from the default location, or defaults if there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::platform_default());
        }

        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| CacheError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CacheError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| CacheError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(config_path, contents)
            .map_err(|e| CacheError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        #[cfg(windows)]
        let base = std::env::var("APPDATA")
            .map(PathBuf::from)
            .map_err(|_| CacheError::Config("APPDATA environment variable not set".to_string()))?;

        #[cfg(not(windows))]
        let base = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".config"))
            .map_err(|_| CacheError::Config("HOME environment variable not set".to_string()))?;

        Ok(base.join("fieldtrip-cache").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.download_threads == 0 {
            return Err(CacheError::Config("download_threads must be at least 1".to_string()));
        }
        if self.file_type.trim_matches('.').is_empty() {
            return Err(CacheError::Config("file_type must not be empty".to_string()));
        }
        if self.map_server_url.is_empty() {
            return Err(CacheError::Config("map_server_url must not be empty".to_string()));
        }
        Ok(())
    }

    /// Directory tiles are written to by file transfer persistence.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("mapcache")
    }

    /// File backing the saved map catalog.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }

    /// `{server}{tms_path}/{version}/{layer}/`, also where capabilities are read from.
    pub fn base_map_full_url(&self) -> String {
        base_map_full_url(&self.map_server_url, &self.tms_path, &self.service_version, &self.layer_name)
    }

    /// Update tile server settings
    pub fn update_server(&mut self, url: String, layer: Option<String>) {
        self.map_server_url = url;
        if let Some(layer) = layer {
            self.layer_name = layer;
        }
    }

    pub fn update_persistence(&mut self, persistence: PersistenceKind) {
        self.persistence = persistence;
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(windows)]
    let base = std::env::var("LOCALAPPDATA").map(PathBuf::from);

    #[cfg(not(windows))]
    let base = std::env::var("HOME").map(|home| PathBuf::from(home).join(".local").join("share"));

    base.unwrap_or_else(|_| std::env::temp_dir()).join("fieldtrip-cache")
}
