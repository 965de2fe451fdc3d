// src/cache/persist.rs v1
//! Tile persistence strategies: canvas re-encode in memory, or file transfer to disk

use super::catalog::TileRef;
use super::queue::DownloadJob;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use image::{ImageOutputFormat, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Maximum number of tile files written to one directory.
pub const MAX_FILES_PER_DIR: usize = 100;

/// Where downloaded tile bytes end up. Selected once per controller.
#[async_trait]
pub trait TilePersistence: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store one tile for `job.target_map_name` and describe where it went.
    async fn persist(&self, job: &DownloadJob, bytes: Vec<u8>) -> Result<TileRef>;

    /// Remove every tile stored under a map's namespace. Missing namespaces are not an error.
    async fn remove_map(&self, namespace: &str) -> Result<()>;

    /// Remove every stored tile.
    async fn clear(&self) -> Result<()>;
}

type TileKey = (String, u8, u32, u32);

/// Desktop strategy: draw the tile onto a fixed size canvas, re-encode it as
/// PNG and keep it in an in-memory tile table.
pub struct CanvasPersistence {
    width: u32,
    height: u32,
    tiles: Mutex<HashMap<TileKey, Vec<u8>>>,
}

impl CanvasPersistence {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tiles: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TileKey, Vec<u8>>> {
        self.tiles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-encoded PNG for a stored tile.
    pub fn get(&self, map_name: &str, zoom: u8, x: u32, y: u32) -> Option<Vec<u8>> {
        self.lock().get(&(map_name.to_string(), zoom, x, y)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn re_encode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let tile = image::load_from_memory(bytes)?.to_rgba8();
        let mut canvas = RgbaImage::new(self.width, self.height);
        image::imageops::overlay(&mut canvas, &tile, 0, 0);

        let mut encoded = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(canvas).write_to(&mut encoded, ImageOutputFormat::Png)?;
        Ok(encoded.into_inner())
    }
}

#[async_trait]
impl TilePersistence for CanvasPersistence {
    fn name(&self) -> &'static str {
        "canvas"
    }

    async fn persist(&self, job: &DownloadJob, bytes: Vec<u8>) -> Result<TileRef> {
        let png = self.re_encode(&bytes)?;
        let key = (job.target_map_name.clone(), job.tile.zoom, job.tile.x, job.tile.y);
        // unique per (map, zoom, x, y): a repeat download replaces the row
        self.lock().insert(key, png);

        Ok(TileRef::new(
            job.tile,
            format!("canvas:{}/{}", job.target_map_name, job.tile),
        ))
    }

    async fn remove_map(&self, namespace: &str) -> Result<()> {
        self.lock().retain(|(map_name, _, _, _), _| map_name != namespace);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}

/// Mobile strategy: tiles are written straight to the persistent cache
/// directory, `{root}/{map}/{subdir}/{stack}_{zoom}_{x}_{y}.{type}`.
pub struct FileTransferPersistence {
    root: PathBuf,
}

impl FileTransferPersistence {
    /// Create (if needed) the cache directory. Failure here disables caching.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            log::error!("Failed finding root directory {}: {}", root.display(), e);
            CacheError::Directory(format!(
                "Failed to create cache directory {}: {}. Caching will be disabled.",
                root.display(),
                e
            ))
        })?;

        // keep media scanners out of the tile cache
        let marker = root.join(".nomedia");
        if !marker.exists() {
            std::fs::write(&marker, b"")?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for a job's tile.
    pub fn tile_path(&self, job: &DownloadJob) -> PathBuf {
        Self::local_file_name(&self.root, job)
    }

    fn local_file_name(root: &Path, job: &DownloadJob) -> PathBuf {
        let sub_directory = (job.sequence + MAX_FILES_PER_DIR - 1) / MAX_FILES_PER_DIR;
        let file_name = format!(
            "{}_{}_{}_{}.{}",
            job.stack, job.tile.zoom, job.tile.x, job.tile.y, job.file_type
        );
        root.join(&job.target_map_name)
            .join(sub_directory.to_string())
            .join(file_name)
    }

    /// Count and total size of tile files on disk.
    pub fn stats(&self) -> CacheStats {
        let mut disk_tiles = 0;
        let mut disk_size = 0u64;

        fn walk_dir(path: &Path, count: &mut usize, size: &mut u64) {
            if let Ok(entries) = std::fs::read_dir(path) {
                for entry in entries.flatten() {
                    if let Ok(metadata) = entry.metadata() {
                        if metadata.is_file() {
                            if entry.file_name() != ".nomedia" {
                                *count += 1;
                                *size += metadata.len();
                            }
                        } else if metadata.is_dir() {
                            walk_dir(&entry.path(), count, size);
                        }
                    }
                }
            }
        }

        walk_dir(&self.root, &mut disk_tiles, &mut disk_size);

        CacheStats {
            disk_tiles,
            disk_size_mb: disk_size as f64 / 1_048_576.0,
        }
    }
}

#[async_trait]
impl TilePersistence for FileTransferPersistence {
    fn name(&self) -> &'static str {
        "file-transfer"
    }

    async fn persist(&self, job: &DownloadJob, bytes: Vec<u8>) -> Result<TileRef> {
        let path = self.tile_path(job);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = path.with_extension(format!("{}.part", job.file_type));
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await?;

        Ok(TileRef::new(job.tile, path.to_string_lossy().into_owned()))
    }

    async fn remove_map(&self, namespace: &str) -> Result<()> {
        let dir = self.root.join(namespace);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Other(format!(
                "Remove recursively failed for {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::Directory(format!("Problem reading cache directory: {}", e)))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == ".nomedia" {
                continue;
            }
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = result {
                log::error!("Failed to delete {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub disk_tiles: usize,
    pub disk_size_mb: f64,
}
