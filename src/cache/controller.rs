// src/cache/controller.rs v1
//! Entry point for saving, listing and removing offline maps
//!
//! `save_map` is admitted or refused synchronously. An admitted save runs in
//! the background on its own [`TileDownloadQueue`]; the catalog entry is
//! finalised only once every job has been accounted for.

use super::catalog::{sanitize_map_name, PointOfInterest, SavedMapCatalog, SavedMapEntry};
use super::fetch::TileFetcher;
use super::persist::TilePersistence;
use super::queue::{
    build_backlog, BacklogRequest, ProgressCallback, SaveProgress, TileDownloadQueue, TileOutcome, DOWNLOAD_THREADS,
};
use super::store::KeyValueStore;
use crate::error::{AdmissionError, CacheError, Result};
use crate::map::view::MapView;
use crate::tiles::{DownloadSizeEstimator, SaveStats, TileCoordinateMapper, MAX_CACHE};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct CacheController {
    view: Arc<dyn MapView>,
    catalog: Arc<SavedMapCatalog>,
    persistence: Arc<dyn TilePersistence>,
    fetcher: Arc<dyn TileFetcher>,
    download_threads: usize,
    progress: Option<ProgressCallback>,
}

impl CacheController {
    pub fn new(
        view: Arc<dyn MapView>,
        store: Arc<dyn KeyValueStore>,
        persistence: Arc<dyn TilePersistence>,
        fetcher: Arc<dyn TileFetcher>,
    ) -> Self {
        log::info!("Tile cache using {} persistence", persistence.name());
        let catalog = Arc::new(SavedMapCatalog::new(store, Arc::clone(&persistence)));

        Self {
            view,
            catalog,
            persistence,
            fetcher,
            download_threads: DOWNLOAD_THREADS,
            progress: None,
        }
    }

    pub fn with_download_threads(mut self, threads: usize) -> Self {
        self.download_threads = threads.max(1);
        self
    }

    /// Callback invoked after every tile of every save completes.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn catalog(&self) -> &SavedMapCatalog {
        &self.catalog
    }

    fn estimator(&self) -> DownloadSizeEstimator {
        DownloadSizeEstimator::new(TileCoordinateMapper::new(self.view.capabilities()))
    }

    /// Tiles needed to cache the current extent between two zoom levels.
    pub fn total_number_of_tiles_to_download(&self, zoom_min: u8, zoom_max: u8) -> u64 {
        let (zoom_min, zoom_max) = ordered(zoom_min, zoom_max);
        self.estimator()
            .estimate_tile_count(self.view.extent().as_ref(), zoom_min, zoom_max)
    }

    pub fn save_stats(&self, zoom_min: u8, zoom_max: u8) -> SaveStats {
        let (zoom_min, zoom_max) = ordered(zoom_min, zoom_max);
        self.estimator()
            .save_stats(self.view.extent().as_ref(), zoom_min, zoom_max)
    }

    /// Admit a save of the current extent and start downloading in the background.
    ///
    /// Refusals have no side effects: nothing is fetched and the catalog is not
    /// touched. Must be called from within a Tokio runtime.
    pub fn save_map(&self, name: &str, zoom_min: u8, zoom_max: u8) -> std::result::Result<SaveHandle, AdmissionError> {
        let name = sanitize_map_name(name);
        let (zoom_min, zoom_max) = ordered(zoom_min, zoom_max);

        let extent = self.view.extent().ok_or(AdmissionError::NoExtent)?;
        let mapper = TileCoordinateMapper::new(self.view.capabilities());

        let tile_count = DownloadSizeEstimator::new(mapper.clone()).estimate_tile_count(Some(&extent), zoom_min, zoom_max);
        let bytes = DownloadSizeEstimator::estimate_bytes(tile_count);
        if DownloadSizeEstimator::exceeds_cap(bytes) {
            log::warn!("Refusing to save {}: {} tiles, {} bytes", name, tile_count, bytes);
            return Err(AdmissionError::TooLarge { bytes, max: MAX_CACHE });
        }

        let poi = PointOfInterest {
            centre: self.view.centre(),
            zoom: self.view.zoom(),
        };
        let entry = SavedMapEntry::provisional(&name, poi, extent);
        self.catalog.insert_new(&name, entry.clone())?;

        let base_url = self.view.base_map_full_url();
        let file_type = self.view.tile_file_type();
        let jobs = build_backlog(&BacklogRequest {
            mapper: &mapper,
            extent: &extent,
            zoom_min,
            zoom_max,
            base_url: &base_url,
            file_type: &file_type,
            map_name: &name,
        });

        let total = jobs.len();
        log::info!("Saving {} ({} tiles, zoom {}..={})", name, total, zoom_min, zoom_max);

        let queue = Arc::new(TileDownloadQueue::new(jobs, self.download_threads));
        let task = tokio::spawn(drain(
            Arc::clone(&queue),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.persistence),
            self.progress.clone(),
            Arc::clone(&self.catalog),
            name.clone(),
            entry,
        ));

        Ok(SaveHandle { name, total, queue, task })
    }

    pub fn get_saved_maps(&self) -> BTreeMap<String, SavedMapEntry> {
        self.catalog.list()
    }

    pub fn get_saved_map_details(&self, name: &str) -> Option<SavedMapEntry> {
        self.catalog.get(name)
    }

    pub fn rename_saved_map(&self, old_name: &str, new_name: &str) -> bool {
        self.catalog.rename(old_name, new_name)
    }

    pub async fn delete_saved_map_details(&self, name: &str) -> Result<()> {
        self.catalog.delete(name).await
    }

    pub fn get_saved_maps_count(&self) -> usize {
        self.catalog.count()
    }

    pub fn can_save_more(&self) -> bool {
        self.catalog.can_save_more()
    }

    /// Drop every saved map and every stored tile.
    pub async fn clear_cache(&self) -> Result<()> {
        self.catalog.clear().await
    }
}

fn ordered(a: u8, b: u8) -> (u8, u8) {
    (a.min(b), a.max(b))
}

async fn drain(
    queue: Arc<TileDownloadQueue>,
    fetcher: Arc<dyn TileFetcher>,
    persistence: Arc<dyn TilePersistence>,
    progress: Option<ProgressCallback>,
    catalog: Arc<SavedMapCatalog>,
    name: String,
    mut entry: SavedMapEntry,
) -> Result<SaveReport> {
    let report = queue.run(fetcher, persistence, progress).await;

    if !report.is_complete() {
        log::error!(
            "Download of {} stopped at {} of {} tiles, not saving",
            name,
            report.completed,
            report.total
        );
        return Ok(SaveReport {
            name,
            total: report.total,
            outcomes: report.outcomes,
            entry: None,
        });
    }

    entry.images = report.persisted();
    entry.created = Some(Utc::now());

    let failed = report.failures().count();
    if failed > 0 {
        log::warn!("{}: {} of {} tiles failed to download", name, failed, report.total);
    }
    log::info!("Saved {} with {} tiles", name, entry.images.len());

    catalog.put(&name, entry.clone())?;

    Ok(SaveReport {
        name,
        total: report.total,
        outcomes: report.outcomes,
        entry: Some(entry),
    })
}

/// A save that has been admitted and is downloading.
pub struct SaveHandle {
    name: String,
    total: usize,
    queue: Arc<TileDownloadQueue>,
    task: JoinHandle<Result<SaveReport>>,
}

impl SaveHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn progress(&self) -> SaveProgress {
        let snapshot = self.queue.snapshot();
        SaveProgress::new(snapshot.completed, snapshot.total)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the queue to drain and the catalog entry to be written.
    pub async fn wait(self) -> Result<SaveReport> {
        self.task
            .await
            .map_err(|e| CacheError::Other(format!("Save of {} did not finish: {}", self.name, e)))?
    }
}

/// Outcome of a finished save.
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub name: String,
    pub total: usize,
    /// One outcome per tile, successful or not.
    pub outcomes: Vec<TileOutcome>,
    /// The final catalog entry, written only when every tile was accounted for.
    pub entry: Option<SavedMapEntry>,
}

impl SaveReport {
    pub fn persisted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.persisted_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::catalog::TileRef;
    use crate::cache::queue::DownloadJob;
    use crate::cache::store::MemoryStore;
    use crate::map::capabilities::{StackType, TileServiceCapabilities};
    use crate::map::view::StaticMapView;
    use crate::tiles::GeographicExtent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Fetcher that blocks until permits are released.
    struct GatedFetcher {
        gate: Semaphore,
        calls: AtomicUsize,
    }

    impl GatedFetcher {
        fn open() -> Self {
            Self {
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
                calls: AtomicUsize::new(0),
            }
        }

        fn closed() -> Self {
            Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TileFetcher for GatedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| CacheError::Other(e.to_string()))?;
            Ok(url.as_bytes().to_vec())
        }
    }

    struct EchoPersistence;

    #[async_trait]
    impl TilePersistence for EchoPersistence {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn persist(&self, job: &DownloadJob, _bytes: Vec<u8>) -> Result<TileRef> {
            Ok(TileRef::new(job.tile, job.source_url.clone()))
        }

        async fn remove_map(&self, _namespace: &str) -> Result<()> {
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn unit_caps() -> TileServiceCapabilities {
        let mut caps = TileServiceCapabilities::defaults(StackType::Open);
        caps.units_per_pixel_by_zoom = [(0u8, 1.0)].into_iter().collect();
        caps
    }

    fn controller(view: StaticMapView, fetcher: Arc<GatedFetcher>) -> CacheController {
        CacheController::new(
            Arc::new(view),
            Arc::new(MemoryStore::new()),
            Arc::new(EchoPersistence),
            fetcher,
        )
    }

    #[tokio::test]
    async fn test_oversized_save_is_refused_without_side_effects() {
        let view = StaticMapView::new(TileServiceCapabilities::defaults(StackType::Open), "http://host/", "jpg")
            .with_extent(GeographicExtent::new(0.0, 0.0, 700_000.0, 700_000.0));
        let fetcher = Arc::new(GatedFetcher::open());
        let cache = controller(view, fetcher.clone());

        assert!(!cache.save_stats(0, 10).allowed);
        let refused = cache.save_map("Scotland", 0, 10);
        assert!(matches!(refused, Err(AdmissionError::TooLarge { max: MAX_CACHE, .. })));
        assert!(cache.get_saved_maps().is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extent_beyond_tile_grid_is_refused() {
        let edge = (1u64 << 32) as f64 * 256.0 - 1.0;
        for extent in [
            GeographicExtent::new(0.0, 0.0, edge, edge),
            GeographicExtent::new(0.0, 0.0, 1e300, 1e300),
            GeographicExtent::new(0.0, 0.0, f64::INFINITY, 1.0),
        ] {
            let view = StaticMapView::new(unit_caps(), "http://host/", "jpg").with_extent(extent);
            let fetcher = Arc::new(GatedFetcher::open());
            let cache = controller(view, fetcher.clone());

            assert_eq!(cache.total_number_of_tiles_to_download(0, 0), u64::MAX);
            assert!(matches!(cache.save_map("huge", 0, 0), Err(AdmissionError::TooLarge { .. })));
            assert!(cache.get_saved_maps().is_empty());
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_no_extent_is_refused() {
        let view = StaticMapView::new(unit_caps(), "http://host/", "jpg");
        let cache = controller(view, Arc::new(GatedFetcher::open()));
        assert_eq!(cache.total_number_of_tiles_to_download(0, 0), 0);
        assert!(matches!(cache.save_map("x", 0, 0), Err(AdmissionError::NoExtent)));
    }

    #[tokio::test]
    async fn test_entry_finalised_only_after_drain() {
        let view = StaticMapView::new(unit_caps(), "http://host/", "jpg")
            .with_extent(GeographicExtent::new(0.0, 0.0, 512.0, 512.0));
        let fetcher = Arc::new(GatedFetcher::closed());
        let cache = controller(view, fetcher.clone());
        assert_eq!(cache.total_number_of_tiles_to_download(0, 0), 9);

        let handle = cache.save_map("Edinburgh", 0, 0).unwrap();
        assert_eq!(handle.total(), 9);

        let provisional = cache.get_saved_map_details("Edinburgh").unwrap();
        assert!(!provisional.is_complete());
        assert!(provisional.images.is_empty());
        assert!(matches!(
            cache.save_map("Edinburgh", 0, 0),
            Err(AdmissionError::AlreadyExists(_))
        ));

        fetcher.gate.add_permits(16);
        let report = handle.wait().await.unwrap();
        assert_eq!(report.persisted_count(), 9);
        assert_eq!(report.failed_count(), 0);

        let saved = cache.get_saved_map_details("Edinburgh").unwrap();
        assert!(saved.is_complete());
        assert_eq!(saved.images.len(), 9);
        assert_eq!(saved.bounds, GeographicExtent::new(0.0, 0.0, 512.0, 512.0));
        assert_eq!(report.entry.map(|e| e.images), Some(saved.images));
    }

    #[tokio::test]
    async fn test_saved_map_limit() {
        let view = StaticMapView::new(unit_caps(), "http://host/", "jpg")
            .with_extent(GeographicExtent::new(0.0, 0.0, 10.0, 10.0));
        let cache = controller(view, Arc::new(GatedFetcher::open()));

        for name in ["a", "b", "c"] {
            cache.save_map(name, 0, 0).unwrap().wait().await.unwrap();
        }
        assert_eq!(cache.get_saved_maps_count(), 3);
        assert!(!cache.can_save_more());
        assert!(matches!(
            cache.save_map("d", 0, 0),
            Err(AdmissionError::TooManyMaps { max: 3 })
        ));

        cache.delete_saved_map_details("a").await.unwrap();
        assert!(cache.can_save_more());

        cache.clear_cache().await.unwrap();
        assert_eq!(cache.get_saved_maps_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_callback_reaches_100() {
        let view = StaticMapView::new(unit_caps(), "http://host/", "jpg")
            .with_extent(GeographicExtent::new(0.0, 0.0, 512.0, 512.0));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cache = controller(view, Arc::new(GatedFetcher::open()))
            .with_download_threads(2)
            .with_progress(Arc::new(move |p: SaveProgress| sink.lock().unwrap().push(p.percent)));

        let handle = cache.save_map("Edinburgh", 0, 0).unwrap();
        handle.wait().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 9);
        assert_eq!(*seen.last().unwrap(), 100);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
