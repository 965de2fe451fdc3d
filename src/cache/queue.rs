// src/cache/queue.rs v2
//! Bounded concurrent tile download queue
//!
//! A save operation turns its tile ranges into a backlog of [`DownloadJob`]s.
//! A fixed number of workers pop jobs until the backlog is empty; each job is
//! fetched, handed to the persistence strategy and then counted as complete,
//! whether it succeeded or not. Failed tiles are not retried.

use super::catalog::TileRef;
use super::fetch::TileFetcher;
use super::persist::TilePersistence;
use crate::map::capabilities::StackType;
use crate::map::view::tile_url;
use crate::tiles::{GeographicExtent, TileCoordinate, TileCoordinateMapper};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;

/// Default number of concurrent downloads.
pub const DOWNLOAD_THREADS: usize = 8;

/// One tile to download for a saved map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub tile: TileCoordinate,
    pub source_url: String,
    pub target_map_name: String,
    pub file_type: String,
    pub stack: StackType,
    /// 1-based position in the backlog.
    pub sequence: usize,
}

/// Lifecycle of a job: `Pending -> InFlight -> Persisted | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Persisted,
    Failed,
}

/// Final result of one job.
#[derive(Debug, Clone)]
pub struct TileOutcome {
    pub job: DownloadJob,
    pub result: std::result::Result<TileRef, String>,
}

impl TileOutcome {
    pub fn state(&self) -> JobState {
        match self.result {
            Ok(_) => JobState::Persisted,
            Err(_) => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

impl SaveProgress {
    pub fn new(completed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u8
        };
        Self { completed, total, percent }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Called after every tile completion, in completion order. The callback runs
/// while later completions wait, so it should return quickly.
pub type ProgressCallback = Arc<dyn Fn(SaveProgress) + Send + Sync>;

/// Everything needed to turn an extent into download jobs.
pub struct BacklogRequest<'a> {
    pub mapper: &'a TileCoordinateMapper,
    pub extent: &'a GeographicExtent,
    pub zoom_min: u8,
    pub zoom_max: u8,
    pub base_url: &'a str,
    pub file_type: &'a str,
    pub map_name: &'a str,
}

/// Jobs for every tile of every zoom level in the request, in zoom, x, y order.
pub fn build_backlog(request: &BacklogRequest<'_>) -> Vec<DownloadJob> {
    let stack = request.mapper.capabilities().stack;
    let mut jobs = Vec::new();

    for zoom in request.zoom_min..=request.zoom_max {
        let range = match request.mapper.tile_range_for_extent(request.extent, zoom) {
            Some(range) => range,
            None => continue,
        };

        for tile in range.tiles() {
            jobs.push(DownloadJob {
                tile,
                source_url: tile_url(request.base_url, tile, request.file_type),
                target_map_name: request.map_name.to_string(),
                file_type: request.file_type.to_string(),
                stack,
                sequence: jobs.len() + 1,
            });
        }
    }

    jobs
}

/// Counters observed by callers while the queue runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub persisted: usize,
    pub failed: usize,
    pub completed: usize,
    pub total: usize,
}

impl QueueSnapshot {
    /// Number of jobs currently in `state`.
    pub fn count(&self, state: JobState) -> usize {
        match state {
            JobState::Pending => self.pending,
            JobState::InFlight => self.in_flight,
            JobState::Persisted => self.persisted,
            JobState::Failed => self.failed,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    backlog: Vec<DownloadJob>,
    started: usize,
    completed: usize,
    persisted: usize,
    outcomes: Vec<TileOutcome>,
}

/// Result of draining a queue.
#[derive(Debug, Clone)]
pub struct QueueReport {
    pub total: usize,
    pub completed: usize,
    pub outcomes: Vec<TileOutcome>,
}

impl QueueReport {
    /// Every job has been accounted for.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    pub fn persisted(&self) -> Vec<TileRef> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TileOutcome> {
        self.outcomes.iter().filter(|o| o.state() == JobState::Failed)
    }
}

pub struct TileDownloadQueue {
    state: Mutex<QueueState>,
    // serialises completion and its progress report
    report_order: Mutex<()>,
    total: usize,
    workers: usize,
}

impl TileDownloadQueue {
    /// Queue over `jobs` drained by `workers` concurrent workers (at least one).
    pub fn new(jobs: Vec<DownloadJob>, workers: usize) -> Self {
        let total = jobs.len();
        Self {
            state: Mutex::new(QueueState {
                backlog: jobs,
                ..Default::default()
            }),
            report_order: Mutex::new(()),
            total,
            workers: workers.max(1),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            pending: state.backlog.len(),
            in_flight: state.started - state.completed,
            persisted: state.persisted,
            failed: state.completed - state.persisted,
            completed: state.completed,
            total: self.total,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the next job. Popping under the lock is the only hand-off between
    /// workers, so a job can never be taken twice.
    fn next_job(&self) -> Option<DownloadJob> {
        let mut state = self.lock();
        let job = state.backlog.pop()?;
        state.started += 1;
        Some(job)
    }

    fn complete(&self, outcome: TileOutcome) -> SaveProgress {
        let mut state = self.lock();
        state.completed += 1;
        if outcome.state() == JobState::Persisted {
            state.persisted += 1;
        }
        state.outcomes.push(outcome);
        SaveProgress::new(state.completed, self.total)
    }

    /// Record a finished job and report progress. Reports reach the callback
    /// in the same order the completions were counted.
    fn complete_and_report(&self, outcome: TileOutcome, progress: Option<&ProgressCallback>) {
        let _order = self.report_order.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let update = self.complete(outcome);
        if let Some(callback) = progress {
            callback(update);
        }
    }

    /// Drain the backlog with a fixed pool of workers and wait for all of them.
    pub async fn run(
        self: Arc<Self>,
        fetcher: Arc<dyn TileFetcher>,
        persistence: Arc<dyn TilePersistence>,
        progress: Option<ProgressCallback>,
    ) -> QueueReport {
        let mut workers = JoinSet::new();

        for id in 0..self.workers {
            let queue = Arc::clone(&self);
            let fetcher = Arc::clone(&fetcher);
            let persistence = Arc::clone(&persistence);
            let progress = progress.clone();

            workers.spawn(async move {
                while let Some(job) = queue.next_job() {
                    log::debug!("worker {} downloading {}", id, job.tile);
                    let outcome = process(job, fetcher.as_ref(), persistence.as_ref()).await;
                    queue.complete_and_report(outcome, progress.as_ref());
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Download worker stopped unexpectedly: {}", e);
            }
        }

        let (completed, outcomes) = {
            let mut state = self.lock();
            (state.completed, std::mem::take(&mut state.outcomes))
        };

        QueueReport {
            total: self.total,
            completed,
            outcomes,
        }
    }
}

async fn process(job: DownloadJob, fetcher: &dyn TileFetcher, persistence: &dyn TilePersistence) -> TileOutcome {
    let result = match fetcher.fetch(&job.source_url).await {
        Ok(bytes) => persistence.persist(&job, bytes).await.map_err(|e| {
            log::warn!("Failed to store tile {} of {}: {}", job.tile, job.target_map_name, e);
            e.to_string()
        }),
        Err(e) => {
            log::warn!("download error source {}: {}", job.source_url, e);
            Err(e.to_string())
        }
    };

    TileOutcome { job, result }
}
