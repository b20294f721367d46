//! Async image loading orchestrator.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{
    CacheKey, ImageRequest, ImageSource, LoadStage, LoadedImage, TargetSize,
};
use crate::domain::errors::{DecodeError, ImageError, ImageResult};
use crate::domain::ports::{DiskCachePort, FetcherPort, ImageCachePort, ImageTarget, LoadResult};

use super::decoder::{self, DEFAULT_JPEG_QUALITY, DiskFormat};
use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache};
use super::fetcher::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, HttpFetcher};
use super::key::KeyDeriver;
use super::memory_cache::{CacheStats, DEFAULT_MEMORY_FRACTION, MemoryImageCache};

/// Configuration for the image loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLoaderConfig {
    /// Memory cache budget in bytes. Derived from available memory if unset.
    pub memory_budget: Option<u64>,
    /// Share of available memory used when no budget is set (1 / fraction).
    pub memory_fraction: u64,
    /// Maximum disk cache size in bytes.
    pub disk_budget: u64,
    /// Maximum concurrent fetch tasks.
    pub max_workers: usize,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Join concurrent misses for the same key onto one fetch.
    pub coalesce_in_flight: bool,
    /// Digest used for cache keys.
    pub key_digest: String,
    /// What the disk tier stores for fetched images.
    pub disk_format: DiskFormat,
    /// JPEG quality when `disk_format` is `jpeg`.
    pub jpeg_quality: u8,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            memory_budget: None,
            memory_fraction: DEFAULT_MEMORY_FRACTION,
            disk_budget: DEFAULT_MAX_CACHE_SIZE,
            max_workers: 5,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            coalesce_in_flight: true,
            key_digest: "sha256".to_string(),
            disk_format: DiskFormat::Source,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// How a display request was resolved when [`ImageLoader::display`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    /// Already delivered from a cache tier.
    Delivered(ImageSource),
    /// Queued on the worker pool.
    Scheduled,
    /// Attached to a fetch already in flight for the same key.
    Joined,
}

/// Counters describing loader activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Requests answered from memory.
    pub memory_hits: u64,
    /// Requests answered from disk.
    pub disk_hits: u64,
    /// Network fetches performed.
    pub network_fetches: u64,
    /// Images decoded.
    pub decodes: u64,
    /// Tasks that ended in an error.
    pub failures: u64,
    /// Requests joined onto an in-flight fetch.
    pub coalesced: u64,
    /// Tasks dropped because nobody was waiting any more.
    pub abandoned: u64,
    /// Disk write-backs that failed.
    pub disk_write_failures: u64,
}

impl std::fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loader: {} memory hits, {} disk hits, {} fetches, {} decodes, {} failures",
            self.memory_hits, self.disk_hits, self.network_fetches, self.decodes, self.failures
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    network_fetches: AtomicU64,
    decodes: AtomicU64,
    failures: AtomicU64,
    coalesced: AtomicU64,
    abandoned: AtomicU64,
    disk_write_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoaderStats {
        LoaderStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            disk_write_failures: self.disk_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// A load waiting for, or running on, the worker pool.
struct InFlight {
    key: CacheKey,
    /// Queued tasks report `Fetching`.
    stage: LoadStage,
    waiters: Vec<Weak<dyn ImageTarget>>,
    /// Prefetches run even with nobody waiting.
    keep_alive: bool,
}

#[derive(Default)]
struct InFlightTable {
    tasks: HashMap<u64, InFlight>,
    by_key: HashMap<CacheKey, u64>,
    next_id: u64,
}

impl InFlightTable {
    fn join(&mut self, key: &CacheKey, waiter: Option<Weak<dyn ImageTarget>>) -> bool {
        let Some(task) = self
            .by_key
            .get(key)
            .and_then(|id| self.tasks.get_mut(id))
        else {
            return false;
        };
        match waiter {
            Some(waiter) => task.waiters.push(waiter),
            None => task.keep_alive = true,
        }
        true
    }

    fn insert(
        &mut self,
        key: CacheKey,
        waiter: Option<Weak<dyn ImageTarget>>,
        index_by_key: bool,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if index_by_key {
            self.by_key.insert(key.clone(), id);
        }
        self.tasks.insert(
            id,
            InFlight {
                key,
                keep_alive: waiter.is_none(),
                waiters: waiter.into_iter().collect(),
                stage: LoadStage::Fetching,
            },
        );
        id
    }

    fn remove(&mut self, id: u64) -> Option<InFlight> {
        let task = self.tasks.remove(&id)?;
        if self.by_key.get(&task.key) == Some(&id) {
            self.by_key.remove(&task.key);
        }
        Some(task)
    }
}

/// Unit of work handed to the worker pool.
#[derive(Debug)]
struct FetchTask {
    id: u64,
    identifier: String,
    key: CacheKey,
    target: TargetSize,
}

#[derive(Debug)]
enum LoaderCommand {
    Load(FetchTask),
}

/// State shared between the loader and its workers.
#[derive(Clone)]
struct LoaderShared {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<dyn DiskCachePort>,
    fetcher: Arc<dyn FetcherPort>,
    in_flight: Arc<Mutex<InFlightTable>>,
    counters: Arc<Counters>,
    disk_format: DiskFormat,
    jpeg_quality: u8,
}

/// Orchestrates image loading from memory, disk, and network.
///
/// Construct one per application and share it behind an `Arc`.
pub struct ImageLoader {
    shared: LoaderShared,
    keys: KeyDeriver,
    request_tx: mpsc::UnboundedSender<LoaderCommand>,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// State for the background worker loop.
struct WorkerState {
    shared: LoaderShared,
    semaphore: Arc<Semaphore>,
    request_rx: mpsc::UnboundedReceiver<LoaderCommand>,
}

impl ImageLoader {
    /// Creates a loader over the given tiers and fetcher.
    ///
    /// Must be called from within a Tokio runtime; the worker loop is
    /// spawned immediately.
    #[must_use]
    pub fn new(
        config: ImageLoaderConfig,
        memory_cache: Arc<MemoryImageCache>,
        disk_cache: Arc<dyn DiskCachePort>,
        fetcher: Arc<dyn FetcherPort>,
    ) -> Self {
        let shared = LoaderShared {
            memory_cache,
            disk_cache,
            fetcher,
            in_flight: Arc::new(Mutex::new(InFlightTable::default())),
            counters: Arc::new(Counters::default()),
            disk_format: config.disk_format,
            jpeg_quality: config.jpeg_quality,
        };

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let worker_state = WorkerState {
            shared: shared.clone(),
            semaphore: Arc::new(Semaphore::new(config.max_workers.max(1))),
            request_rx,
        };
        tokio::spawn(Self::run_worker_loop(worker_state));

        Self {
            shared,
            keys: KeyDeriver::from_name(&config.key_digest),
            request_tx,
            config,
        }
    }

    /// Opens the disk cache under `storage_root` and builds an HTTP loader.
    ///
    /// # Errors
    /// Returns [`ImageError::StorageUnavailable`] if the storage root cannot
    /// be created or written, or an error if the HTTP client cannot be built.
    pub async fn open(config: ImageLoaderConfig, storage_root: PathBuf) -> ImageResult<Self> {
        let disk_cache = Arc::new(DiskImageCache::open(storage_root, config.disk_budget).await?);
        let fetcher = Arc::new(HttpFetcher::new(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )?);
        let memory_cache = Arc::new(config.memory_budget.map_or_else(
            || MemoryImageCache::with_system_budget(config.memory_fraction),
            MemoryImageCache::new,
        ));
        info!(
            memory_budget = memory_cache.capacity(),
            disk_budget = config.disk_budget,
            workers = config.max_workers,
            "Image loader ready"
        );
        Ok(Self::new(config, memory_cache, disk_cache, fetcher))
    }

    /// Worker loop to handle download requests and throttling.
    ///
    /// The most recent request is started first, so images that just
    /// scrolled into view win over older queued ones.
    async fn run_worker_loop(mut state: WorkerState) {
        let mut queue: VecDeque<FetchTask> = VecDeque::new();
        let mut closed = false;

        loop {
            if closed && queue.is_empty() {
                break;
            }
            tokio::select! {
                cmd = state.request_rx.recv(), if !closed => {
                    match cmd {
                        Some(LoaderCommand::Load(task)) => queue.push_front(task),
                        None => closed = true,
                    }
                }
                Ok(permit) = state.semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                    if let Some(task) = queue.pop_front() {
                        let shared = state.shared.clone();
                        tokio::spawn(async move {
                            let (id, key) = (task.id, task.key.clone());
                            let worker = shared.clone();
                            let outcome = tokio::spawn(async move { worker.run_task(task).await }).await;
                            if let Err(e) = outcome {
                                error!(key = %key, error = %e, "Image load task aborted");
                                shared.finish(
                                    id,
                                    &key,
                                    Err(ImageError::unavailable(format!("Image load task aborted: {e}"))),
                                );
                            }
                            drop(permit);
                        });
                    }
                }
            }
        }
        trace!("Image loader worker loop stopped");
    }

    /// Derives the cache key for an identifier.
    #[must_use]
    pub fn key_for(&self, identifier: &str) -> CacheKey {
        self.keys.derive(identifier)
    }

    /// Requests an image for display.
    ///
    /// Memory and disk are checked on the calling task; a hit is delivered to
    /// `target` before this returns. A miss is queued on the worker pool and
    /// delivered later. `target` is held weakly: if the caller drops it first,
    /// the result is discarded. The target is invoked exactly once otherwise.
    pub async fn display(
        &self,
        request: ImageRequest,
        target: &Arc<dyn ImageTarget>,
    ) -> DisplayStatus {
        let key = self.keys.derive(&request.identifier);

        if let Some(image) = self.shared.memory_cache.get(&key) {
            Counters::bump(&self.shared.counters.memory_hits);
            trace!(key = %key, "Resolved from memory");
            let loaded = LoadedImage {
                key: key.clone(),
                image,
                source: ImageSource::MemoryCache,
            };
            target.deliver(&key, Ok(loaded));
            return DisplayStatus::Delivered(ImageSource::MemoryCache);
        }

        if let Some(loaded) = self.shared.load_from_disk(&key, request.target).await {
            target.deliver(&key, Ok(loaded));
            return DisplayStatus::Delivered(ImageSource::DiskCache);
        }

        self.schedule(request, key, Some(Arc::downgrade(target)))
    }

    /// Loads an image, waiting for the result.
    ///
    /// # Errors
    /// Returns the fetch or decode error for the request.
    pub async fn load(&self, request: ImageRequest) -> ImageResult<LoadedImage> {
        let (tx, rx) = oneshot::channel::<LoadResult>();
        let slot = Mutex::new(Some(tx));
        let target: Arc<dyn ImageTarget> = Arc::new(move |_: &CacheKey, result: LoadResult| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(result);
            }
        });

        self.display(request, &target).await;
        let result = rx
            .await
            .map_err(|_| ImageError::unavailable("Loader stopped before delivering a result"));
        drop(target);
        result?
    }

    /// Warms both tiers for `identifier` without a delivery target.
    pub async fn prefetch(&self, identifier: impl Into<String>, target: TargetSize) {
        let identifier = identifier.into();
        let key = self.keys.derive(&identifier);
        if self.shared.memory_cache.contains(&key) || self.shared.disk_cache.contains(&key).await {
            trace!(key = %key, "Prefetch skipped, already cached");
            return;
        }
        self.schedule(ImageRequest { identifier, target }, key, None);
    }

    fn schedule(
        &self,
        request: ImageRequest,
        key: CacheKey,
        waiter: Option<Weak<dyn ImageTarget>>,
    ) -> DisplayStatus {
        let coalesce = self.config.coalesce_in_flight;
        let id = {
            let mut table = self.shared.in_flight.lock();
            if coalesce && table.join(&key, waiter.clone()) {
                Counters::bump(&self.shared.counters.coalesced);
                debug!(key = %key, "Joined in-flight load");
                return DisplayStatus::Joined;
            }
            table.insert(key.clone(), waiter, coalesce)
        };

        let task = FetchTask {
            id,
            identifier: request.identifier,
            key,
            target: request.target,
        };
        if let Err(e) = self.request_tx.send(LoaderCommand::Load(task)) {
            error!("Failed to send load request: {}", e);
            let LoaderCommand::Load(task) = e.0;
            self.shared.finish(
                task.id,
                &task.key,
                Err(ImageError::unavailable("Image loader worker stopped")),
            );
        }
        DisplayStatus::Scheduled
    }

    /// Returns the stage of an in-flight load for `identifier`.
    #[must_use]
    pub fn stage(&self, identifier: &str) -> Option<LoadStage> {
        let key = self.keys.derive(identifier);
        let table = self.shared.in_flight.lock();
        table
            .tasks
            .values()
            .find(|task| task.key == key)
            .map(|task| task.stage)
    }

    /// Returns true if an image is currently loading.
    #[must_use]
    pub fn is_loading(&self, identifier: &str) -> bool {
        self.stage(identifier).is_some_and(LoadStage::is_in_flight)
    }

    /// Returns the number of queued or running loads.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.in_flight.lock().tasks.len()
    }

    /// Returns loader activity counters.
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        self.shared.counters.snapshot()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.shared.memory_cache.stats()
    }

    /// Makes the disk tier durable.
    ///
    /// # Errors
    /// Returns [`ImageError::StorageUnavailable`] if the journal cannot be synced.
    pub async fn flush(&self) -> ImageResult<()> {
        self.shared.disk_cache.flush().await
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.shared.memory_cache.clear();
        if let Err(e) = self.shared.disk_cache.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }
}

impl LoaderShared {
    /// Decodes a disk hit and promotes it into memory.
    ///
    /// Undecodable bytes are removed from disk and reported as a miss.
    async fn load_from_disk(&self, key: &CacheKey, target: TargetSize) -> Option<LoadedImage> {
        let bytes = self.disk_cache.get(key).await?;

        let max_alloc = self.memory_cache.capacity();
        let result = tokio::task::spawn_blocking(move || {
            decoder::decode_to_fit(&bytes, target, max_alloc)
        })
        .await;

        match result {
            Ok(Ok(img)) => {
                Counters::bump(&self.counters.disk_hits);
                Counters::bump(&self.counters.decodes);
                debug!(key = %key, "Decoded image from disk cache");
                let image = Arc::new(img);
                self.memory_cache.put(key.clone(), image.clone());
                Some(LoadedImage {
                    key: key.clone(),
                    image,
                    source: ImageSource::DiskCache,
                })
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to decode cached image, refetching");
                self.disk_cache.remove(key).await;
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                None
            }
        }
    }

    fn set_stage(&self, id: u64, stage: LoadStage) {
        if let Some(task) = self.in_flight.lock().tasks.get_mut(&id) {
            trace!(key = %task.key, stage = %stage, "Load stage changed");
            task.stage = stage;
        }
    }

    fn is_wanted(&self, id: u64) -> bool {
        self.in_flight.lock().tasks.get(&id).is_some_and(|task| {
            task.keep_alive || task.waiters.iter().any(|w| w.strong_count() > 0)
        })
    }

    async fn run_task(&self, task: FetchTask) {
        if !self.is_wanted(task.id) {
            Counters::bump(&self.counters.abandoned);
            self.in_flight.lock().remove(task.id);
            debug!(key = %task.key, "Abandoned load, no live targets");
            return;
        }

        let result = self.fetch_and_commit(&task).await;
        self.finish(task.id, &task.key, result);
    }

    async fn fetch_and_commit(&self, task: &FetchTask) -> LoadResult {
        let bytes = self.fetcher.fetch(&task.identifier).await?;
        Counters::bump(&self.counters.network_fetches);

        self.set_stage(task.id, LoadStage::Decoding);
        let (format, quality, target) = (self.disk_format, self.jpeg_quality, task.target);
        let max_alloc = self.memory_cache.capacity();
        let bytes_for_decode = bytes.clone();
        let (decoded, encoded) = tokio::task::spawn_blocking(
            move || -> Result<(image::DynamicImage, Result<Option<Vec<u8>>, DecodeError>), DecodeError> {
                let img = decoder::decode_to_fit(&bytes_for_decode, target, max_alloc)?;
                let encoded = decoder::encode_for_disk(&img, format, quality);
                Ok((img, encoded))
            },
        )
        .await
        .map_err(|e| ImageError::corrupt(format!("Decode task panicked: {e}")))??;
        Counters::bump(&self.counters.decodes);

        self.set_stage(task.id, LoadStage::Committing);
        let image = Arc::new(decoded);
        self.memory_cache.put(task.key.clone(), image.clone());

        let disk_bytes = match encoded {
            Ok(Some(reencoded)) => Some(Bytes::from(reencoded)),
            Ok(None) => Some(bytes),
            Err(e) => {
                warn!(key = %task.key, error = %e, "Failed to encode image for disk");
                None
            }
        };
        if let Some(disk_bytes) = disk_bytes
            && let Err(e) = self.disk_cache.put(&task.key, &disk_bytes).await
        {
            Counters::bump(&self.counters.disk_write_failures);
            warn!(key = %task.key, error = %e, "Failed to cache to disk");
        }

        debug!(key = %task.key, source = "network", "Image loaded successfully");
        Ok(LoadedImage {
            key: task.key.clone(),
            image,
            source: ImageSource::Network,
        })
    }

    /// Retires a task and delivers `result` to every live waiter.
    fn finish(&self, id: u64, key: &CacheKey, result: LoadResult) {
        let Some(mut task) = self.in_flight.lock().remove(id) else {
            return;
        };
        task.stage = if result.is_ok() {
            LoadStage::Done
        } else {
            LoadStage::Failed
        };
        if let Err(e) = &result {
            Counters::bump(&self.counters.failures);
            debug!(key = %key, error = %e, "Image load failed");
        }

        for waiter in task.waiters {
            match waiter.upgrade() {
                Some(target) => target.deliver(key, result.clone()),
                None => trace!(key = %key, "Target dropped, discarding result"),
            }
        }
        trace!(key = %key, stage = %task.stage, "Load finished");
    }
}
