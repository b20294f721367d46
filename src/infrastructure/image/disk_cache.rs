//! Disk-based image cache for persistence across sessions.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::journal::{self, Journal, JournalRecord};
use crate::domain::entities::CacheKey;
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::DiskCachePort;
use crate::infrastructure::config::project_dirs;

/// Maximum disk cache size in bytes (10 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 10 * 1024 * 1024;

const DATA_EXTENSION: &str = "img";
const STAGING_EXTENSION: &str = "tmp";

/// Redundant journal lines tolerated before the journal is compacted.
const COMPACT_THRESHOLD: usize = 2000;

struct DiskState {
    index: LruCache<CacheKey, u64>,
    total_size: u64,
    next_seq: u64,
    journal: Journal,
    redundant: usize,
    journal_dirty: bool,
}

impl DiskState {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn record(&mut self, record: JournalRecord) {
        if let Err(e) = self.journal.append(&record).await {
            warn!(
                path = %self.journal.path().display(),
                error = %e,
                "Failed to append to disk cache journal"
            );
            self.journal_dirty = true;
        }
    }

    fn needs_compaction(&self) -> bool {
        self.journal_dirty
            || (self.redundant >= COMPACT_THRESHOLD && self.redundant >= self.index.len())
    }
}

/// Entries from least to most recently used.
fn snapshot(index: &LruCache<CacheKey, u64>) -> Vec<(CacheKey, u64)> {
    index
        .iter()
        .rev()
        .map(|(key, size)| (key.clone(), *size))
        .collect()
}

/// Disk usage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskStats {
    /// Number of committed entries.
    pub entries: usize,
    /// Bytes occupied by committed entries.
    pub size: u64,
    /// Budget in bytes.
    pub max_size: u64,
}

/// Disk-based image cache that persists encoded image bytes.
///
/// Each entry lives in its own `<key>.img` file. A journal records commits,
/// reads and removals so the LRU order and total size survive restarts.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    state: Mutex<DiskState>,
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl DiskImageCache {
    /// Opens (or creates) a disk cache in the specified directory.
    ///
    /// Replays the journal, discards staged writes and unreferenced files,
    /// trims to `max_size`, and writes a compacted journal.
    ///
    /// # Errors
    /// Returns [`ImageError::StorageUnavailable`] if the directory or journal
    /// cannot be created, read, or written.
    pub async fn open(cache_dir: PathBuf, max_size: u64) -> ImageResult<Self> {
        fs::create_dir_all(&cache_dir).await.map_err(|e| {
            ImageError::storage(format!(
                "Failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        let replay = match fs::read_to_string(cache_dir.join(journal::JOURNAL_FILE)).await {
            Ok(contents) => journal::replay(&contents).unwrap_or_else(|e| {
                warn!(error = %e, "Disk cache journal unreadable, starting empty");
                journal::Replay::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => journal::Replay::default(),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!(error = %e, "Disk cache journal is not text, starting empty");
                journal::Replay::default()
            }
            Err(e) => {
                return Err(ImageError::storage(format!("Failed to read journal: {e}")));
            }
        };
        if replay.malformed > 0 {
            warn!(lines = replay.malformed, "Skipped malformed journal lines");
        }

        let mut index = LruCache::unbounded();
        let mut total_size = 0u64;
        for entry in replay.entries {
            let path = data_path(&cache_dir, &entry.key);
            match fs::metadata(&path).await {
                Ok(meta) if meta.len() == entry.size => {
                    total_size += entry.size;
                    index.put(entry.key, entry.size);
                }
                _ => {
                    debug!(key = %entry.key, "Dropping journal entry without matching data file");
                    remove_file_quietly(&path).await;
                }
            }
        }

        sweep_unreferenced(&cache_dir, &index).await?;

        while total_size > max_size {
            let Some((key, size)) = index.pop_lru() else {
                break;
            };
            total_size -= size;
            remove_file_quietly(&data_path(&cache_dir, &key)).await;
            debug!(key = %key, "Trimmed disk cache entry over budget");
        }

        let journal = Journal::rewrite(&cache_dir, &snapshot(&index))
            .await
            .map_err(|e| ImageError::storage(format!("Failed to write journal: {e}")))?;

        info!(
            path = %cache_dir.display(),
            entries = index.len(),
            size = total_size,
            max_size = max_size,
            "Opened disk image cache"
        );

        let next_seq = index.len() as u64;
        Ok(Self {
            cache_dir,
            max_size,
            state: Mutex::new(DiskState {
                index,
                total_size,
                next_seq,
                journal,
                redundant: 0,
                journal_dirty: false,
            }),
        })
    }

    /// Directory holding the cache.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path for a cached image.
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        data_path(&self.cache_dir, key)
    }

    fn staging_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}.{STAGING_EXTENSION}", key.as_str(), uuid::Uuid::new_v4().simple()))
    }

    /// Gets a copy of the stored bytes, marking the entry as recently used.
    pub async fn get_bytes(&self, key: &CacheKey) -> Option<Bytes> {
        let mut state = self.state.lock().await;
        if state.index.get(key).is_none() {
            trace!(key = %key, "Disk cache miss");
            return None;
        }

        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                let seq = state.bump_seq();
                state
                    .record(JournalRecord::Read {
                        key: key.clone(),
                        seq,
                    })
                    .await;
                state.redundant += 1;
                if state.needs_compaction() {
                    self.compact_locked(&mut state).await;
                }
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(Bytes::from(bytes))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached file unreadable, dropping entry");
                self.remove_locked(&mut state, key).await;
                None
            }
        }
    }

    /// Stores bytes in the disk cache.
    ///
    /// Bytes are staged in a temporary file and only become visible once the
    /// file has been renamed into place and the commit journaled.
    ///
    /// # Errors
    /// Returns [`ImageError::StorageUnavailable`] if the entry exceeds the
    /// whole budget or the file cannot be written. The existing store is left
    /// untouched in either case.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> ImageResult<()> {
        let size = bytes.len() as u64;
        if size > self.max_size {
            return Err(ImageError::storage(format!(
                "Entry of {size} bytes exceeds disk cache budget of {} bytes",
                self.max_size
            )));
        }

        let staging = self.staging_path(key);
        if let Err(e) = write_staged(&staging, bytes).await {
            remove_file_quietly(&staging).await;
            return Err(ImageError::storage(format!(
                "Failed to write cache file: {e}"
            )));
        }

        let mut state = self.state.lock().await;
        let path = self.cache_path(key);
        if let Err(e) = fs::rename(&staging, &path).await {
            remove_file_quietly(&staging).await;
            return Err(ImageError::storage(format!(
                "Failed to commit cache file: {e}"
            )));
        }

        if let Some(old) = state.index.pop(key) {
            state.total_size -= old;
            state.redundant += 1;
        }

        while state.total_size + size > self.max_size {
            let Some((evicted, evicted_size)) = state.index.pop_lru() else {
                break;
            };
            state.total_size -= evicted_size;
            remove_file_quietly(&self.cache_path(&evicted)).await;
            state
                .record(JournalRecord::Remove {
                    key: evicted.clone(),
                })
                .await;
            state.redundant += 2;
            debug!(key = %evicted, size = evicted_size, "Evicted from disk cache");
        }

        let seq = state.bump_seq();
        state.index.put(key.clone(), size);
        state.total_size += size;
        state
            .record(JournalRecord::Clean {
                key: key.clone(),
                size,
                seq,
            })
            .await;

        debug!(key = %key, path = %path.display(), size = size, "Stored image in disk cache");

        if state.needs_compaction() {
            self.compact_locked(&mut state).await;
        }

        Ok(())
    }

    /// Removes an image from disk cache.
    pub async fn evict(&self, key: &CacheKey) {
        let mut state = self.state.lock().await;
        self.remove_locked(&mut state, key).await;
    }

    async fn remove_locked(&self, state: &mut DiskState, key: &CacheKey) {
        let Some(size) = state.index.pop(key) else {
            return;
        };
        state.total_size -= size;
        remove_file_quietly(&self.cache_path(key)).await;
        state.record(JournalRecord::Remove { key: key.clone() }).await;
        state.redundant += 2;
        debug!(key = %key, "Evicted from disk cache");
        if state.needs_compaction() {
            self.compact_locked(state).await;
        }
    }

    async fn compact_locked(&self, state: &mut DiskState) {
        let entries = snapshot(&state.index);
        match Journal::rewrite(&self.cache_dir, &entries).await {
            Ok(journal) => {
                state.journal = journal;
                state.next_seq = entries.len() as u64;
                state.redundant = 0;
                state.journal_dirty = false;
                debug!(entries = entries.len(), "Compacted disk cache journal");
            }
            Err(e) => {
                warn!(error = %e, "Failed to compact disk cache journal");
                state.journal_dirty = true;
            }
        }
    }

    /// Makes committed entries durable, compacting the journal when it has
    /// grown redundant or a previous append failed.
    ///
    /// # Errors
    /// Returns [`ImageError::StorageUnavailable`] if the journal cannot be synced.
    pub async fn flush(&self) -> ImageResult<()> {
        let mut state = self.state.lock().await;
        if state.needs_compaction() {
            self.compact_locked(&mut state).await;
            if state.journal_dirty {
                return Err(ImageError::storage("Failed to rewrite journal"));
            }
            return Ok(());
        }
        state
            .journal
            .sync()
            .await
            .map_err(|e| ImageError::storage(format!("Failed to sync journal: {e}")))
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if the journal cannot be rewritten.
    pub async fn clear(&self) -> ImageResult<()> {
        let mut state = self.state.lock().await;
        while let Some((key, _)) = state.index.pop_lru() {
            remove_file_quietly(&self.cache_path(&key)).await;
        }
        state.total_size = 0;
        state.journal = Journal::rewrite(&self.cache_dir, &[])
            .await
            .map_err(|e| ImageError::storage(format!("Failed to write journal: {e}")))?;
        state.next_seq = 0;
        state.redundant = 0;
        state.journal_dirty = false;
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Returns the current cache size in bytes.
    pub async fn current_size(&self) -> u64 {
        self.state.lock().await.total_size
    }

    /// Returns the number of cached files.
    pub async fn len(&self) -> usize {
        self.state.lock().await.index.len()
    }

    /// Returns true if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns a usage summary.
    pub async fn stats(&self) -> DiskStats {
        let state = self.state.lock().await;
        DiskStats {
            entries: state.index.len(),
            size: state.total_size,
            max_size: self.max_size,
        }
    }

    /// Checks if an image is cached, without promoting it.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().await.index.contains(key)
    }
}

#[async_trait]
impl DiskCachePort for DiskImageCache {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.get_bytes(key).await
    }

    async fn put(&self, key: &CacheKey, bytes: &[u8]) -> ImageResult<()> {
        self.put_bytes(key, bytes).await
    }

    async fn remove(&self, key: &CacheKey) {
        self.evict(key).await;
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        DiskImageCache::contains(self, key).await
    }

    async fn flush(&self) -> ImageResult<()> {
        DiskImageCache::flush(self).await
    }

    async fn clear(&self) -> ImageResult<()> {
        DiskImageCache::clear(self).await
    }
}

fn data_path(dir: &Path, key: &CacheKey) -> PathBuf {
    dir.join(format!("{}.{DATA_EXTENSION}", key.as_str()))
}

async fn write_staged(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove cache file");
    }
}

/// Deletes staged writes and data files the index does not reference.
async fn sweep_unreferenced(dir: &Path, index: &LruCache<CacheKey, u64>) -> ImageResult<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| ImageError::storage(format!("Failed to read cache dir: {e}")))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ImageError::storage(format!("Failed to read entry: {e}")))?
    {
        let path = entry.path();
        let stale = match path.extension().and_then(|ext| ext.to_str()) {
            Some(STAGING_EXTENSION) => true,
            Some(DATA_EXTENSION) => path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(CacheKey::parse)
                .is_none_or(|key| !index.contains(&key)),
            _ => false,
        };
        if stale {
            trace!(path = %path.display(), "Removing stale cache file");
            remove_file_quietly(&path).await;
        }
    }
    Ok(())
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    project_dirs().map_or_else(
        || std::env::temp_dir().join("imgtier").join("cache").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::AppConfig;
    use tempfile::TempDir;

    async fn create_test_cache(max_size: u64) -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), max_size)
            .await
            .unwrap();
        (cache, temp_dir)
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw)
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == STAGING_EXTENSION))
            .count()
    }

    fn journal_lines(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join(journal::JOURNAL_FILE))
            .unwrap()
            .lines()
            .count()
    }

    #[tokio::test]
    async fn test_put_and_get_bytes() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        let data = b"test image data";

        cache.put_bytes(&key("a1"), data).await.unwrap();
        let retrieved = cache.get_bytes(&key("a1")).await;

        assert_eq!(retrieved.as_deref(), Some(&data[..]));
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;
        assert!(cache.get_bytes(&key("ff")).await.is_none());
    }

    #[tokio::test]
    async fn test_evict() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;

        cache.put_bytes(&key("a1"), b"test").await.unwrap();
        assert!(cache.contains(&key("a1")).await);

        cache.evict(&key("a1")).await;
        assert!(!cache.contains(&key("a1")).await);
        assert!(!cache.cache_path(&key("a1")).exists());
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;

        cache.put_bytes(&key("a1"), b"data1").await.unwrap();
        cache.put_bytes(&key("a2"), b"data2").await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(cache.current_size().await, 0);
        assert!(!cache.cache_path(&key("a1")).exists());
    }

    #[tokio::test]
    async fn test_size_accounting() {
        let (cache, _temp) = create_test_cache(1024 * 1024).await;

        cache.put_bytes(&key("a1"), b"hello").await.unwrap();
        cache.put_bytes(&key("a2"), b"world!").await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.current_size().await, 11);

        cache.put_bytes(&key("a1"), b"hey").await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.current_size().await, 9);

        cache.evict(&key("a2")).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.current_size().await, 3);
    }

    #[tokio::test]
    async fn test_eviction_follows_access_recency() {
        let (cache, _temp) = create_test_cache(12).await;

        cache.put_bytes(&key("aa"), b"1234").await.unwrap();
        cache.put_bytes(&key("bb"), b"1234").await.unwrap();
        cache.put_bytes(&key("cc"), b"1234").await.unwrap();
        assert!(cache.get_bytes(&key("aa")).await.is_some());

        cache.put_bytes(&key("dd"), b"1234").await.unwrap();

        assert!(!cache.contains(&key("bb")).await);
        assert!(cache.contains(&key("aa")).await);
        assert!(cache.contains(&key("cc")).await);
        assert!(cache.contains(&key("dd")).await);
        assert!(cache.current_size().await <= 12);
    }

    #[tokio::test]
    async fn test_large_insert_evicts_several() {
        let (cache, _temp) = create_test_cache(10).await;

        cache.put_bytes(&key("aa"), b"123").await.unwrap();
        cache.put_bytes(&key("bb"), b"123").await.unwrap();
        cache.put_bytes(&key("cc"), b"123").await.unwrap();
        cache.put_bytes(&key("dd"), b"12345678").await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.current_size().await, 8);
    }

    #[tokio::test]
    async fn test_oversized_put_is_rejected_without_eviction() {
        let (cache, temp) = create_test_cache(10).await;
        cache.put_bytes(&key("aa"), b"123").await.unwrap();

        let err = cache.put_bytes(&key("bb"), &[0u8; 11]).await.unwrap_err();

        assert!(matches!(err, ImageError::StorageUnavailable { .. }));
        assert!(cache.contains(&key("aa")).await);
        assert!(!cache.contains(&key("bb")).await);
        assert_eq!(staged_files(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_store_untouched() {
        let (cache, temp) = create_test_cache(1024).await;
        cache.put_bytes(&key("aa"), b"kept").await.unwrap();
        // A directory in the entry's place makes the commit rename fail.
        std::fs::create_dir(temp.path().join("bb.img")).unwrap();

        let err = cache.put_bytes(&key("bb"), b"blocked").await.unwrap_err();

        assert!(matches!(err, ImageError::StorageUnavailable { .. }));
        assert!(!cache.contains(&key("bb")).await);
        assert_eq!(staged_files(temp.path()), 0);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.current_size().await, 4);
        assert_eq!(cache.get_bytes(&key("aa")).await.as_deref(), Some(&b"kept"[..]));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 12)
                .await
                .unwrap();
            cache.put_bytes(&key("aa"), b"1234").await.unwrap();
            cache.put_bytes(&key("bb"), b"1234").await.unwrap();
            cache.put_bytes(&key("cc"), b"1234").await.unwrap();
            let _ = cache.get_bytes(&key("aa")).await;
            cache.flush().await.unwrap();
        }

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 12)
            .await
            .unwrap();
        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.current_size().await, 12);
        assert_eq!(cache.get_bytes(&key("cc")).await.as_deref(), Some(&b"1234"[..]));

        // bb is now the least recently used entry.
        cache.put_bytes(&key("dd"), b"1234").await.unwrap();
        assert!(!cache.contains(&key("bb")).await);
        assert!(cache.contains(&key("aa")).await);
    }

    #[tokio::test]
    async fn test_open_discards_staged_and_orphaned_files() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024)
                .await
                .unwrap();
            cache.put_bytes(&key("aa"), b"kept").await.unwrap();
        }
        std::fs::write(temp_dir.path().join("bb.1234.tmp"), b"half").unwrap();
        std::fs::write(temp_dir.path().join("cc.img"), b"orphan").unwrap();

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();

        assert_eq!(cache.len().await, 1);
        assert!(cache.contains(&key("aa")).await);
        assert!(!temp_dir.path().join("bb.1234.tmp").exists());
        assert!(!temp_dir.path().join("cc.img").exists());
    }

    #[tokio::test]
    async fn test_open_drops_entries_with_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024)
                .await
                .unwrap();
            cache.put_bytes(&key("aa"), b"data").await.unwrap();
            cache.put_bytes(&key("bb"), b"data").await.unwrap();
        }
        std::fs::remove_file(temp_dir.path().join("aa.img")).unwrap();

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.current_size().await, 4);
    }

    #[tokio::test]
    async fn test_open_with_corrupt_journal_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("journal"), b"not a journal\n").unwrap();
        std::fs::write(temp_dir.path().join("aa.img"), b"data").unwrap();

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        assert!(cache.is_empty().await);
        assert!(!temp_dir.path().join("aa.img").exists());
    }

    #[tokio::test]
    async fn test_open_trims_to_smaller_budget() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 100)
                .await
                .unwrap();
            cache.put_bytes(&key("aa"), b"12345").await.unwrap();
            cache.put_bytes(&key("bb"), b"12345").await.unwrap();
        }

        let cache = DiskImageCache::open(temp_dir.path().to_path_buf(), 6)
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.contains(&key("bb")).await);
    }

    #[tokio::test]
    async fn test_open_fails_on_unwritable_root() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let result = DiskImageCache::open(blocker.join("images"), 1024).await;
        assert!(matches!(
            result,
            Err(ImageError::StorageUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_a_miss() {
        let (cache, temp) = create_test_cache(1024).await;
        cache.put_bytes(&key("aa"), b"data").await.unwrap();
        std::fs::remove_file(temp.path().join("aa.img")).unwrap();

        assert!(cache.get_bytes(&key("aa")).await.is_none());
        assert!(!cache.contains(&key("aa")).await);
        assert_eq!(cache.current_size().await, 0);
    }

    #[tokio::test]
    async fn test_journal_compacts_after_many_reads() {
        let (cache, temp) = create_test_cache(1024).await;
        cache.put_bytes(&key("aa"), b"data").await.unwrap();
        for _ in 0..COMPACT_THRESHOLD {
            let _ = cache.get_bytes(&key("aa")).await;
        }
        cache.flush().await.unwrap();

        let journal = std::fs::read_to_string(temp.path().join("journal")).unwrap();
        assert_eq!(journal.lines().count(), 4);
        assert!(journal.ends_with("CLEAN aa 4 0\n"));
    }

    #[test]
    fn test_default_cache_dir_uses_app_dirs() {
        if let Some(dirs) = project_dirs() {
            assert_eq!(default_cache_dir(), dirs.cache_dir().join("images"));
            assert_eq!(
                AppConfig::default_config_dir(),
                Some(dirs.config_dir().to_path_buf())
            );
        }
    }

    #[tokio::test]
    async fn test_reads_compact_journal_without_flush() {
        let (cache, temp) = create_test_cache(1024).await;
        cache.put_bytes(&key("aa"), b"data").await.unwrap();
        for _ in 0..COMPACT_THRESHOLD * 2 + 500 {
            assert!(cache.get_bytes(&key("aa")).await.is_some());
        }

        assert!(journal_lines(temp.path()) <= COMPACT_THRESHOLD + 4);
    }

    #[tokio::test]
    async fn test_removals_compact_journal_without_flush() {
        let (cache, temp) = create_test_cache(1024).await;
        for _ in 0..COMPACT_THRESHOLD / 2 + 100 {
            cache.put_bytes(&key("aa"), b"data").await.unwrap();
            cache.evict(&key("aa")).await;
        }

        assert!(cache.is_empty().await);
        assert!(journal_lines(temp.path()) <= COMPACT_THRESHOLD + 4);
    }
}
