//! Port definitions for the memory and disk cache tiers.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::CacheKey;
use crate::domain::errors::ImageResult;

/// Port for the in-memory tier of decoded images.
/// Implementations must be thread-safe.
pub trait ImageCachePort: Send + Sync {
    /// Returns the image for `key`, marking it as most recently used.
    fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image, evicting least recently used entries to make room.
    ///
    /// Returns false when the image is heavier than the whole cache and was
    /// not admitted.
    fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) -> bool;

    /// Removes an image from the cache.
    fn evict(&self, key: &CacheKey);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed weight of resident entries in bytes.
    fn weight(&self) -> u64;

    /// Clears all images from the cache.
    fn clear(&self);
}

/// Port for the persistent tier of encoded image bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiskCachePort: Send + Sync {
    /// Returns a copy of the stored bytes, marking the entry as most recently used.
    async fn get(&self, key: &CacheKey) -> Option<Bytes>;

    /// Stores bytes under `key`. A failed put leaves no visible record.
    async fn put(&self, key: &CacheKey, bytes: &[u8]) -> ImageResult<()>;

    /// Removes the entry for `key` if present.
    async fn remove(&self, key: &CacheKey);

    /// Returns true if an entry for `key` is committed.
    async fn contains(&self, key: &CacheKey) -> bool;

    /// Makes all committed entries durable.
    async fn flush(&self) -> ImageResult<()>;

    /// Removes every entry.
    async fn clear(&self) -> ImageResult<()>;
}
