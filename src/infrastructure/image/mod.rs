//! Image handling infrastructure.
//!
//! This module provides:
//! - Cache key derivation
//! - Memory caching with weighted LRU eviction
//! - Journaled disk caching for persistence
//! - HTTP fetching and size-aware decoding
//! - Async image loading pipeline

pub mod decoder;
pub mod delivery;
pub mod disk_cache;
pub mod fetcher;
mod journal;
pub mod key;
pub mod loader;
pub mod memory_cache;

pub use decoder::{DiskFormat, compute_sample_factor, decode, decode_to_fit, probe};
pub use delivery::{ChannelTarget, ImageLoadedEvent};
pub use disk_cache::{DiskImageCache, DiskStats, default_cache_dir};
pub use fetcher::HttpFetcher;
pub use key::{KeyDeriver, KeyDigest};
pub use loader::{DisplayStatus, ImageLoader, ImageLoaderConfig, LoaderStats};
pub use memory_cache::{CacheStats, MemoryImageCache};
