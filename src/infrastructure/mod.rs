//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (keys, caching, fetching, decoding, loading).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigError, LogLevel, StorageManager};
pub use image::{
    CacheStats, ChannelTarget, DiskImageCache, DiskStats, DisplayStatus, HttpFetcher,
    ImageLoadedEvent, ImageLoader, ImageLoaderConfig, KeyDeriver, LoaderStats, MemoryImageCache,
};
