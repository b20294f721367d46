mod fetcher_port;
mod image_cache_port;
mod image_target_port;

pub use fetcher_port::FetcherPort;
#[cfg(test)]
pub use image_cache_port::MockDiskCachePort;
pub use image_cache_port::{DiskCachePort, ImageCachePort};
pub use image_target_port::{ImageTarget, LoadResult};
