//! Domain layer with core entities, errors, and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, ImageRequest, ImageSource, LoadedImage, TargetSize};
pub use errors::{ImageError, ImageResult};
pub use ports::{DiskCachePort, FetcherPort, ImageCachePort, ImageTarget, LoadResult};
