//! Port for receiving loader results.

use crate::domain::entities::{CacheKey, LoadedImage};
use crate::domain::errors::ImageError;

/// Outcome delivered to an [`ImageTarget`].
pub type LoadResult = Result<LoadedImage, ImageError>;

/// Receiver of a display request's result.
///
/// The loader holds targets only weakly. A target dropped before its request
/// completes is never invoked. Implementations that must run on a specific
/// execution context (a UI loop) forward the result there themselves.
pub trait ImageTarget: Send + Sync {
    /// Receives the result of one display request.
    fn deliver(&self, key: &CacheKey, result: LoadResult);
}

impl<F> ImageTarget for F
where
    F: Fn(&CacheKey, LoadResult) + Send + Sync,
{
    fn deliver(&self, key: &CacheKey, result: LoadResult) {
        self(key, result);
    }
}
