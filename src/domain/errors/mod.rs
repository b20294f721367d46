//! Domain error types.

mod image_error;

pub use image_error::{DecodeError, FetchError, ImageError, ImageResult};
