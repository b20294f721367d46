//! Domain entity definitions.

mod image;

pub use self::image::{
    CacheKey, ImageRequest, ImageSource, LoadStage, LoadedImage, TargetSize, decoded_size,
};
