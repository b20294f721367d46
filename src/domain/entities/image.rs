//! Domain types for the image pipeline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Content-addressed cache key derived from a resource identifier.
///
/// Keys are lowercase hexadecimal strings of fixed length for a given digest.
/// The same key names an entry in both the memory and disk tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an already-derived key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parses a key read back from persistent storage.
    ///
    /// Only non-empty ASCII hex strings are accepted, so a parsed key is always
    /// safe to use as a file name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_ascii_lowercase()))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display size an image is decoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSize {
    width: u32,
    height: u32,
}

impl TargetSize {
    /// Creates a target size. Zero dimensions are clamped to one pixel.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width: if width == 0 { 1 } else { width },
            height: if height == 0 { 1 } else { height },
        }
    }

    /// Target width in pixels.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.width
    }

    /// Target height in pixels.
    #[must_use]
    pub const fn height(self) -> u32 {
        self.height
    }
}

impl std::fmt::Display for TargetSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A request to display a remote image at a given size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Opaque resource identifier, usually a URL.
    pub identifier: String,
    /// Size the image will be displayed at.
    pub target: TargetSize,
}

impl ImageRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(identifier: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            identifier: identifier.into(),
            target: TargetSize::new(width, height),
        }
    }
}

/// Stage of a single request in the loading pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStage {
    /// Looking up the in-memory tier.
    #[default]
    CheckMemory,
    /// Looking up the on-disk tier.
    CheckDisk,
    /// Waiting on the network.
    Fetching,
    /// Probing and decoding fetched bytes.
    Decoding,
    /// Writing the result back into both tiers.
    Committing,
    /// Result delivered.
    Done,
    /// Result delivered as an error.
    Failed,
}

impl LoadStage {
    /// Returns true while the request is running on the worker pool.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Fetching | Self::Decoding | Self::Committing)
    }
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CheckMemory => "check-memory",
            Self::CheckDisk => "check-disk",
            Self::Fetching => "fetching",
            Self::Decoding => "decoding",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A decoded image ready for display.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The cache key of the image.
    pub key: CacheKey,
    /// The decoded pixel data.
    pub image: Arc<image::DynamicImage>,
    /// Where the image was loaded from.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Width of the decoded image.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height of the decoded image.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Loaded from disk cache.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Returns the decoded byte footprint of an image.
#[must_use]
pub fn decoded_size(image: &image::DynamicImage) -> u64 {
    image.as_bytes().len() as u64
}
