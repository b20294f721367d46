//! Image pipeline error types.

use thiserror::Error;

/// Result type for image pipeline operations.
pub type ImageResult<T> = std::result::Result<T, ImageError>;

/// Errors surfaced to callers of the image loader.
///
/// Errors are `Clone` so a single failed fetch can be delivered to every
/// request waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ImageError {
    #[error("invalid resource identifier: {identifier}")]
    InvalidIdentifier { identifier: String },

    #[error("resource unavailable: {message}")]
    FetchUnavailable { message: String },

    #[error("corrupt image data: {message}")]
    DecodeCorrupt { message: String },

    #[error("storage unavailable: {message}")]
    StorageUnavailable { message: String },
}

impl ImageError {
    /// Creates invalid identifier error.
    #[must_use]
    pub fn invalid_identifier(identifier: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
        }
    }

    /// Creates fetch unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::FetchUnavailable {
            message: message.into(),
        }
    }

    /// Creates decode corrupt error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::DecodeCorrupt {
            message: message.into(),
        }
    }

    /// Creates storage unavailable error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Returns whether retrying the same request later may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FetchUnavailable { .. } | Self::StorageUnavailable { .. }
        )
    }

    /// Returns whether error came from the network path.
    #[must_use]
    pub const fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier { .. } | Self::FetchUnavailable { .. }
        )
    }
}

/// Failure modes of the network fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The identifier is not a retrievable resource.
    #[error("invalid identifier {identifier}: {reason}")]
    InvalidIdentifier {
        /// The rejected identifier.
        identifier: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Connection failure, timeout, or non-200 response.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<FetchError> for ImageError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidIdentifier { identifier, .. } => {
                Self::InvalidIdentifier { identifier }
            }
            FetchError::Unavailable(message) => Self::FetchUnavailable { message },
        }
    }
}

/// Failure modes of the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Bytes do not parse as a supported image format.
    #[error("corrupt: {0}")]
    Corrupt(String),
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<DecodeError> for ImageError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Corrupt(message) => Self::DecodeCorrupt { message },
        }
    }
}
