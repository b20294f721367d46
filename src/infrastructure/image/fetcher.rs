//! HTTP retrieval of encoded image bytes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use tracing::{debug, trace};

use crate::domain::errors::{FetchError, ImageError, ImageResult};
use crate::domain::ports::FetcherPort;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default overall request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fetches images over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given timeouts.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> ImageResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("imgtier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ImageError::unavailable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Parses an identifier into a fetchable URL.
///
/// # Errors
/// Returns [`FetchError::InvalidIdentifier`] for anything that is not an
/// absolute `http` or `https` URL with a host.
pub fn parse_identifier(identifier: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason,
    };

    let url = Url::parse(identifier).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

#[async_trait]
impl FetcherPort for HttpFetcher {
    async fn fetch(&self, identifier: &str) -> Result<Bytes, FetchError> {
        let url = parse_identifier(identifier)?;
        debug!(url = %url, "Downloading image");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(format!("Request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Unavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Unavailable(format!("Failed to read body: {e}")))?;

        trace!(size = bytes.len(), "Downloaded image body");
        Ok(bytes)
    }
}
