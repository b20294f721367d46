//! Port definition for retrieving raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::FetchError;

/// Port for network retrieval of encoded images.
#[async_trait]
pub trait FetcherPort: Send + Sync {
    /// Retrieves the full body for `identifier`.
    ///
    /// The returned buffer may be read any number of times. No retries are
    /// performed at this layer.
    async fn fetch(&self, identifier: &str) -> Result<Bytes, FetchError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    /// Fetcher stub serving canned responses and counting calls.
    pub struct MockFetcher {
        responses: Mutex<HashMap<String, Result<Bytes, FetchError>>>,
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockFetcher {
        /// Creates a stub with no responses; every fetch is unavailable.
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        /// Serves `bytes` for `identifier`.
        #[must_use]
        pub fn with_response(self, identifier: &str, bytes: Vec<u8>) -> Self {
            self.responses
                .lock()
                .insert(identifier.to_string(), Ok(Bytes::from(bytes)));
            self
        }

        /// Fails fetches of `identifier` with `error`.
        #[must_use]
        pub fn with_error(self, identifier: &str, error: FetchError) -> Self {
            self.responses
                .lock()
                .insert(identifier.to_string(), Err(error));
            self
        }

        /// Holds every fetch until a permit is added to `gate`.
        #[must_use]
        pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Number of fetches performed so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Default for MockFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl FetcherPort for MockFetcher {
        async fn fetch(&self, identifier: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            self.responses
                .lock()
                .get(identifier)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Unavailable("no stub response".to_string())))
        }
    }
}
