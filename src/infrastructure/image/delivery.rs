//! Delivery of loader results to callers.

use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::entities::CacheKey;
use crate::domain::ports::{ImageTarget, LoadResult};

/// Message sent when an image finishes loading.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// The image key.
    pub key: CacheKey,
    /// Caller-chosen tag identifying the requesting view.
    pub tag: u64,
    /// The loaded image or the reason it failed.
    pub result: LoadResult,
}

/// Target that forwards results onto a caller's event loop.
///
/// Results are sent over an unbounded channel so they are handled on
/// whichever task owns the receiver, typically a UI loop.
#[derive(Debug, Clone)]
pub struct ChannelTarget {
    tag: u64,
    event_tx: mpsc::UnboundedSender<ImageLoadedEvent>,
}

impl ChannelTarget {
    /// Creates a target tagged with `tag`.
    #[must_use]
    pub fn new(tag: u64, event_tx: mpsc::UnboundedSender<ImageLoadedEvent>) -> Self {
        Self { tag, event_tx }
    }
}

impl ImageTarget for ChannelTarget {
    fn deliver(&self, key: &CacheKey, result: LoadResult) {
        let event = ImageLoadedEvent {
            key: key.clone(),
            tag: self.tag,
            result,
        };
        if self.event_tx.send(event).is_err() {
            trace!(key = %key, tag = self.tag, "Event receiver closed, dropping result");
        }
    }
}
