//! imgtier - A tiered image cache.
//!
//! Images are resolved from a weighted in-memory LRU, then a journaled
//! on-disk LRU, then the network. Fetched images are decoded at a size
//! matched to their display target and written back to both tiers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for storage and the network.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imgtier";
