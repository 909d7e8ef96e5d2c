//! Local caching module for offline profile access.
//!
//! This module provides the `ProfileCache` for storing the signed-in user's
//! profile in the durable store. Entries are served without a network call
//! for 15 minutes; after that a refetch is attempted, falling back to the
//! stale entry while the backend is transiently failing.

pub mod manager;

pub use manager::{CacheEntry, ProfileCache, STALENESS_WINDOW_MINUTES};
