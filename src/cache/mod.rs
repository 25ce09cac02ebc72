//! Page-locality cache
//!
//! Per-document cache of page-scoped artifacts (synthesized audio,
//! translated text) with a protected adjacency window around the reader's
//! current page and a bounded recent queue for everything else.

mod estimator;
mod page_cache;
mod types;

pub use estimator::{
    FixedSizeEstimator, HeapSizeEstimator, JsonSizeEstimator, MemorySize, SizeEstimator,
    DEFAULT_ENTRY_SIZE,
};
pub use page_cache::PageCache;
pub use types::{format_bytes, CacheEntry, CacheKey, CacheStats, MAX_ADJACENT_PAGES};
