//! Cache types
//!
//! Keys, entries and statistics shared by the page cache and its callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of pages in the protected adjacency window (previous, current, next)
pub const MAX_ADJACENT_PAGES: usize = 3;

/// Cache key for a page-scoped artifact
///
/// Every document owns its own cache, so the document id never takes part
/// in lookups inside a `PageCache`. It is carried here so generators and
/// log lines know which document a page belongs to.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    /// Document ID
    pub document_id: String,
    /// Zero-based page index
    pub page: usize,
}

impl CacheKey {
    /// Create a cache key for a page of a document
    pub fn new(document_id: impl Into<String>, page: usize) -> Self {
        Self {
            document_id: document_id.into(),
            page,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.page)
    }
}

/// A cached artifact with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached artifact
    pub data: T,
    /// When the entry was inserted
    pub inserted_at: DateTime<Utc>,
    /// Estimated size, computed once at insertion
    pub size_bytes: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, size_bytes: u64) -> Self {
        Self {
            data,
            inserted_at: Utc::now(),
            size_bytes,
        }
    }
}

/// Page cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Pages held in the adjacency tier, sorted ascending
    pub adjacent_pages: Vec<usize>,
    /// Pages held in the recent queue, most recently touched first
    pub recent_pages: Vec<usize>,
    /// Combined size of all entries in bytes
    pub total_size: u64,
    /// Human readable total size (e.g. "1.5 MB")
    pub total_size_formatted: String,
    /// Configured memory budget in bytes
    pub max_total_size: u64,
    /// `total_size / max_total_size` (may exceed 1.0 on overflow)
    pub memory_utilization: f64,
}

/// Format a byte count for display
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}
