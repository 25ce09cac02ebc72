//! Size estimation for cached artifacts
//!
//! The cache asks its estimator for an entry's size exactly once, at
//! insertion. Estimators are infallible: anything that cannot be measured
//! falls back to a conservative default instead of failing the insert.

use std::sync::Arc;

use serde::Serialize;

/// Size assumed for entries an estimator cannot measure
pub const DEFAULT_ENTRY_SIZE: u64 = 1024;

/// Computes the memory footprint of a cached value
pub trait SizeEstimator<T>: Send + Sync {
    /// Estimated size in bytes. Must not panic.
    fn estimate(&self, value: &T) -> u64;
}

impl<T, F> SizeEstimator<T> for F
where
    F: Fn(&T) -> u64 + Send + Sync,
{
    fn estimate(&self, value: &T) -> u64 {
        self(value)
    }
}

/// Assigns every entry the same size
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeEstimator(pub u64);

impl<T> SizeEstimator<T> for FixedSizeEstimator {
    fn estimate(&self, _value: &T) -> u64 {
        self.0
    }
}

/// Estimates size as the length of the value's JSON encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSizeEstimator;

impl<T: Serialize> SizeEstimator<T> for JsonSizeEstimator {
    fn estimate(&self, value: &T) -> u64 {
        match serde_json::to_vec(value) {
            Ok(encoded) => encoded.len() as u64,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    fallback = DEFAULT_ENTRY_SIZE,
                    "Size estimation failed, using fallback"
                );
                DEFAULT_ENTRY_SIZE
            }
        }
    }
}

/// Types that know their own approximate heap footprint
pub trait MemorySize {
    fn memory_size(&self) -> u64;
}

impl MemorySize for Vec<u8> {
    fn memory_size(&self) -> u64 {
        self.len() as u64
    }
}

impl MemorySize for String {
    fn memory_size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T: MemorySize + ?Sized> MemorySize for Arc<T> {
    fn memory_size(&self) -> u64 {
        (**self).memory_size()
    }
}

/// Estimator for types implementing [`MemorySize`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapSizeEstimator;

impl<T: MemorySize> SizeEstimator<T> for HeapSizeEstimator {
    fn estimate(&self, value: &T) -> u64 {
        value.memory_size()
    }
}
