//! Background prefetching
//!
//! Decides which pages to generate ahead of the reader and when, bounded
//! by a per-document concurrency cap.

mod scheduler;

pub use scheduler::{PrefetchScheduler, SchedulerStats};
