//! Amnesia Prefetch
//!
//! Page-locality cache and prefetch coordinator for the reader's
//! page-scoped artifacts (synthesized audio, translated text).
//!
//! # Modules
//!
//! - `cache`: Adjacency-aware per-document page cache
//! - `generation`: Single-flight generation on top of the cache
//! - `prefetch`: Bounded-concurrency background scheduler
//! - `session`: Per-document ownership of the above
//! - `artifacts`: Audio and translation artifact types

pub mod artifacts;
pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod prefetch;
pub mod session;

pub use cache::{CacheKey, PageCache, SizeEstimator};
pub use config::{CacheConfig, Config, PipelineConfig, SchedulerConfig};
pub use error::{ConfigError, GenerationError, GenerationResult, SessionError};
pub use generation::{ArtifactFuture, ArtifactGenerator, GenerationCoordinator};
pub use prefetch::{PrefetchScheduler, SchedulerStats};
pub use session::{DocumentSession, SessionRegistry, SessionStats};
