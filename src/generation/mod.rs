//! Page artifact generation
//!
//! Wraps an external [`ArtifactGenerator`] so concurrent requests for the
//! same page collapse into a single call, and commits successful results
//! into the document's page cache.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use amnesia_prefetch::generation::GenerationCoordinator;
//!
//! let coordinator = GenerationCoordinator::new("book-1", cache, generator, None);
//!
//! // Both callers share one underlying generation
//! let (a, b) = tokio::join!(coordinator.get_or_create(4), coordinator.get_or_create(4));
//! ```

mod coordinator;
mod traits;

pub use coordinator::{ArtifactFuture, GenerationCoordinator};
pub use traits::ArtifactGenerator;
