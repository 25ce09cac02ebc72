//! Error types for the prefetch pipelines

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheKey;

/// Result of a page artifact generation
pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// Generation failure, shared by every caller coalesced on the same key
///
/// Cloneable so one failure can be handed to all waiters of a shared
/// in-flight generation.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The artifact generator returned an error
    #[error("Generation failed for {key}: {cause}")]
    Failed {
        key: CacheKey,
        cause: Arc<anyhow::Error>,
    },

    /// The artifact generator did not finish in time
    #[error("Generation for {key} timed out after {after:?}")]
    Timeout { key: CacheKey, after: Duration },
}

impl GenerationError {
    pub fn key(&self) -> &CacheKey {
        match self {
            GenerationError::Failed { key, .. } | GenerationError::Timeout { key, .. } => key,
        }
    }
}

/// Reading session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Document has no pages: {0}")]
    EmptyDocument(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
