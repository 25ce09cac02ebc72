//! Artifact generator trait
//!
//! Implemented once per artifact type by the audio and translation
//! pipelines. Generators may be slow, costly and fallible; they must be
//! safe to call again for a key whose previous generation failed.

use std::future::Future;

use async_trait::async_trait;

use crate::cache::CacheKey;

/// Produces the artifact for one page of one document
#[async_trait]
pub trait ArtifactGenerator<T: Send + 'static>: Send + Sync {
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> ArtifactGenerator<T> for F
where
    T: Send + 'static,
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn generate(&self, key: &CacheKey) -> anyhow::Result<T> {
        (self)(key.clone()).await
    }
}
