//! Single-flight generation coordinator
//!
//! Guarantees at most one in-flight generation per page of a document.
//! Concurrent requests for the same page share one future; the generator
//! is invoked once no matter how many callers wait on it.
//!
//! # Thread Safety
//!
//! The page cache and the pending map live together behind one
//! `parking_lot::Mutex`, so the check-cache / check-pending / start
//! sequence is a single critical section. The lock is never held across
//! an `.await`.
//!
//! Every new generation is also spawned onto the Tokio runtime. It runs to
//! completion and commits its result even if all callers drop their
//! futures (e.g. the reader paged away). A generator that panics is
//! treated like one that returned an error.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::cache::{CacheKey, PageCache, SizeEstimator};
use crate::error::{GenerationError, GenerationResult};

use super::traits::ArtifactGenerator;

/// Shared handle to a page artifact that is cached or being generated
pub type ArtifactFuture<T> = Shared<BoxFuture<'static, GenerationResult<T>>>;

/// Cache and pending map, always locked together
struct PageStore<T, E> {
    cache: PageCache<T, E>,
    pending: HashMap<usize, ArtifactFuture<T>>,
    /// Bumped by `clear`; generations from an older epoch do not commit
    epoch: u64,
}

/// Per-document generation coordinator
pub struct GenerationCoordinator<T: Send + 'static, E> {
    inner: Arc<CoordinatorInner<T, E>>,
}

struct CoordinatorInner<T: Send + 'static, E> {
    document_id: String,
    store: Mutex<PageStore<T, E>>,
    generator: Arc<dyn ArtifactGenerator<T>>,
    timeout: Option<Duration>,
}

impl<T: Send + 'static, E> Clone for GenerationCoordinator<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> GenerationCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: SizeEstimator<T> + 'static,
{
    /// Create a coordinator owning `cache` for `document_id`
    ///
    /// `timeout` bounds each generator call; expiry counts as a failure.
    pub fn new(
        document_id: impl Into<String>,
        cache: PageCache<T, E>,
        generator: Arc<dyn ArtifactGenerator<T>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                document_id: document_id.into(),
                store: Mutex::new(PageStore {
                    cache,
                    pending: HashMap::new(),
                    epoch: 0,
                }),
                generator,
                timeout,
            }),
        }
    }

    /// Get a page's artifact, generating it if needed
    ///
    /// 1. Cache hit: an already-resolved future, no generator call.
    /// 2. In flight: the same shared future every other caller holds.
    /// 3. Otherwise: a new generation. On success the result is committed
    ///    to the cache; on failure the page becomes requestable again.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_create(&self, page: usize) -> ArtifactFuture<T> {
        let key = self.key(page);

        let generation = {
            let mut store = self.inner.store.lock();

            if let Some(data) = store.cache.get(page) {
                tracing::trace!(key = %key, "Artifact cache hit");
                let data = data.clone();
                return future::ready(Ok::<T, GenerationError>(data))
                    .boxed()
                    .shared();
            }

            if let Some(in_flight) = store.pending.get(&page) {
                tracing::debug!(key = %key, "Joining in-flight generation");
                return in_flight.clone();
            }

            let generation = Self::generation_future(Arc::clone(&self.inner), key.clone(), store.epoch);
            store.pending.insert(page, generation.clone());
            generation
        };

        tracing::debug!(key = %key, "Starting generation");
        tokio::spawn(generation.clone().map(|_| ()));

        generation
    }

    /// Whether a generation for `page` is currently in flight
    pub fn is_pending(&self, page: usize) -> bool {
        self.inner.store.lock().pending.contains_key(&page)
    }

    /// Number of generations currently in flight
    pub fn pending_count(&self) -> usize {
        self.inner.store.lock().pending.len()
    }

    /// Lock and borrow the page cache
    ///
    /// The guard holds the store lock: drop it before calling any other
    /// coordinator method and never keep it across an `.await`.
    pub fn cache(&self) -> MappedMutexGuard<'_, PageCache<T, E>> {
        MutexGuard::map(self.inner.store.lock(), |store| &mut store.cache)
    }

    /// Drop all cached artifacts and forget in-flight generations
    ///
    /// Generations already running still resolve their callers, but their
    /// results are not committed to the cleared cache.
    pub fn clear(&self) {
        let mut store = self.inner.store.lock();
        store.cache.clear();
        store.pending.clear();
        store.epoch += 1;
    }

    pub fn document_id(&self) -> &str {
        &self.inner.document_id
    }

    /// Cache key for a page of this coordinator's document
    pub fn key(&self, page: usize) -> CacheKey {
        CacheKey::new(self.inner.document_id.as_str(), page)
    }

    fn generation_future(
        inner: Arc<CoordinatorInner<T, E>>,
        key: CacheKey,
        epoch: u64,
    ) -> ArtifactFuture<T> {
        async move {
            let outcome = inner.run_generator(&key).await;
            inner.settle(&key, epoch, &outcome);
            outcome
        }
        .boxed()
        .shared()
    }
}

impl<T, E> CoordinatorInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: SizeEstimator<T> + 'static,
{
    async fn run_generator(&self, key: &CacheKey) -> GenerationResult<T> {
        let generation = AssertUnwindSafe(self.generator.generate(key)).catch_unwind();

        let result = match self.timeout {
            Some(after) => match tokio::time::timeout(after, generation).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(GenerationError::Timeout {
                        key: key.clone(),
                        after,
                    })
                }
            },
            None => generation.await,
        };

        let cause = match result {
            Ok(Ok(data)) => return Ok(data),
            Ok(Err(cause)) => cause,
            Err(panic) => anyhow::anyhow!("generator panicked: {}", panic_message(&*panic)),
        };

        Err(GenerationError::Failed {
            key: key.clone(),
            cause: Arc::new(cause),
        })
    }

    /// Commit a finished generation: leave the pending map, enter the cache on success
    fn settle(&self, key: &CacheKey, epoch: u64, outcome: &GenerationResult<T>) {
        {
            let mut store = self.store.lock();
            if store.epoch != epoch {
                tracing::debug!(key = %key, "Discarding generation from a cleared cache");
                return;
            }

            store.pending.remove(&key.page);
            if let Ok(data) = outcome {
                store.cache.set(key.page, data.clone());
            }
        }

        match outcome {
            Ok(_) => tracing::debug!(key = %key, "Generation complete"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Generation failed"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::cache::FixedSizeEstimator;
    use crate::config::CacheConfig;

    fn coordinator<G>(generator: G, timeout: Option<Duration>) -> GenerationCoordinator<String, FixedSizeEstimator>
    where
        G: ArtifactGenerator<String> + 'static,
    {
        let cache = PageCache::new(
            CacheConfig {
                max_recent_pages: 10,
                max_total_size: u64::MAX,
            },
            FixedSizeEstimator(100),
        );
        GenerationCoordinator::new("book-1", cache, Arc::new(generator), timeout)
    }

    /// Generator that counts calls and sleeps before answering
    fn slow_counter(calls: Arc<AtomicUsize>, delay: Duration) -> impl ArtifactGenerator<String> {
        move |key: CacheKey| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok::<_, anyhow::Error>(format!("audio for {}", key))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_generation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(slow_counter(calls.clone(), Duration::from_millis(200)), None);

        let first = coordinator.get_or_create(3);
        let second = coordinator.get_or_create(3);
        assert!(coordinator.is_pending(3));
        assert_eq!(coordinator.pending_count(), 1);

        let (first, second) = tokio::join!(first, second);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap(), "audio for book-1#3");
        assert_eq!(second.unwrap(), "audio for book-1#3");
        assert!(!coordinator.is_pending(3));
        assert!(coordinator.cache().contains(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_generator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(slow_counter(calls.clone(), Duration::from_millis(10)), None);

        coordinator.get_or_create(1).await.unwrap();
        let again = coordinator.get_or_create(1).await.unwrap();

        assert_eq!(again, "audio for book-1#1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_externally_populated_page_is_a_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(slow_counter(calls.clone(), Duration::from_millis(10)), None);

        coordinator.cache().set(4, "preloaded".to_string());

        assert_eq!(coordinator.get_or_create(4).await.unwrap(), "preloaded");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_all_callers_and_reverts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let coordinator = coordinator(
            move |key: CacheKey| {
                let counter = Arc::clone(&counter);
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if attempt == 0 {
                        anyhow::bail!("vendor rejected request");
                    }
                    Ok(format!("retry ok for {}", key))
                }
            },
            None,
        );

        let (first, second) = tokio::join!(coordinator.get_or_create(2), coordinator.get_or_create(2));
        let first = first.unwrap_err();
        let second = second.unwrap_err();
        assert!(matches!(first, GenerationError::Failed { .. }));
        assert_eq!(first.key(), second.key());
        assert!(first.to_string().contains("vendor rejected request"));

        assert!(!coordinator.is_pending(2));
        assert!(!coordinator.cache().contains(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let retried = coordinator.get_or_create(2).await.unwrap();
        assert_eq!(retried, "retry ok for book-1#2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_generator_reverts_to_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let coordinator = coordinator(
            move |key: CacheKey| {
                let counter = Arc::clone(&counter);
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if attempt == 0 {
                        panic!("synthesizer crashed");
                    }
                    Ok::<_, anyhow::Error>(format!("recovered {}", key))
                }
            },
            None,
        );

        let error = coordinator.get_or_create(1).await.unwrap_err();
        assert!(matches!(error, GenerationError::Failed { .. }));
        assert!(error.to_string().contains("synthesizer crashed"));
        assert!(!coordinator.is_pending(1));
        assert!(!coordinator.cache().contains(1));

        let retried = coordinator.get_or_create(1).await.unwrap();
        assert_eq!(retried, "recovered book-1#1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reverts_to_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(
            slow_counter(calls.clone(), Duration::from_secs(30)),
            Some(Duration::from_secs(5)),
        );

        let result = coordinator.get_or_create(0).await;
        match result {
            Err(GenerationError::Timeout { key, after }) => {
                assert_eq!(key.page, 0);
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(!coordinator.is_pending(0));

        let _ = coordinator.get_or_create(0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_generation_still_commits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(slow_counter(calls.clone(), Duration::from_millis(100)), None);

        drop(coordinator.get_or_create(7));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(coordinator.cache().contains(7));
        assert!(!coordinator.is_pending(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_in_flight_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(slow_counter(calls.clone(), Duration::from_millis(100)), None);

        let in_flight = coordinator.get_or_create(5);
        coordinator.clear();
        assert!(!coordinator.is_pending(5));

        // Callers still get their result
        assert!(in_flight.await.is_ok());
        assert!(!coordinator.cache().contains(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_pages_generate_independently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = coordinator(slow_counter(calls.clone(), Duration::from_millis(20)), None);

        let (a, b, c) = tokio::join!(
            coordinator.get_or_create(0),
            coordinator.get_or_create(1),
            coordinator.get_or_create(0),
        );

        assert_eq!(a.unwrap(), c.unwrap());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.key(1).document_id, "book-1");
    }
}
