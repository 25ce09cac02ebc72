//! Reading session registry
//!
//! Owns one page cache, coordinator and prefetch scheduler per open
//! document. The registry is created by the reading context and torn down
//! with it; nothing here is global. Documents never share cache state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{CacheStats, PageCache, SizeEstimator};
use crate::config::PipelineConfig;
use crate::error::SessionError;
use crate::generation::{ArtifactFuture, ArtifactGenerator, GenerationCoordinator};
use crate::prefetch::{PrefetchScheduler, SchedulerStats};

// ============================================================================
// Session Registry
// ============================================================================

/// Open documents for one artifact type
pub struct SessionRegistry<T: Send + 'static, E> {
    config: PipelineConfig,
    generator: Arc<dyn ArtifactGenerator<T>>,
    estimator: E,
    sessions: RwLock<HashMap<String, Arc<DocumentSession<T, E>>>>,
}

impl<T, E> SessionRegistry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: SizeEstimator<T> + Clone + 'static,
{
    pub fn new(config: PipelineConfig, generator: Arc<dyn ArtifactGenerator<T>>, estimator: E) -> Self {
        Self {
            config,
            generator,
            estimator,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a document at `start_page`, or return its existing session
    ///
    /// Starts the scheduler's tick task and the initial prefetch.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        &self,
        document_id: &str,
        page_count: usize,
        start_page: usize,
    ) -> Result<Arc<DocumentSession<T, E>>, SessionError> {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(document_id) {
            return Ok(Arc::clone(existing));
        }

        if page_count == 0 {
            return Err(SessionError::EmptyDocument(document_id.to_string()));
        }

        let cache = PageCache::new(self.config.cache.clone(), self.estimator.clone());
        let coordinator = GenerationCoordinator::new(
            document_id,
            cache,
            Arc::clone(&self.generator),
            self.config.scheduler.generation_timeout(),
        );
        let scheduler = PrefetchScheduler::new(coordinator.clone(), page_count, self.config.scheduler.clone());
        let ticker = scheduler.start();

        let session = Arc::new(DocumentSession {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            opened_at: Utc::now(),
            coordinator,
            scheduler,
            ticker: Mutex::new(Some(ticker)),
        });

        tracing::info!(
            session_id = %session.id,
            document_id = %document_id,
            page_count,
            start_page,
            "Opened reading session"
        );

        session.navigate(start_page);
        sessions.insert(document_id.to_string(), Arc::clone(&session));

        Ok(session)
    }

    pub fn get(&self, document_id: &str) -> Option<Arc<DocumentSession<T, E>>> {
        self.sessions.read().get(document_id).cloned()
    }

    /// Close a document, dropping its cached artifacts
    ///
    /// Returns `false` if the document was not open.
    pub fn close(&self, document_id: &str) -> bool {
        let removed = self.sessions.write().remove(document_id);
        match removed {
            Some(session) => {
                session.shutdown();
                true
            }
            None => false,
        }
    }

    /// Close every open document, returning how many were closed
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().map(|(_, session)| session).collect();
        for session in &drained {
            session.shutdown();
        }
        drained.len()
    }

    /// IDs of open documents, sorted
    pub fn open_documents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

// ============================================================================
// Document Session
// ============================================================================

/// One open document's cache, coordinator and scheduler
pub struct DocumentSession<T: Send + 'static, E> {
    id: Uuid,
    document_id: String,
    opened_at: DateTime<Utc>,
    coordinator: GenerationCoordinator<T, E>,
    scheduler: PrefetchScheduler<T, E>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Session snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub document_id: String,
    pub current_page: Option<usize>,
    pub pending: usize,
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
}

impl<T, E> DocumentSession<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: SizeEstimator<T> + 'static,
{
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn page_count(&self) -> usize {
        self.scheduler.page_count()
    }

    pub fn current_page(&self) -> Option<usize> {
        self.scheduler.current_page()
    }

    /// Report a page transition
    pub fn navigate(&self, page: usize) {
        self.scheduler.on_page_change(page);
    }

    /// Request a page's artifact directly (e.g. the reader pressed play)
    ///
    /// The caller is responsible for passing a page within the document.
    pub fn request(&self, page: usize) -> ArtifactFuture<T> {
        self.coordinator.get_or_create(page)
    }

    pub fn coordinator(&self) -> &GenerationCoordinator<T, E> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &PrefetchScheduler<T, E> {
        &self.scheduler
    }

    pub async fn wait_until_idle(&self) {
        self.scheduler.wait_until_idle().await;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            document_id: self.document_id.clone(),
            current_page: self.scheduler.current_page(),
            pending: self.coordinator.pending_count(),
            cache: self.coordinator.cache().stats(),
            scheduler: self.scheduler.stats(),
        }
    }

    /// Stop prefetching and drop all cached artifacts
    ///
    /// Queued prefetches are discarded. Generations already in flight still
    /// finish, but their results are not cached.
    pub fn shutdown(&self) {
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        self.scheduler.shutdown();
        self.coordinator.clear();

        tracing::info!(
            session_id = %self.id,
            document_id = %self.document_id,
            "Closed reading session"
        );
    }
}

impl<T: Send + 'static, E> Drop for DocumentSession<T, E> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}
