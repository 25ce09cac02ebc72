//! Bounded-concurrency prefetch scheduler
//!
//! Watches the reader's position and keeps the pages around it generated:
//! the current page first, then its neighbours, then an optional lookahead
//! run of forward pages. Excess targets wait in a FIFO queue that is
//! drained on every completion and on a periodic tick.
//!
//! Failures are logged and otherwise ignored. The next tick re-plans the
//! current window, which retries anything that failed.
//!
//! After `shutdown` the scheduler dispatches nothing further. Generations
//! already handed to the coordinator run to completion.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::SizeEstimator;
use crate::config::SchedulerConfig;
use crate::error::GenerationResult;
use crate::generation::GenerationCoordinator;

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Targets waiting in the queue
    pub queued: usize,
    /// Targets currently being generated
    pub active: usize,
    /// Targets handed to the coordinator so far
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Queued targets that were already cached by dispatch time
    pub skipped: u64,
}

/// Prefetch scheduler for one document
pub struct PrefetchScheduler<T: Send + 'static, E> {
    inner: Arc<SchedulerInner<T, E>>,
}

struct SchedulerInner<T: Send + 'static, E> {
    coordinator: GenerationCoordinator<T, E>,
    config: SchedulerConfig,
    page_count: usize,
    state: Mutex<SchedulerState>,
    /// Signalled whenever the queue and active set both run empty
    idle: Notify,
}

#[derive(Default)]
struct SchedulerState {
    current_page: Option<usize>,
    queue: VecDeque<usize>,
    active: HashSet<usize>,
    stats: SchedulerStats,
    closed: bool,
}

impl<T: Send + 'static, E> Clone for PrefetchScheduler<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> PrefetchScheduler<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: SizeEstimator<T> + 'static,
{
    /// Create a scheduler for a document with `page_count` pages
    pub fn new(
        coordinator: GenerationCoordinator<T, E>,
        page_count: usize,
        mut config: SchedulerConfig,
    ) -> Self {
        if config.max_concurrent_requests == 0 {
            tracing::warn!("max_concurrent_requests is 0, using 1");
            config.max_concurrent_requests = 1;
        }

        Self {
            inner: Arc::new(SchedulerInner {
                coordinator,
                config,
                page_count,
                state: Mutex::new(SchedulerState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Handle a document open or page turn
    ///
    /// Moves the cache's adjacency window, plans new targets ahead of the
    /// existing backlog and dispatches as many as the concurrency cap allows.
    /// Out-of-range pages are clamped to the last page.
    pub fn on_page_change(&self, page: usize) {
        let Some(last_page) = self.inner.page_count.checked_sub(1) else {
            return;
        };
        let page = page.min(last_page);

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.current_page = Some(page);
        }
        self.inner.coordinator.cache().set_current_page(page);

        tracing::debug!(
            document_id = %self.inner.coordinator.document_id(),
            page,
            "Reader moved"
        );

        let plan = self.plan(page);
        self.enqueue(plan);
        self.drain();
    }

    /// Re-plan the current window and drain the queue
    pub fn tick(&self) {
        let current = {
            let state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.current_page
        };
        if let Some(current) = current {
            let plan = self.plan(current);
            self.enqueue(plan);
        }
        self.drain();
    }

    /// Dispatch queued targets while below the concurrency cap
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn drain(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }

        while state.active.len() < self.inner.config.max_concurrent_requests {
            let Some(page) = state.queue.pop_front() else {
                break;
            };

            if !self.inner.coordinator.cache().needs_fetch(page) {
                state.stats.skipped += 1;
                continue;
            }

            state.active.insert(page);
            state.stats.dispatched += 1;

            let generation = self.inner.coordinator.get_or_create(page);
            let scheduler = self.clone();
            tokio::spawn(async move {
                let outcome = generation.await.map(|_| ());
                scheduler.complete(page, outcome);
            });
        }
    }

    /// Start the periodic tick task
    ///
    /// The task stops on its own once every scheduler handle is dropped.
    pub fn start(&self) -> JoinHandle<()> {
        let period = self.inner.config.tick_interval();
        let weak: Weak<SchedulerInner<T, E>> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                PrefetchScheduler { inner }.tick();
            }
        })
    }

    /// Stop dispatching and drop the backlog
    ///
    /// In-flight generations are not cancelled; their completions no longer
    /// pull from the queue. Idempotent.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };

        tracing::debug!(
            document_id = %self.inner.coordinator.document_id(),
            dropped,
            "Prefetch scheduler shut down"
        );

        if self.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Wait until nothing is queued or in flight
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.queue.is_empty() && state.active.is_empty()
    }

    /// Queued targets in dispatch order
    pub fn queued_pages(&self) -> Vec<usize> {
        self.inner.state.lock().queue.iter().copied().collect()
    }

    /// Targets currently being generated, sorted
    pub fn active_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.inner.state.lock().active.iter().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn current_page(&self) -> Option<usize> {
        self.inner.state.lock().current_page
    }

    pub fn page_count(&self) -> usize {
        self.inner.page_count
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            queued: state.queue.len(),
            active: state.active.len(),
            ..state.stats.clone()
        }
    }

    /// Targets for `current` in dispatch order: current page, neighbours, lookahead
    fn plan(&self, current: usize) -> Vec<usize> {
        let page_count = self.inner.page_count;
        let lookahead_pages = self.inner.config.lookahead_pages;

        let targets: Vec<usize> = {
            let mut cache = self.inner.coordinator.cache();

            let mut window: Vec<usize> = cache
                .prefetch_targets()
                .into_iter()
                .filter(|page| *page < page_count)
                .collect();
            if let Some(position) = window.iter().position(|page| *page == current) {
                let page = window.remove(position);
                window.insert(0, page);
            }

            let lookahead = (current.saturating_add(2)..page_count)
                .take(lookahead_pages)
                .filter(|page| cache.needs_fetch(*page));
            window.extend(lookahead);
            window
        };

        targets
            .into_iter()
            .filter(|page| !self.inner.coordinator.is_pending(*page))
            .collect()
    }

    /// Put a new plan ahead of the backlog, dropping duplicates
    fn enqueue(&self, plan: Vec<usize>) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }

        let mut fresh: Vec<usize> = Vec::with_capacity(plan.len());
        for page in plan {
            if !state.active.contains(&page) && !fresh.contains(&page) {
                fresh.push(page);
            }
        }

        state.queue.retain(|page| !fresh.contains(page));
        for page in fresh.into_iter().rev() {
            state.queue.push_front(page);
        }
    }

    fn complete(&self, page: usize, outcome: GenerationResult<()>) {
        {
            let mut state = self.inner.state.lock();
            state.active.remove(&page);
            match outcome {
                Ok(()) => state.stats.succeeded += 1,
                Err(_) => state.stats.failed += 1,
            }
        }

        if let Err(e) = outcome {
            tracing::warn!(
                document_id = %self.inner.coordinator.document_id(),
                page,
                error = %e,
                "Prefetch failed, continuing with queue"
            );
        }

        self.drain();

        if self.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }
}
