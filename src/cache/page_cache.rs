//! Adjacency-aware page cache
//!
//! Two tiers per document:
//! - **Adjacency**: the previous, current and next page. Entries here are
//!   protected and never evicted under memory pressure.
//! - **Recent queue**: everything else, most recently touched first.
//!   Bounded by entry count and drained from the tail when the memory
//!   budget is exceeded.
//!
//! Moving the current page migrates entries between the tiers instead of
//! discarding them, so paging back and forth keeps its artifacts warm.
//!
//! # Budget overflow
//!
//! The budget is a target, not a hard ceiling. Adjacency entries are never
//! evicted, and the single most recently touched recent entry is spared as
//! well, so one oversized insert temporarily overflows the budget instead
//! of being rejected. The next insert or page change evicts it normally.

use std::collections::{BTreeMap, VecDeque};

use crate::config::CacheConfig;

use super::estimator::SizeEstimator;
use super::types::{format_bytes, CacheEntry, CacheStats, MAX_ADJACENT_PAGES};

/// Pages on each side of the current page inside the adjacency window
const WINDOW_RADIUS: usize = MAX_ADJACENT_PAGES / 2;

/// Per-document page cache, generic over the artifact type
pub struct PageCache<T, E> {
    /// Protected tier, keyed by page index
    adjacent: BTreeMap<usize, CacheEntry<T>>,
    /// Unprotected tier, front = most recently touched
    recent: VecDeque<(usize, CacheEntry<T>)>,
    /// Current page, `None` until the first `set_current_page`
    current: Option<usize>,
    /// Running sum of `size_bytes` over both tiers
    total_size: u64,
    estimator: E,
    config: CacheConfig,
}

impl<T, E> PageCache<T, E>
where
    E: SizeEstimator<T>,
{
    /// Create an empty cache
    pub fn new(config: CacheConfig, estimator: E) -> Self {
        Self {
            adjacent: BTreeMap::new(),
            recent: VecDeque::new(),
            current: None,
            total_size: 0,
            estimator,
            config,
        }
    }

    /// Move the adjacency window to `page`
    ///
    /// A step of one page migrates only the entries that leave the window.
    /// A jump (or the first call) migrates the whole adjacency tier. Either
    /// way, displaced entries go to the front of the recent queue, and
    /// recent entries that land inside the new window are promoted.
    pub fn set_current_page(&mut self, page: usize) {
        let previous = self.current;
        if previous == Some(page) {
            return;
        }
        self.current = Some(page);

        let is_step = matches!(previous, Some(prev) if prev.abs_diff(page) == 1);
        let displaced: Vec<usize> = if is_step {
            self.adjacent
                .keys()
                .copied()
                .filter(|index| !self.in_window(*index))
                .collect()
        } else {
            self.adjacent.keys().copied().collect()
        };

        for index in displaced {
            if let Some(entry) = self.adjacent.remove(&index) {
                self.recent.push_front((index, entry));
            }
        }

        // Pull anything now inside the window back into the protected tier
        let mut position = 0;
        while position < self.recent.len() {
            if self.in_window(self.recent[position].0) {
                if let Some((index, entry)) = self.recent.remove(position) {
                    self.adjacent.insert(index, entry);
                }
            } else {
                position += 1;
            }
        }

        tracing::trace!(
            page,
            previous = ?previous,
            jump = !is_step,
            adjacent = self.adjacent.len(),
            recent = self.recent.len(),
            "Moved adjacency window"
        );

        self.truncate_recent();
        self.enforce_memory_limits();
    }

    /// Look up a page, promoting a recent-queue hit to the front
    pub fn get(&mut self, page: usize) -> Option<&T> {
        if self.adjacent.contains_key(&page) {
            return self.adjacent.get(&page).map(|entry| &entry.data);
        }

        let position = self.recent.iter().position(|(index, _)| *index == page)?;
        if position > 0 {
            let hit = self.recent.remove(position)?;
            self.recent.push_front(hit);
        }
        self.recent.front().map(|(_, entry)| &entry.data)
    }

    /// Check presence without touching recency
    pub fn contains(&self, page: usize) -> bool {
        self.adjacent.contains_key(&page) || self.recent.iter().any(|(index, _)| *index == page)
    }

    /// Insert or replace a page's artifact
    pub fn set(&mut self, page: usize, data: T) {
        let size_bytes = self.estimator.estimate(&data);
        self.remove(page);

        let entry = CacheEntry::new(data, size_bytes);
        self.total_size += size_bytes;

        if self.in_window(page) {
            self.adjacent.insert(page, entry);
        } else {
            self.recent.push_front((page, entry));
            self.truncate_recent();
        }

        tracing::trace!(page, size_bytes, total_size = self.total_size, "Cached page");

        self.enforce_memory_limits();
    }

    /// Whether a page still has to be generated
    ///
    /// Goes through [`get`](Self::get), so a hit counts as a touch.
    pub fn needs_fetch(&mut self, page: usize) -> bool {
        self.get(page).is_none()
    }

    /// Missing pages of the adjacency window, in `[prev, current, next]` order
    ///
    /// The cache has no notion of page count, so callers clamp the upper bound.
    pub fn prefetch_targets(&mut self) -> Vec<usize> {
        let Some(current) = self.current else {
            return Vec::new();
        };

        let window = current.saturating_sub(WINDOW_RADIUS)..=current.saturating_add(WINDOW_RADIUS);
        window
            .filter(|page| self.needs_fetch(*page))
            .collect()
    }

    /// Evict from the recent-queue tail until within budget
    ///
    /// Adjacency entries and the most recently touched recent entry are
    /// never evicted here, even if that leaves the cache over budget.
    pub fn enforce_memory_limits(&mut self) {
        while self.total_size > self.config.max_total_size && self.recent.len() > 1 {
            if let Some((page, entry)) = self.recent.pop_back() {
                self.total_size -= entry.size_bytes;
                tracing::debug!(
                    page,
                    size_bytes = entry.size_bytes,
                    total_size = self.total_size,
                    max_total_size = self.config.max_total_size,
                    "Evicted page under memory pressure"
                );
            }
        }
    }

    /// Snapshot of the cache layout
    pub fn stats(&self) -> CacheStats {
        let memory_utilization = if self.config.max_total_size == 0 {
            0.0
        } else {
            self.total_size as f64 / self.config.max_total_size as f64
        };

        CacheStats {
            adjacent_pages: self.adjacent.keys().copied().collect(),
            recent_pages: self.recent.iter().map(|(index, _)| *index).collect(),
            total_size: self.total_size,
            total_size_formatted: format_bytes(self.total_size),
            max_total_size: self.config.max_total_size,
            memory_utilization,
        }
    }

    /// Drop every entry in both tiers
    pub fn clear(&mut self) {
        self.adjacent.clear();
        self.recent.clear();
        self.total_size = 0;
    }

    /// Combined size of all entries in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.adjacent.len() + self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacent.is_empty() && self.recent.is_empty()
    }

    pub fn current_page(&self) -> Option<usize> {
        self.current
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn in_window(&self, page: usize) -> bool {
        match self.current {
            Some(current) => page.abs_diff(current) <= WINDOW_RADIUS,
            None => false,
        }
    }

    fn remove(&mut self, page: usize) {
        if let Some(entry) = self.adjacent.remove(&page) {
            self.total_size -= entry.size_bytes;
            return;
        }
        if let Some(position) = self.recent.iter().position(|(index, _)| *index == page) {
            if let Some((_, entry)) = self.recent.remove(position) {
                self.total_size -= entry.size_bytes;
            }
        }
    }

    fn truncate_recent(&mut self) {
        while self.recent.len() > self.config.max_recent_pages {
            if let Some((page, entry)) = self.recent.pop_back() {
                self.total_size -= entry.size_bytes;
                tracing::trace!(page, "Dropped page from full recent queue");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::estimator::FixedSizeEstimator;

    fn cache(max_recent_pages: usize, max_total_size: u64) -> PageCache<String, FixedSizeEstimator> {
        PageCache::new(
            CacheConfig {
                max_recent_pages,
                max_total_size,
            },
            FixedSizeEstimator(300),
        )
    }

    fn roomy() -> PageCache<String, FixedSizeEstimator> {
        cache(10, u64::MAX)
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let mut cache = roomy();
        cache.set_current_page(3);
        cache.set(3, "three".into());
        cache.set(9, "nine".into());

        assert_eq!(cache.get(3).map(String::as_str), Some("three"));
        assert_eq!(cache.get(9).map(String::as_str), Some("nine"));
        assert_eq!(cache.get(4), None);
    }

    #[test]
    fn test_set_before_any_page_goes_to_recent() {
        let mut cache = roomy();
        cache.set(0, "zero".into());

        let stats = cache.stats();
        assert!(stats.adjacent_pages.is_empty());
        assert_eq!(stats.recent_pages, vec![0]);
        assert!(cache.prefetch_targets().is_empty());
    }

    #[test]
    fn test_prefetch_targets_on_empty_cache() {
        let mut cache = roomy();
        cache.set_current_page(5);
        assert_eq!(cache.prefetch_targets(), vec![4, 5, 6]);
    }

    #[test]
    fn test_prefetch_targets_skip_cached_pages() {
        let mut cache = roomy();
        cache.set_current_page(5);
        cache.set(5, "five".into());
        assert_eq!(cache.prefetch_targets(), vec![4, 6]);
    }

    #[test]
    fn test_prefetch_targets_at_first_page() {
        let mut cache = roomy();
        cache.set_current_page(0);
        assert_eq!(cache.prefetch_targets(), vec![0, 1]);
    }

    #[test]
    fn test_forward_reading_migrates_to_front() {
        let mut cache = roomy();
        cache.set_current_page(1);
        cache.set(0, "p0".into());
        cache.set(1, "p1".into());
        cache.set(2, "p2".into());

        for next in 2..=5 {
            cache.set_current_page(next);
            cache.set(next + 1, format!("p{}", next + 1));
            let displaced = next - 2;
            assert_eq!(cache.stats().recent_pages.first(), Some(&displaced));
        }

        let stats = cache.stats();
        assert_eq!(stats.adjacent_pages, vec![4, 5, 6]);
        assert_eq!(stats.recent_pages, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_migration_preserves_data_and_size() {
        let mut cache = roomy();
        cache.set_current_page(1);
        cache.set(0, "p0".into());
        let before = cache.total_size();

        cache.set_current_page(2);
        assert_eq!(cache.total_size(), before);
        assert_eq!(cache.stats().recent_pages, vec![0]);
        assert_eq!(cache.get(0).map(String::as_str), Some("p0"));
    }

    #[test]
    fn test_jump_migrates_whole_window() {
        let mut cache = roomy();
        cache.set_current_page(2);
        cache.set(1, "p1".into());
        cache.set(2, "p2".into());
        cache.set(3, "p3".into());

        cache.set_current_page(20);

        let stats = cache.stats();
        assert!(stats.adjacent_pages.is_empty());
        assert_eq!(stats.recent_pages, vec![3, 2, 1]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_jump_back_promotes_recent_into_window() {
        let mut cache = roomy();
        cache.set_current_page(2);
        cache.set(1, "p1".into());
        cache.set(2, "p2".into());
        cache.set(3, "p3".into());

        cache.set_current_page(20);
        cache.set_current_page(2);

        let stats = cache.stats();
        assert_eq!(stats.adjacent_pages, vec![1, 2, 3]);
        assert!(stats.recent_pages.is_empty());
        assert!(cache.prefetch_targets().is_empty());
    }

    #[test]
    fn test_same_page_is_noop() {
        let mut cache = roomy();
        cache.set_current_page(4);
        cache.set(4, "p4".into());
        cache.set_current_page(4);
        assert_eq!(cache.stats().adjacent_pages, vec![4]);
    }

    #[test]
    fn test_recent_hit_promotes_to_front() {
        let mut cache = roomy();
        cache.set_current_page(50);
        cache.set(1, "p1".into());
        cache.set(2, "p2".into());
        cache.set(3, "p3".into());
        assert_eq!(cache.stats().recent_pages, vec![3, 2, 1]);

        assert!(cache.get(1).is_some());
        assert_eq!(cache.stats().recent_pages, vec![1, 3, 2]);
    }

    #[test]
    fn test_contains_does_not_promote() {
        let mut cache = roomy();
        cache.set_current_page(50);
        cache.set(1, "p1".into());
        cache.set(2, "p2".into());

        assert!(cache.contains(1));
        assert_eq!(cache.stats().recent_pages, vec![2, 1]);
    }

    #[test]
    fn test_recent_queue_is_bounded() {
        let mut cache = cache(2, u64::MAX);
        cache.set_current_page(50);
        for page in 0..5 {
            cache.set(page, format!("p{}", page));
        }

        assert_eq!(cache.stats().recent_pages, vec![4, 3]);
        assert_eq!(cache.total_size(), 600);
    }

    #[test]
    fn test_migration_respects_recent_bound() {
        let mut cache = cache(1, u64::MAX);
        cache.set_current_page(2);
        cache.set(1, "p1".into());
        cache.set(2, "p2".into());
        cache.set(3, "p3".into());

        cache.set_current_page(30);

        assert_eq!(cache.stats().recent_pages.len(), 1);
        assert_eq!(cache.total_size(), 300);
    }

    #[test]
    fn test_replacing_an_entry_keeps_size_accounting() {
        let mut cache = roomy();
        cache.set_current_page(0);
        cache.set(0, "old".into());
        cache.set(0, "new".into());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_size(), 300);
        assert_eq!(cache.get(0).map(String::as_str), Some("new"));
    }

    #[test]
    fn test_bounded_eviction_under_pressure() {
        let mut cache = cache(2, 1000);
        cache.set_current_page(2);
        for page in 0..=4 {
            cache.set(page, format!("p{}", page));
        }

        let stats = cache.stats();
        assert_eq!(stats.adjacent_pages, vec![1, 2, 3]);
        assert_eq!(stats.recent_pages, vec![4]);
        assert!(!cache.contains(0));
        assert_eq!(stats.total_size, 1200);
    }

    #[test]
    fn test_adjacency_never_evicted() {
        let mut cache = cache(5, 500);
        for current in [3usize, 4, 5, 9, 10, 2, 1, 0] {
            cache.set_current_page(current);
            for page in current.saturating_sub(1)..=current + 1 {
                cache.set(page, format!("p{}", page));
            }
            for far in [40usize, 41, 42] {
                cache.set(far, "far".into());
            }
            cache.enforce_memory_limits();

            for page in current.saturating_sub(1)..=current + 1 {
                assert!(cache.contains(page), "page {} evicted at current {}", page, current);
            }
        }
    }

    #[test]
    fn test_oversized_adjacent_entry_overflows_budget() {
        let mut cache: PageCache<String, _> = PageCache::new(
            CacheConfig {
                max_recent_pages: 4,
                max_total_size: 1000,
            },
            |value: &String| value.len() as u64,
        );
        cache.set_current_page(1);
        cache.set(10, "x".repeat(100));
        cache.set(1, "y".repeat(5000));

        assert!(cache.contains(1));
        assert_eq!(cache.total_size(), 5100);
        assert!(cache.stats().memory_utilization > 1.0);
    }

    #[test]
    fn test_oversized_recent_entry_evicts_older_entries_first() {
        let mut cache: PageCache<String, _> = PageCache::new(
            CacheConfig {
                max_recent_pages: 4,
                max_total_size: 1000,
            },
            |value: &String| value.len() as u64,
        );
        cache.set_current_page(50);
        cache.set(1, "a".repeat(200));
        cache.set(2, "b".repeat(200));
        cache.set(3, "c".repeat(2000));

        // The newest entry overflows alone until something newer arrives
        assert_eq!(cache.stats().recent_pages, vec![3]);
        assert_eq!(cache.total_size(), 2000);

        cache.set(4, "d".repeat(100));
        assert_eq!(cache.stats().recent_pages, vec![4]);
        assert_eq!(cache.total_size(), 100);
    }

    #[test]
    fn test_stats_report_utilization() {
        let mut cache = cache(4, 1200);
        cache.set_current_page(1);
        cache.set(0, "p0".into());
        cache.set(1, "p1".into());

        let stats = cache.stats();
        assert_eq!(stats.total_size, 600);
        assert_eq!(stats.total_size_formatted, "600 B");
        assert!((stats.memory_utilization - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_holds_max_adjacent_pages() {
        let mut cache = roomy();
        cache.set_current_page(10);
        for page in 7..=13 {
            cache.set(page, format!("p{}", page));
        }

        let stats = cache.stats();
        assert_eq!(stats.adjacent_pages.len(), MAX_ADJACENT_PAGES);
        assert_eq!(stats.adjacent_pages, vec![9, 10, 11]);
        assert_eq!(stats.recent_pages.len(), 4);
    }

    #[test]
    fn test_clear() {
        let mut cache = roomy();
        cache.set_current_page(1);
        cache.set(1, "p1".into());
        cache.set(7, "p7".into());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_size(), 0);
        assert_eq!(cache.prefetch_targets(), vec![0, 1, 2]);
    }
}
