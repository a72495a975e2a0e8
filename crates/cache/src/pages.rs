//! Page cache for one viewing session
//!
//! Holds the ordered sequence of rendered pages. Each slot is written exactly
//! once and then read any number of times by the presenter and the thumbnail
//! strip. There is no update, invalidation or eviction; the cache is dropped
//! with the session that owns it.

use flipbook_render::RenderedPage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Errors from writing to the cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("page {index} is outside the document (page_count={page_count})")]
    OutOfRange { index: u32, page_count: u32 },

    #[error("page {index} has already been cached")]
    AlreadyWritten { index: u32 },

    #[error("expected {expected} pages in order, got page {got} at position {position}")]
    OutOfOrder { expected: u32, position: u32, got: u32 },

    #[error("expected {expected} pages, got {got}")]
    Incomplete { expected: u32, got: u32 },
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Number of pages currently cached
    pub pages: usize,

    /// Total encoded bytes held
    pub memory_used: usize,

    /// Soft memory budget in bytes, if any
    pub memory_limit: Option<usize>,

    /// Number of reads that found a page
    pub hits: u64,

    /// Number of reads for a page not yet cached
    pub misses: u64,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CacheState {
    slots: Vec<Option<Arc<RenderedPage>>>,
    memory_used: usize,
    hits: u64,
    misses: u64,
}

/// Write-once, read-many store of rendered pages.
///
/// # Example
///
/// ```
/// use flipbook_cache::PageCache;
///
/// let cache = PageCache::new(24);
/// assert!(!cache.is_complete());
/// assert!(cache.get(0).is_none());
/// ```
#[derive(Debug)]
pub struct PageCache {
    page_count: u32,
    memory_limit: Option<usize>,
    state: Mutex<CacheState>,
}

impl PageCache {
    /// Empty cache for a document of `page_count` pages.
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            memory_limit: None,
            state: Mutex::new(CacheState {
                slots: vec![None; page_count as usize],
                memory_used: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Set a soft memory budget. Going over it is reported, never enforced.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Store a page. Fails if the slot is already filled or out of range.
    pub fn insert(&self, page: RenderedPage) -> Result<Arc<RenderedPage>, CacheError> {
        let index = page.index;
        if index >= self.page_count {
            return Err(CacheError::OutOfRange { index, page_count: self.page_count });
        }

        let mut state = self.state();
        let slot = &mut state.slots[index as usize];
        if slot.is_some() {
            return Err(CacheError::AlreadyWritten { index });
        }

        let size = page.memory_size();
        let page = Arc::new(page);
        *slot = Some(page.clone());
        state.memory_used += size;

        if let Some(limit) = self.memory_limit {
            if state.memory_used > limit {
                log::warn!(
                    "page cache over budget: {} bytes used, {} allowed",
                    state.memory_used,
                    limit
                );
            }
        }

        Ok(page)
    }

    /// Store a complete, ordered page sequence.
    ///
    /// Nothing is written unless the sequence covers every page exactly once
    /// in index order.
    pub fn insert_all(&self, pages: Vec<RenderedPage>) -> Result<(), CacheError> {
        if pages.len() != self.page_count as usize {
            return Err(CacheError::Incomplete { expected: self.page_count, got: pages.len() as u32 });
        }
        for (position, page) in pages.iter().enumerate() {
            if page.index != position as u32 {
                return Err(CacheError::OutOfOrder {
                    expected: self.page_count,
                    position: position as u32,
                    got: page.index,
                });
            }
        }
        if let Some(index) = self.state().slots.iter().position(Option::is_some) {
            return Err(CacheError::AlreadyWritten { index: index as u32 });
        }

        for page in pages {
            self.insert(page)?;
        }
        Ok(())
    }

    /// Read a page, counting the hit or miss.
    pub fn get(&self, index: u32) -> Option<Arc<RenderedPage>> {
        let mut state = self.state();
        let page = state.slots.get(index as usize).cloned().flatten();
        if page.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        page
    }

    /// Whether `index` has been cached, without touching statistics.
    pub fn contains(&self, index: u32) -> bool {
        matches!(self.state().slots.get(index as usize), Some(Some(_)))
    }

    /// Snapshot of the cached pages in index order. Empty slots are skipped.
    pub fn pages(&self) -> Vec<Arc<RenderedPage>> {
        self.state().slots.iter().flatten().cloned().collect()
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.state().slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every page of the document is cached.
    pub fn is_complete(&self) -> bool {
        self.state().slots.iter().all(Option::is_some)
    }

    pub fn memory_used(&self) -> usize {
        self.state().memory_used
    }

    pub fn over_budget(&self) -> bool {
        self.memory_limit.is_some_and(|limit| self.memory_used() > limit)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            pages: state.slots.iter().filter(|slot| slot.is_some()).count(),
            memory_used: state.memory_used,
            memory_limit: self.memory_limit,
            hits: state.hits,
            misses: state.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipbook_render::PageFormat;

    fn page(index: u32, size: usize) -> RenderedPage {
        RenderedPage { index, width: 10, height: 10, format: PageFormat::Png, bytes: vec![0; size] }
    }

    #[test]
    fn test_cache_starts_empty() {
        let cache = PageCache::new(3);
        assert!(cache.is_empty());
        assert!(!cache.is_complete());
        assert_eq!(cache.page_count(), 3);
    }

    #[test]
    fn test_insert_and_get() {
        let cache = PageCache::new(2);
        cache.insert(page(1, 100)).expect("insert should succeed");

        assert_eq!(cache.get(1).map(|p| p.index), Some(1));
        assert!(cache.get(0).is_none());
        assert_eq!(cache.memory_used(), 100);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_pages_are_write_once() {
        let cache = PageCache::new(2);
        cache.insert(page(0, 10)).expect("first write succeeds");

        let err = cache.insert(page(0, 20)).expect_err("second write must fail");
        assert_eq!(err, CacheError::AlreadyWritten { index: 0 });
        assert_eq!(cache.memory_used(), 10);
    }

    #[test]
    fn test_out_of_range_insert() {
        let cache = PageCache::new(2);
        let err = cache.insert(page(2, 10)).expect_err("index 2 is out of range");
        assert_eq!(err, CacheError::OutOfRange { index: 2, page_count: 2 });
    }

    #[test]
    fn test_insert_all_complete_sequence() {
        let cache = PageCache::new(4);
        cache.insert_all((0..4).map(|i| page(i, 5)).collect()).expect("insert_all succeeds");

        assert!(cache.is_complete());
        assert_eq!(cache.len(), 4);
        let indices: Vec<u32> = cache.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_insert_all_rejects_gaps_and_disorder() {
        let cache = PageCache::new(3);

        let err = cache.insert_all(vec![page(0, 1), page(1, 1)]).expect_err("too short");
        assert_eq!(err, CacheError::Incomplete { expected: 3, got: 2 });

        let err = cache
            .insert_all(vec![page(0, 1), page(2, 1), page(1, 1)])
            .expect_err("out of order");
        assert!(matches!(err, CacheError::OutOfOrder { position: 1, got: 2, .. }));

        assert!(cache.is_empty());
    }

    #[test]
    fn test_contains_does_not_count() {
        let cache = PageCache::new(1);
        cache.insert(page(0, 1)).expect("insert succeeds");

        assert!(cache.contains(0));
        assert!(!cache.contains(5));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_soft_budget_is_reported_not_enforced() {
        let cache = PageCache::new(3).with_memory_limit(150);
        cache.insert(page(0, 100)).expect("insert succeeds");
        assert!(!cache.over_budget());

        cache.insert(page(1, 100)).expect("insert succeeds");
        assert!(cache.over_budget());
        assert!(cache.contains(0));
        assert_eq!(cache.stats().memory_limit, Some(150));
    }

    #[test]
    fn test_readers_share_pages() {
        let cache = PageCache::new(1);
        let stored = cache.insert(page(0, 8)).expect("insert succeeds");
        let read = cache.get(0).expect("page is cached");

        assert!(Arc::ptr_eq(&stored, &read));
    }
}
