//! Underlying page allocators.
//!
//! The arena and the row store never allocate page memory themselves; they
//! ask a `PageAllocator` handed to them at construction.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source of raw page buffers.
///
/// `allocate` returns `None` when the request cannot be satisfied; callers
/// surface that as `OutOfMemory`. Buffers must be handed back through
/// `deallocate` on the allocator that produced them.
pub trait PageAllocator: Send + Sync {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>>;

    fn deallocate(&self, page: Box<[u8]>);

    /// Bulk statistics hook, called once with the byte total after a full free.
    fn freed(&self, _bytes: usize) {}
}

impl<A: PageAllocator + ?Sized> PageAllocator for Arc<A> {
    #[inline]
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        (**self).allocate(size)
    }

    #[inline]
    fn deallocate(&self, page: Box<[u8]>) {
        (**self).deallocate(page)
    }

    #[inline]
    fn freed(&self, bytes: usize) {
        (**self).freed(bytes)
    }
}

/// Allocates zeroed buffers from the global heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageAllocator;

impl PageAllocator for SystemPageAllocator {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        Some(buf.into_boxed_slice())
    }

    fn deallocate(&self, page: Box<[u8]>) {
        drop(page);
    }
}

/// Caches freed buffers of one fixed size for reuse.
///
/// Requests of any other size pass straight through to the heap. Cached
/// buffers are handed out without being cleared.
pub struct PooledPageAllocator {
    page_size: usize,
    max_cached: usize,
    cache: Mutex<Vec<Box<[u8]>>>,
}

impl PooledPageAllocator {
    pub fn new(page_size: usize, max_cached: usize) -> Self {
        Self {
            page_size,
            max_cached,
            cache: Mutex::new(Vec::with_capacity(max_cached)),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of buffers currently held for reuse.
    pub fn cached_pages(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drops every cached buffer.
    pub fn trim(&self) {
        self.cache.lock().clear();
    }
}

impl PageAllocator for PooledPageAllocator {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        if size == self.page_size {
            if let Some(page) = self.cache.lock().pop() {
                return Some(page);
            }
        }
        SystemPageAllocator.allocate(size)
    }

    fn deallocate(&self, page: Box<[u8]>) {
        if page.len() == self.page_size {
            let mut cache = self.cache.lock();
            if cache.len() < self.max_cached {
                cache.push(page);
            }
        }
    }
}

/// Enforces a byte budget on top of another allocator.
pub struct LimitedPageAllocator<A: PageAllocator = SystemPageAllocator> {
    inner: A,
    limit: usize,
    allocated: AtomicUsize,
    pages: AtomicUsize,
}

impl LimitedPageAllocator<SystemPageAllocator> {
    pub fn new(limit: usize) -> Self {
        Self::wrap(SystemPageAllocator, limit)
    }
}

impl<A: PageAllocator> LimitedPageAllocator<A> {
    pub fn wrap(inner: A, limit: usize) -> Self {
        Self {
            inner,
            limit,
            allocated: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently handed out and not yet returned.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Buffers currently handed out and not yet returned.
    pub fn outstanding_pages(&self) -> usize {
        self.pages.load(Ordering::Acquire)
    }
}

impl<A: PageAllocator> PageAllocator for LimitedPageAllocator<A> {
    fn allocate(&self, size: usize) -> Option<Box<[u8]>> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(size).filter(|total| *total <= self.limit)
            })
            .ok()?;

        match self.inner.allocate(size) {
            Some(page) => {
                self.pages.fetch_add(1, Ordering::AcqRel);
                Some(page)
            }
            None => {
                self.allocated.fetch_sub(size, Ordering::AcqRel);
                None
            }
        }
    }

    fn deallocate(&self, page: Box<[u8]>) {
        self.allocated.fetch_sub(page.len(), Ordering::AcqRel);
        self.pages.fetch_sub(1, Ordering::AcqRel);
        self.inner.deallocate(page);
    }

    fn freed(&self, bytes: usize) {
        self.inner.freed(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocator() {
        let alloc = SystemPageAllocator;
        let page = alloc.allocate(4096).unwrap();
        assert_eq!(page.len(), 4096);
        assert!(page.iter().all(|b| *b == 0));
        alloc.deallocate(page);
    }

    #[test]
    fn test_system_allocator_refuses_impossible_size() {
        assert!(SystemPageAllocator.allocate(usize::MAX).is_none());
    }

    #[test]
    fn test_pooled_allocator_reuses_pages() {
        let alloc = PooledPageAllocator::new(1024, 2);
        let a = alloc.allocate(1024).unwrap();
        let b = alloc.allocate(1024).unwrap();
        let c = alloc.allocate(1024).unwrap();
        alloc.deallocate(a);
        alloc.deallocate(b);
        alloc.deallocate(c);
        assert_eq!(alloc.cached_pages(), 2);

        let reused = alloc.allocate(1024).unwrap();
        assert_eq!(reused.len(), 1024);
        assert_eq!(alloc.cached_pages(), 1);

        alloc.trim();
        assert_eq!(alloc.cached_pages(), 0);
    }

    #[test]
    fn test_pooled_allocator_passes_other_sizes_through() {
        let alloc = PooledPageAllocator::new(1024, 4);
        let big = alloc.allocate(4096).unwrap();
        assert_eq!(big.len(), 4096);
        alloc.deallocate(big);
        assert_eq!(alloc.cached_pages(), 0);
    }

    #[test]
    fn test_limited_allocator_enforces_budget() {
        let alloc = LimitedPageAllocator::new(3000);
        let a = alloc.allocate(1000).unwrap();
        let b = alloc.allocate(2000).unwrap();
        assert!(alloc.allocate(1).is_none());
        assert_eq!(alloc.allocated_bytes(), 3000);
        assert_eq!(alloc.outstanding_pages(), 2);

        alloc.deallocate(a);
        assert_eq!(alloc.allocated_bytes(), 2000);
        assert!(alloc.allocate(1000).is_some_and(|p| {
            alloc.deallocate(p);
            true
        }));
        alloc.deallocate(b);
        assert_eq!(alloc.allocated_bytes(), 0);
        assert_eq!(alloc.outstanding_pages(), 0);
    }

    #[test]
    fn test_shared_allocator_through_arc() {
        let shared = Arc::new(LimitedPageAllocator::new(4096));
        let handle: Arc<LimitedPageAllocator> = Arc::clone(&shared);
        let page = handle.allocate(1024).unwrap();
        assert_eq!(shared.allocated_bytes(), 1024);
        handle.deallocate(page);
        assert_eq!(shared.allocated_bytes(), 0);
    }

    #[test]
    fn test_limited_allocator_concurrent() {
        let alloc = Arc::new(LimitedPageAllocator::new(64 * 1024));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if let Some(page) = alloc.allocate(1024) {
                            alloc.deallocate(page);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(alloc.allocated_bytes(), 0);
        assert_eq!(alloc.outstanding_pages(), 0);
    }
}
