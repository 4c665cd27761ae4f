//! Bump-pointer page arena.

use super::allocator::{PageAllocator, SystemPageAllocator};
use super::page::ArenaPage;
use strata_common::config::{ArenaConfig, ReleaseThrottle};
use strata_common::page::{align_offset, NATURAL_ALIGN, PAGE_HEADER_SIZE};
use strata_common::{Result, StrataError};
use tracing::{debug, error, info, warn};

/// Handle to a region handed out by a `PageArena`.
///
/// A span only resolves while the arena generation it was created in is
/// current. `free`, `reuse`, `fast_reuse` and `release_throttled` start a new
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSpan {
    page: usize,
    offset: usize,
    len: usize,
    generation: u64,
}

impl ArenaSpan {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot of the page holding this span.
    #[inline]
    pub fn page(&self) -> usize {
        self.page
    }

    /// Byte offset of the span inside its page, header included.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Page arena.
///
/// Hands out sub-page regions from a chain of pages obtained from a
/// `PageAllocator`. Regions are never freed individually; memory comes back
/// only through `free`, `reuse` or `release_throttled`.
///
/// Pages live in a slab and are chained by slot index:
/// - ordinary pages are `page_size` bytes and are appended at the tail
/// - requests larger than `page_limit` get a dedicated page linked at the head
/// - the current page is the one front allocations bump
///
/// Not internally synchronized; one owner at a time.
pub struct PageArena<A: PageAllocator = SystemPageAllocator> {
    /// Source of page buffers.
    allocator: A,
    /// Page slab. `None` marks a vacant slot.
    slots: Vec<Option<ArenaPage>>,
    /// Vacant slot indices.
    vacant: Vec<usize>,
    /// First page of the chain.
    header: Option<usize>,
    /// Last page of the chain.
    tailer: Option<usize>,
    /// Page serving front allocations.
    current: Option<usize>,
    /// Size of an ordinary page, header included.
    page_size: usize,
    /// Usable bytes of an empty ordinary page.
    page_limit: usize,
    /// Number of pages in the chain.
    pages: usize,
    /// Bytes handed out to callers, alignment padding included.
    used: usize,
    /// Bytes held in pages.
    total: usize,
    /// Bumped whenever outstanding spans become invalid.
    generation: u64,
}

impl PageArena<SystemPageAllocator> {
    /// Creates an arena backed by the global heap.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        Self::with_allocator(config, SystemPageAllocator)
    }
}

impl Default for PageArena<SystemPageAllocator> {
    fn default() -> Self {
        Self::from_parts(ArenaConfig::default(), SystemPageAllocator)
    }
}

impl<A: PageAllocator> PageArena<A> {
    /// Creates an arena drawing pages from `allocator`.
    pub fn with_allocator(config: ArenaConfig, allocator: A) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, allocator))
    }

    fn from_parts(config: ArenaConfig, allocator: A) -> Self {
        Self {
            allocator,
            slots: Vec::new(),
            vacant: Vec::new(),
            header: None,
            tailer: None,
            current: None,
            page_limit: config.page_limit(),
            page_size: config.page_size,
            pages: 0,
            used: 0,
            total: 0,
            generation: 0,
        }
    }

    // =========================================================================
    // Page chain helpers
    // =========================================================================

    #[inline]
    fn slot(&self, slot: usize) -> Option<&ArenaPage> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    #[inline]
    fn slot_mut(&mut self, slot: usize) -> Option<&mut ArenaPage> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn page(&self, slot: usize) -> Result<&ArenaPage> {
        self.slot(slot).ok_or_else(|| Self::missing(slot))
    }

    fn page_mut(&mut self, slot: usize) -> Result<&mut ArenaPage> {
        self.slot_mut(slot).ok_or_else(|| Self::missing(slot))
    }

    fn missing(slot: usize) -> StrataError {
        StrataError::UnexpectedState(format!("arena page slot {} is vacant", slot))
    }

    fn alloc_new_page(&mut self, size: usize) -> Result<usize> {
        let Some(buf) = self.allocator.allocate(size) else {
            error!(
                size,
                pages = self.pages,
                total = self.total,
                "cannot allocate arena page"
            );
            return Err(StrataError::OutOfMemory { requested: size });
        };
        let page = ArenaPage::new(buf);
        self.total += page.raw_size();
        self.pages += 1;

        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(page);
                slot
            }
            None => {
                self.slots.push(Some(page));
                self.slots.len() - 1
            }
        };
        Ok(slot)
    }

    fn release_slot(&mut self, slot: usize) -> Option<ArenaPage> {
        let page = self.slots.get_mut(slot).and_then(Option::take)?;
        self.vacant.push(slot);
        self.total -= page.raw_size();
        self.pages -= 1;
        Some(page)
    }

    fn insert_head(&mut self, slot: usize) -> Result<()> {
        let header = self.header;
        self.page_mut(slot)?.next = header;
        self.header = Some(slot);
        if self.tailer.is_none() {
            self.tailer = Some(slot);
        }
        Ok(())
    }

    /// Links `slot` right after `after`.
    fn insert_after(&mut self, after: usize, slot: usize) -> Result<()> {
        let next = self.page(after)?.next;
        self.page_mut(slot)?.next = next;
        self.page_mut(after)?.next = Some(slot);
        if self.tailer == Some(after) {
            self.tailer = Some(slot);
        }
        Ok(())
    }

    fn ensure_cur_page(&mut self) -> Result<usize> {
        if let Some(slot) = self.current {
            return Ok(slot);
        }
        let slot = match self.header {
            Some(slot) => {
                self.page_mut(slot)?.reuse();
                slot
            }
            None => {
                let slot = self.alloc_new_page(self.page_size)?;
                self.header = Some(slot);
                self.tailer = Some(slot);
                slot
            }
        };
        self.current = Some(slot);
        Ok(slot)
    }

    /// Moves to the page after the current one, rewinding it if it can hold
    /// `size` bytes, or links a fresh ordinary page there.
    fn extend_page(&mut self, size: usize) -> Result<usize> {
        let cur = self.ensure_cur_page()?;
        if let Some(next) = self.page(cur)?.next {
            let page = self.page_mut(next)?;
            if page.reuse_size() >= size {
                page.reuse();
                return Ok(next);
            }
        }
        let slot = self.alloc_new_page(self.page_size)?;
        self.insert_after(cur, slot)?;
        Ok(slot)
    }

    fn lookup_next_page(&mut self, size: usize) -> Result<Option<usize>> {
        let cur = self.ensure_cur_page()?;
        let Some(next) = self.page(cur)?.next else {
            return Ok(None);
        };
        let page = self.page_mut(next)?;
        if page.reuse_size() < size {
            return Ok(None);
        }
        page.reuse();
        Ok(Some(next))
    }

    /// Gives an oversized request its own page at the head of the chain.
    fn alloc_big(&mut self, size: usize) -> Result<usize> {
        let raw = size
            .checked_add(PAGE_HEADER_SIZE)
            .ok_or(StrataError::OutOfMemory { requested: size })?;
        let slot = self.alloc_new_page(raw)?;
        self.insert_head(slot)?;
        Ok(slot)
    }

    /// Picks a page with at least `size` free bytes once the current page is
    /// known to be too small.
    fn overflow_page(&mut self, size: usize) -> Result<usize> {
        if size <= self.page_limit {
            let slot = self.extend_page(size)?;
            self.current = Some(slot);
            return Ok(slot);
        }
        if let Some(slot) = self.lookup_next_page(size)? {
            self.current = Some(slot);
            return Ok(slot);
        }
        self.alloc_big(size)
    }

    fn place(&mut self, size: usize) -> Result<usize> {
        let cur = self.ensure_cur_page()?;
        if size <= self.page(cur)?.remain() {
            Ok(cur)
        } else {
            self.overflow_page(size)
        }
    }

    #[inline]
    fn span(&self, page: usize, offset: usize, len: usize) -> ArenaSpan {
        ArenaSpan {
            page,
            offset,
            len,
            generation: self.generation,
        }
    }

    fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocates `size` bytes.
    pub fn allocate(&mut self, size: usize) -> Result<ArenaSpan> {
        let slot = self.place(size)?;
        let offset = self
            .page_mut(slot)?
            .alloc(size)
            .ok_or(StrataError::OutOfMemory { requested: size })?;
        self.used += size;
        Ok(self.span(slot, offset, size))
    }

    /// Allocates `size` bytes starting at a `NATURAL_ALIGN` boundary.
    ///
    /// The padding skipped to reach the boundary counts towards `used`.
    pub fn allocate_aligned(&mut self, size: usize) -> Result<ArenaSpan> {
        let cur = self.ensure_cur_page()?;
        let page = self.page(cur)?;
        let fits = size
            .checked_add(align_offset(page.cursor_addr()))
            .is_some_and(|padded| padded <= page.remain());
        let slot = if fits {
            cur
        } else {
            self.overflow_page(size.saturating_add(NATURAL_ALIGN - 1))?
        };

        let page = self.page_mut(slot)?;
        let padding = align_offset(page.cursor_addr());
        let start = page
            .alloc(size + padding)
            .ok_or(StrataError::OutOfMemory { requested: size })?;
        self.used += size + padding;
        Ok(self.span(slot, start + padding, size))
    }

    /// Allocates `size` bytes carved off the end of a page's free region.
    pub fn allocate_from_end(&mut self, size: usize) -> Result<ArenaSpan> {
        let slot = self.place(size)?;
        let offset = self
            .page_mut(slot)?
            .alloc_down(size)
            .ok_or(StrataError::OutOfMemory { requested: size })?;
        self.used += size;
        Ok(self.span(slot, offset, size))
    }

    /// Resizes `span` to `new_size` bytes.
    ///
    /// The most recent front allocation of the current page is extended or
    /// shrunk in place when the page has room; anything else is copied into a
    /// fresh allocation of `new_size` bytes.
    pub fn grow(&mut self, span: ArenaSpan, new_size: usize) -> Result<ArenaSpan> {
        if self.bytes(span).is_none() {
            return Err(StrataError::InvalidArgument(
                "grow called with a stale arena span".to_string(),
            ));
        }

        if self.current == Some(span.page) {
            let page = self.page_mut(span.page)?;
            let is_last = span.offset + span.len == page.alloc_end();
            let fits = span
                .offset
                .checked_add(new_size)
                .is_some_and(|end| end <= page.page_end());
            if is_last && fits {
                page.set_alloc_end(span.offset + new_size);
                self.used = self.used - span.len + new_size;
                return Ok(ArenaSpan {
                    len: new_size,
                    ..span
                });
            }
        }

        let moved = self.allocate(new_size)?;
        self.copy_span(span, moved, span.len.min(new_size))?;
        Ok(moved)
    }

    fn copy_span(&mut self, from: ArenaSpan, to: ArenaSpan, len: usize) -> Result<()> {
        let src = from.offset..from.offset + len;
        if from.page == to.page {
            self.page_mut(from.page)?
                .buffer_mut()
                .copy_within(src, to.offset);
            return Ok(());
        }

        let (src_page, dst_page) = if from.page < to.page {
            let (low, high) = self.slots.split_at_mut(to.page);
            (low[from.page].as_ref(), high[0].as_mut())
        } else {
            let (low, high) = self.slots.split_at_mut(from.page);
            (high[0].as_ref(), low[to.page].as_mut())
        };
        match (src_page, dst_page) {
            (Some(src_page), Some(dst_page)) => {
                let data = src_page
                    .bytes(from.offset, len)
                    .ok_or_else(|| Self::missing(from.page))?;
                dst_page
                    .bytes_mut(to.offset, len)
                    .ok_or_else(|| Self::missing(to.page))?
                    .copy_from_slice(data);
                Ok(())
            }
            _ => Err(Self::missing(from.page)),
        }
    }

    /// Copies `data` into the arena.
    pub fn duplicate(&mut self, data: &[u8]) -> Result<ArenaSpan> {
        let span = self.allocate(data.len())?;
        self.bytes_mut(span)
            .ok_or_else(|| Self::missing(span.page))?
            .copy_from_slice(data);
        Ok(span)
    }

    /// Copies `s` plus a trailing NUL into the arena.
    pub fn duplicate_str(&mut self, s: &str) -> Result<ArenaSpan> {
        let span = self.allocate(s.len() + 1)?;
        let buf = self.bytes_mut(span).ok_or_else(|| Self::missing(span.page))?;
        buf[..s.len()].copy_from_slice(s.as_bytes());
        buf[s.len()] = 0;
        Ok(span)
    }

    /// Resolves a span, or `None` if it predates the last release.
    pub fn bytes(&self, span: ArenaSpan) -> Option<&[u8]> {
        if span.generation != self.generation {
            return None;
        }
        self.slot(span.page)?.bytes(span.offset, span.len)
    }

    pub fn bytes_mut(&mut self, span: ArenaSpan) -> Option<&mut [u8]> {
        if span.generation != self.generation {
            return None;
        }
        self.slot_mut(span.page)?.bytes_mut(span.offset, span.len)
    }

    // =========================================================================
    // Release and reuse
    // =========================================================================

    /// Returns every page to the allocator.
    pub fn free(&mut self) {
        let mut released = 0;
        for page in self.slots.drain(..).flatten() {
            released += 1;
            self.allocator.deallocate(page.into_buffer());
        }
        if released > 0 {
            self.allocator.freed(self.total);
        }

        self.vacant.clear();
        self.header = None;
        self.tailer = None;
        self.current = None;
        self.pages = 0;
        self.used = 0;
        self.total = 0;
        self.invalidate();
    }

    /// Rewinds to the first page without releasing anything.
    pub fn fast_reuse(&mut self) {
        self.used = 0;
        self.current = self.header;
        if let Some(slot) = self.header {
            if let Some(page) = self.slot_mut(slot) {
                page.reuse();
            }
        }
        self.invalidate();
    }

    /// Releases dedicated large pages, then rewinds like `fast_reuse`.
    pub fn reuse(&mut self) {
        self.free_large_pages();
        self.fast_reuse();
    }

    fn free_large_pages(&mut self) {
        let mut prev: Option<usize> = None;
        let mut cursor = self.header;
        while let Some(slot) = cursor {
            let Some(page) = self.slot(slot) else {
                break;
            };
            let next = page.next;
            if page.raw_size() > self.page_size {
                if let Some(page) = self.release_slot(slot) {
                    self.allocator.deallocate(page.into_buffer());
                }
                match prev.and_then(|p| self.slot_mut(p)) {
                    Some(prev_page) => prev_page.next = next,
                    None => self.header = next,
                }
            } else {
                prev = Some(slot);
            }
            cursor = next;
        }
        self.tailer = prev;
    }

    /// Releases pages from the head of the chain, pausing between batches.
    ///
    /// Stops once `total` is at most `throttle.keep_bytes` (zero releases
    /// everything). Allocation restarts at the new head page; every span
    /// handed out before the call is invalid afterwards. Returns the number
    /// of pages released.
    pub fn release_throttled(&mut self, throttle: &ReleaseThrottle) -> usize {
        let mut released = 0;
        let mut since_pause = 0;
        while let Some(slot) = self.header {
            if throttle.keep_bytes != 0 && self.total <= throttle.keep_bytes {
                break;
            }
            let Some(page) = self.release_slot(slot) else {
                break;
            };
            self.header = page.next;
            self.allocator.deallocate(page.into_buffer());
            released += 1;
            since_pause += 1;

            if throttle.is_paced() && since_pause >= throttle.batch_pages {
                std::thread::sleep(throttle.sleep_interval);
                since_pause = 0;
            }
        }

        if self.header.is_none() {
            self.tailer = None;
            self.slots.clear();
            self.vacant.clear();
        }
        self.current = self.header;
        if let Some(slot) = self.header {
            if let Some(page) = self.slot_mut(slot) {
                page.reuse();
            }
        }
        self.used = 0;
        self.invalidate();

        debug!(
            released,
            pages = self.pages,
            total = self.total,
            "released arena pages"
        );
        released
    }

    /// Moves every page of `other` to the end of this arena's chain.
    ///
    /// `other` must not have handed out any bytes. Both arenas must draw from
    /// the same underlying allocator. `other` is left empty.
    pub fn join(&mut self, other: &mut PageArena<A>) -> Result<()> {
        if other.used != 0 {
            return Err(StrataError::NotSupported(format!(
                "cannot join an arena with {} bytes in use",
                other.used
            )));
        }

        let mut cursor = other.header;
        let mut first = None;
        let mut last = None;
        while let Some(slot) = cursor {
            let Some(mut page) = other.slots.get_mut(slot).and_then(Option::take) else {
                break;
            };
            cursor = page.next.take();
            let moved = match self.vacant.pop() {
                Some(free) => {
                    self.slots[free] = Some(page);
                    free
                }
                None => {
                    self.slots.push(Some(page));
                    self.slots.len() - 1
                }
            };
            if let Some(prev) = last {
                self.page_mut(prev)?.next = Some(moved);
            }
            first.get_or_insert(moved);
            last = Some(moved);
        }
        self.pages += other.pages;
        self.total += other.total;

        if let (Some(first), Some(last)) = (first, last) {
            match self.tailer {
                Some(tailer) => self.page_mut(tailer)?.next = Some(first),
                None => {
                    self.header = Some(first);
                    self.page_size = other.page_size;
                    self.page_limit = other.page_limit;
                }
            }
            self.tailer = Some(last);
        }

        other.slots.clear();
        other.vacant.clear();
        other.header = None;
        other.tailer = None;
        other.current = None;
        other.pages = 0;
        other.total = 0;
        other.invalidate();
        Ok(())
    }

    /// Changes the ordinary page size. Only takes effect while the arena
    /// holds no pages; returns whether it did.
    pub fn set_page_size(&mut self, page_size: usize) -> Result<bool> {
        let config = ArenaConfig { page_size };
        config.validate()?;
        if self.header.is_some() || self.total != 0 {
            return Ok(false);
        }
        self.page_size = config.page_size;
        self.page_limit = config.page_limit();
        Ok(true)
    }

    /// Logs one line per page.
    pub fn dump(&self) {
        let mut cursor = self.header;
        let mut index = 0;
        while let Some(slot) = cursor {
            let Some(page) = self.slot(slot) else {
                warn!(slot, "arena chain points at a vacant slot");
                break;
            };
            if !page.is_intact() {
                warn!(page = index, slot, "arena page magic mismatch");
            }
            info!(
                page = index,
                raw_size = page.raw_size(),
                used = page.used(),
                remain = page.remain(),
                "arena page"
            );
            index += 1;
            cursor = page.next;
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Number of pages held.
    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Bytes handed out since the last release.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes held in pages, headers included.
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    /// Free bytes left on the current page.
    pub fn remain(&self) -> usize {
        self.current
            .and_then(|slot| self.slot(slot))
            .map_or(0, ArenaPage::remain)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Returns true if every page still carries its magic tag.
    pub fn is_intact(&self) -> bool {
        self.slots.iter().flatten().all(ArenaPage::is_intact)
    }

    #[cfg(test)]
    fn chain(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = self.header;
        while let Some(slot) = cursor {
            out.push(slot);
            cursor = self.slot(slot).and_then(|p| p.next);
        }
        out
    }
}

impl<A: PageAllocator> Drop for PageArena<A> {
    fn drop(&mut self) {
        self.free();
    }
}

impl<A: PageAllocator> std::fmt::Debug for PageArena<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageArena")
            .field("page_size", &self.page_size)
            .field("pages", &self.pages)
            .field("used", &self.used)
            .field("total", &self.total)
            .finish()
    }
}
