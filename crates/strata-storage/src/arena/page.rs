//! Arena page: one allocator buffer plus its bump cursors.
//!
//! Page layout:
//! ```text
//! +------------------+ 0
//! | magic: u64       | 8
//! | reserved         | 32 (PAGE_HEADER_SIZE)
//! +------------------+ <- alloc_end starts here, grows up
//! |                  |
//! | free             |
//! |                  |
//! +------------------+ <- page_end, moves down on allocate_from_end
//! | tail allocations |
//! +------------------+ raw_size
//! ```

use strata_common::page::{has_magic, stamp_magic, PAGE_HEADER_SIZE, PAGE_MAGIC};

pub(crate) struct ArenaPage {
    buf: Box<[u8]>,
    /// Slot of the next page in the arena chain.
    pub(crate) next: Option<usize>,
    alloc_end: usize,
    page_end: usize,
}

impl ArenaPage {
    /// Wraps a fresh allocator buffer. The buffer must exceed the header size.
    pub(crate) fn new(mut buf: Box<[u8]>) -> Self {
        debug_assert!(buf.len() > PAGE_HEADER_SIZE);
        stamp_magic(&mut buf, PAGE_MAGIC);
        let page_end = buf.len();
        Self {
            buf,
            next: None,
            alloc_end: PAGE_HEADER_SIZE,
            page_end,
        }
    }

    #[inline]
    pub(crate) fn remain(&self) -> usize {
        self.page_end - self.alloc_end
    }

    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.alloc_end - PAGE_HEADER_SIZE
    }

    #[inline]
    pub(crate) fn raw_size(&self) -> usize {
        self.buf.len()
    }

    /// Usable bytes once the page is rewound.
    #[inline]
    pub(crate) fn reuse_size(&self) -> usize {
        self.buf.len() - PAGE_HEADER_SIZE
    }

    #[inline]
    pub(crate) fn alloc_end(&self) -> usize {
        self.alloc_end
    }

    #[inline]
    pub(crate) fn page_end(&self) -> usize {
        self.page_end
    }

    /// Address the next front allocation would start at.
    #[inline]
    pub(crate) fn cursor_addr(&self) -> usize {
        self.buf.as_ptr() as usize + self.alloc_end
    }

    /// Bumps the front cursor, returning the offset of the new region.
    #[inline]
    pub(crate) fn alloc(&mut self, size: usize) -> Option<usize> {
        if size > self.remain() {
            return None;
        }
        let start = self.alloc_end;
        self.alloc_end += size;
        Some(start)
    }

    /// Carves `size` bytes off the end of the free region.
    #[inline]
    pub(crate) fn alloc_down(&mut self, size: usize) -> Option<usize> {
        if size > self.remain() {
            return None;
        }
        self.page_end -= size;
        Some(self.page_end)
    }

    /// Moves the front cursor to `offset`, which must lie within the page.
    #[inline]
    pub(crate) fn set_alloc_end(&mut self, offset: usize) {
        debug_assert!(offset >= PAGE_HEADER_SIZE && offset <= self.page_end);
        self.alloc_end = offset;
    }

    /// Rewinds both cursors; previous contents are left in place.
    #[inline]
    pub(crate) fn reuse(&mut self) {
        self.alloc_end = PAGE_HEADER_SIZE;
        self.page_end = self.buf.len();
    }

    pub(crate) fn is_intact(&self) -> bool {
        has_magic(&self.buf, PAGE_MAGIC)
    }

    #[inline]
    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.buf.get(offset..offset.checked_add(len)?)
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        self.buf.get_mut(offset..offset.checked_add(len)?)
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn into_buffer(self) -> Box<[u8]> {
        self.buf
    }
}

impl std::fmt::Debug for ArenaPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaPage")
            .field("raw_size", &self.raw_size())
            .field("used", &self.used())
            .field("remain", &self.remain())
            .field("next", &self.next)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(size: usize) -> ArenaPage {
        ArenaPage::new(vec![0u8; size].into_boxed_slice())
    }

    #[test]
    fn test_new_page() {
        let p = page(256);
        assert!(p.is_intact());
        assert_eq!(p.raw_size(), 256);
        assert_eq!(p.remain(), 256 - PAGE_HEADER_SIZE);
        assert_eq!(p.used(), 0);
        assert_eq!(p.reuse_size(), 256 - PAGE_HEADER_SIZE);
        assert!(p.next.is_none());
    }

    #[test]
    fn test_alloc_bumps_cursor() {
        let mut p = page(256);
        assert_eq!(p.alloc(10), Some(PAGE_HEADER_SIZE));
        assert_eq!(p.alloc(20), Some(PAGE_HEADER_SIZE + 10));
        assert_eq!(p.used(), 30);
        assert_eq!(p.remain(), 256 - PAGE_HEADER_SIZE - 30);
    }

    #[test]
    fn test_alloc_exact_fit_and_overflow() {
        let mut p = page(64);
        let remain = p.remain();
        assert!(p.alloc(remain + 1).is_none());
        assert!(p.alloc(remain).is_some());
        assert_eq!(p.remain(), 0);
        assert!(p.alloc(1).is_none());
        assert_eq!(p.alloc(0), Some(64));
    }

    #[test]
    fn test_alloc_down_shrinks_end() {
        let mut p = page(128);
        assert_eq!(p.alloc_down(16), Some(112));
        assert_eq!(p.alloc_down(16), Some(96));
        assert_eq!(p.page_end(), 96);
        assert_eq!(p.remain(), 96 - PAGE_HEADER_SIZE);
        assert!(p.alloc_down(p.remain() + 1).is_none());
    }

    #[test]
    fn test_reuse_restores_both_ends() {
        let mut p = page(128);
        p.alloc(40).unwrap();
        p.alloc_down(40).unwrap();
        p.reuse();
        assert_eq!(p.alloc_end(), PAGE_HEADER_SIZE);
        assert_eq!(p.page_end(), 128);
        assert_eq!(p.remain(), p.reuse_size());
    }

    #[test]
    fn test_bytes_bounds() {
        let mut p = page(64);
        let off = p.alloc(4).unwrap();
        p.bytes_mut(off, 4).unwrap().copy_from_slice(b"abcd");
        assert_eq!(p.bytes(off, 4).unwrap(), b"abcd");
        assert!(p.bytes(60, 8).is_none());
        assert!(p.bytes(usize::MAX, 2).is_none());
    }

    #[test]
    fn test_corruption_detected() {
        let mut p = page(64);
        p.buffer_mut()[0] ^= 0xff;
        assert!(!p.is_intact());
    }
}
