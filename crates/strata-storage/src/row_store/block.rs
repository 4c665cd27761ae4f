//! Row store block: one allocator buffer filled front to back.
//!
//! Block layout:
//! ```text
//! +------------------+ 0
//! | magic: u64       | 8
//! | reserved         | 32 (PAGE_HEADER_SIZE)
//! +------------------+
//! | stored rows      |
//! +------------------+ <- PAGE_HEADER_SIZE + data_pos
//! | spare            |
//! +------------------+ block_size
//! ```

use strata_common::page::{has_magic, stamp_magic, BLOCK_MAGIC, PAGE_HEADER_SIZE};

pub(crate) struct Block {
    buf: Box<[u8]>,
    /// Bytes of stored rows, relative to the end of the header.
    data_pos: usize,
}

impl Block {
    pub(crate) fn new(mut buf: Box<[u8]>) -> Self {
        debug_assert!(buf.len() > PAGE_HEADER_SIZE);
        stamp_magic(&mut buf, BLOCK_MAGIC);
        Self { buf, data_pos: 0 }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len() - PAGE_HEADER_SIZE
    }

    #[inline]
    pub(crate) fn remain_size(&self) -> usize {
        self.capacity() - self.data_pos
    }

    #[inline]
    pub(crate) fn data_pos(&self) -> usize {
        self.data_pos
    }

    /// Written bytes.
    #[inline]
    pub(crate) fn data(&self) -> &[u8] {
        &self.buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.data_pos]
    }

    /// Unwritten bytes.
    #[inline]
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PAGE_HEADER_SIZE + self.data_pos..]
    }

    #[inline]
    pub(crate) fn advance(&mut self, len: usize) {
        debug_assert!(len <= self.remain_size());
        self.data_pos += len;
    }

    #[inline]
    pub(crate) fn set_data_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.capacity());
        self.data_pos = pos;
    }

    /// Rewinds the block; old bytes stay in place but are no longer readable.
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.data_pos = 0;
    }

    pub(crate) fn is_intact(&self) -> bool {
        has_magic(&self.buf, BLOCK_MAGIC)
    }

    pub(crate) fn into_buffer(self) -> Box<[u8]> {
        self.buf
    }
}
