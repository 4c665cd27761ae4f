//! Page and block layout constants shared by the arena and the row store.

/// Default arena page size in bytes (64 KB).
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Default row store block size in bytes (64 KB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Bytes reserved at the start of every page or block buffer.
///
/// Layout (32 bytes):
/// - magic: 8 bytes (corruption sentinel)
/// - reserved: 24 bytes (link, cursor and end live in the owning struct)
pub const PAGE_HEADER_SIZE: usize = 32;

/// Sentinel written at the start of every arena page.
pub const PAGE_MAGIC: u64 = 0x1234_abcd_dbca_4321;

/// Sentinel written at the start of every row store block.
pub const BLOCK_MAGIC: u64 = 0xabcd_4444_abcd_4444;

/// Natural alignment of the platform (pointer width).
pub const NATURAL_ALIGN: usize = std::mem::align_of::<usize>();

/// Writes `magic` into the header of a fresh page buffer.
#[inline]
pub fn stamp_magic(buf: &mut [u8], magic: u64) {
    buf[..8].copy_from_slice(&magic.to_le_bytes());
}

/// Returns true if `buf` starts with `magic`.
#[inline]
pub fn has_magic(buf: &[u8], magic: u64) -> bool {
    buf.len() >= 8 && buf[..8] == magic.to_le_bytes()
}

/// Returns the padding needed to bring `addr` up to `NATURAL_ALIGN`.
#[inline]
pub fn align_offset(addr: usize) -> usize {
    (NATURAL_ALIGN - addr % NATURAL_ALIGN) % NATURAL_ALIGN
}
