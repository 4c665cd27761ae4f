//! Stored row layout constants.

/// Bytes of the stored row header: reserved cell count (u32) and compact
/// row size (u32), both little-endian.
pub const STORED_ROW_HEADER_SIZE: usize = 8;

/// Bytes of one reserved cell slot.
///
/// Slot layout (16 bytes):
/// - obj_type: 1 byte
/// - reserved: 3 bytes
/// - varchar length: 4 bytes (u32, varchar only)
/// - payload: 8 bytes (u64: integer, float bits, flag, or varchar offset
///   within the compact row)
pub const RESERVED_CELL_SIZE: usize = 16;

/// Maximum number of reserved columns per store.
pub const MAX_RESERVED_COLUMNS: usize = 64;

/// Returns the bytes preceding the compact row for `count` reserved cells.
#[inline]
pub const fn reserved_cells_size(count: usize) -> usize {
    STORED_ROW_HEADER_SIZE + count * RESERVED_CELL_SIZE
}
