//! In-memory storage for Strata query execution.
//!
//! This crate provides:
//! - Page arena for bulk-released scratch allocations
//! - Page allocators (heap, pooled, byte-limited)
//! - Logical rows and their column descriptors
//! - Compact cell encoding for rows
//! - Block-chained, serializable row store

pub mod arena;
pub mod compact;
pub mod row;
pub mod row_store;

pub use arena::{
    ArenaSpan, LimitedPageAllocator, PageAllocator, PageArena, PooledPageAllocator,
    SystemPageAllocator,
};
pub use compact::{convert, LayoutMode};
pub use row::{Row, RowDesc, MAX_COLUMNS};
pub use row_store::{RowStore, StoredRow};
