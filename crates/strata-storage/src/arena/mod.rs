//! Page arena and the page allocators it draws from.
//!
//! The arena serves short-lived, bulk-released allocations:
//! - small requests bump a cursor on the current page
//! - requests larger than an empty page get a dedicated page
//! - memory returns all at once through `free`, `reuse` or `release_throttled`

mod allocator;
mod page;
mod page_arena;

pub use allocator::{LimitedPageAllocator, PageAllocator, PooledPageAllocator, SystemPageAllocator};
pub use page_arena::{ArenaSpan, PageArena};
