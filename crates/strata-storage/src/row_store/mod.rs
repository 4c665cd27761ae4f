//! Append-only row store built on fixed-size blocks.
//!
//! Rows are encoded once into a block and then read back in insertion
//! order. A block chain only grows; `reuse` and `clear_rows` rewind it
//! for the next pass, `clear` hands every block back to the allocator.
//!
//! The whole store can be serialized as a sequence of raw block images and
//! rebuilt on another node with `deserialize`.

pub mod constants;

mod block;
mod store;
mod stored_row;

pub use constants::{MAX_RESERVED_COLUMNS, RESERVED_CELL_SIZE, STORED_ROW_HEADER_SIZE};
pub use store::RowStore;
pub use stored_row::StoredRow;
