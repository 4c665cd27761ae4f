//! Block-chained, append-only row store.

use super::block::Block;
use super::constants::{reserved_cells_size, MAX_RESERVED_COLUMNS};
use super::stored_row::{encode_stored_row, StoredRow};
use crate::arena::{PageAllocator, SystemPageAllocator};
use crate::compact::{convert, min_row_size};
use crate::row::Row;
use bytes::Bytes;
use strata_common::config::RowStoreConfig;
use strata_common::serialization::{decode_raw, decode_vi64, encode_raw, encode_vi64, encoded_length_vi64};
use strata_common::{ActionFlag, Result, StrataError, Value};
use tracing::{debug, error, warn};

/// Write position and counters captured before an append.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    head: Option<usize>,
    data_pos: usize,
    cur_size_counter: usize,
    row_count: usize,
    last_row_size: usize,
}

/// Read position of the row iterator.
#[derive(Debug, Clone, Copy, Default)]
struct IterCursor {
    block: usize,
    pos: usize,
}

/// Append-only store of rows packed into fixed-size blocks.
///
/// Blocks are kept in write order; `blocks[0]` is the oldest and `head` is
/// the block currently written. Blocks past `head` are left over from a
/// rollback or a `reuse` and get rewound before they are written again.
/// Readers never look past `head` or past a block's write position.
///
/// Single writer. Iterate only once the writer is done with a pass.
pub struct RowStore<A: PageAllocator = SystemPageAllocator> {
    /// Source of block buffers.
    allocator: A,
    /// Size of every block, header included.
    block_size: usize,
    /// Blocks in write order.
    blocks: Vec<Block>,
    /// Block receiving appends.
    head: Option<usize>,
    /// (table_id, column_id) pairs copied into every row header.
    reserved_columns: Vec<(u64, u64)>,
    /// Bytes of stored rows written since the last reset.
    cur_size_counter: usize,
    /// Rows written since the last reset.
    row_count: usize,
    /// Stored size of the most recent row (0 = none).
    last_row_size: usize,
    /// State before the most recent append; taken by a rollback.
    rollback: Option<Checkpoint>,
    /// Iterator position.
    iter: IterCursor,
}

impl<A: PageAllocator> RowStore<A> {
    /// Creates an empty store drawing blocks from `allocator`.
    pub fn new(allocator: A, config: RowStoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            allocator,
            block_size: config.block_size,
            blocks: Vec::new(),
            head: None,
            reserved_columns: Vec::new(),
            cur_size_counter: 0,
            row_count: 0,
            last_row_size: 0,
            rollback: None,
            iter: IterCursor::default(),
        })
    }

    /// Declares a column whose value is copied into every row header.
    ///
    /// Must happen before the first `add_row`.
    pub fn register_reserved_column(&mut self, table_id: u64, column_id: u64) -> Result<()> {
        if self.row_count > 0 {
            return Err(StrataError::UnexpectedState(
                "reserved columns must be registered before rows are added".to_string(),
            ));
        }
        if self.reserved_columns.len() >= MAX_RESERVED_COLUMNS {
            return Err(StrataError::SizeOverflow {
                what: "reserved columns",
                limit: MAX_RESERVED_COLUMNS,
            });
        }
        if self.reserved_columns.contains(&(table_id, column_id)) {
            return Err(StrataError::InvalidArgument(format!(
                "reserved column ({}, {}) already registered",
                table_id, column_id
            )));
        }
        self.reserved_columns.push((table_id, column_id));
        Ok(())
    }

    // =========================================================================
    // Block management
    // =========================================================================

    fn head_block(&self) -> Option<&Block> {
        self.head.and_then(|head| self.blocks.get(head))
    }

    /// Moves `head` to the next block, rewinding a leftover one or
    /// allocating a fresh one.
    fn new_block(&mut self) -> Result<()> {
        let next = self.head.map_or(0, |head| head + 1);
        if let Some(block) = self.blocks.get_mut(next) {
            block.reset();
        } else {
            let Some(buf) = self.allocator.allocate(self.block_size) else {
                error!(
                    block_size = self.block_size,
                    block_count = self.blocks.len(),
                    "cannot allocate row store block"
                );
                return Err(StrataError::OutOfMemory {
                    requested: self.block_size,
                });
            };
            self.blocks.push(Block::new(buf));
        }
        self.head = Some(next);
        Ok(())
    }

    /// Makes `head` an empty block.
    fn ensure_empty_block(&mut self) -> Result<()> {
        match self.head_block() {
            Some(block) if block.data_pos() == 0 => Ok(()),
            _ => self.new_block(),
        }
    }

    fn truncate_blocks(&mut self, len: usize) {
        if len >= self.blocks.len() {
            return;
        }
        for block in self.blocks.drain(len..) {
            self.allocator.deallocate(block.into_buffer());
        }
    }

    fn release_blocks(&mut self) {
        let bytes = self.blocks.len() * self.block_size;
        let had_blocks = !self.blocks.is_empty();
        self.truncate_blocks(0);
        if had_blocks {
            self.allocator.freed(bytes);
        }
    }

    /// Rewinds to the first block and zeroes the counters.
    fn rewind(&mut self) {
        self.head = if self.blocks.is_empty() { None } else { Some(0) };
        if let Some(block) = self.blocks.first_mut() {
            block.reset();
        }
        self.cur_size_counter = 0;
        self.row_count = 0;
        self.last_row_size = 0;
        self.rollback = None;
        self.iter = IterCursor::default();
    }

    // =========================================================================
    // Writing
    // =========================================================================

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            head: self.head,
            data_pos: self.head_block().map_or(0, Block::data_pos),
            cur_size_counter: self.cur_size_counter,
            row_count: self.row_count,
            last_row_size: self.last_row_size,
        }
    }

    fn restore(&mut self, checkpoint: &Checkpoint) {
        match checkpoint.head {
            Some(head) => {
                self.head = Some(head);
                if let Some(block) = self.blocks.get_mut(head) {
                    block.set_data_pos(checkpoint.data_pos);
                }
            }
            None => {
                self.head = if self.blocks.is_empty() { None } else { Some(0) };
                if let Some(block) = self.blocks.first_mut() {
                    block.reset();
                }
            }
        }
        self.cur_size_counter = checkpoint.cur_size_counter;
        self.row_count = checkpoint.row_count;
        self.last_row_size = checkpoint.last_row_size;
    }

    /// Appends `row`, returning its stored form and the bytes written so far.
    ///
    /// A row that does not fit the current block is retried once in a fresh
    /// block; if it does not fit an empty block either the call fails with
    /// `RowTooLarge`. On any failure the rows are left as they were before
    /// the call, and a following `rollback_last_row` is a no-op.
    pub fn add_row(&mut self, row: &Row) -> Result<(StoredRow<'_>, usize)> {
        let checkpoint = self.checkpoint();
        let block_count = self.blocks.len();
        self.rollback = Some(checkpoint);

        match self.append_row(row) {
            Ok(stored_size) => {
                self.cur_size_counter += stored_size;
                self.row_count += 1;
                self.last_row_size = stored_size;
            }
            Err(err) => {
                self.truncate_blocks(block_count);
                self.head = checkpoint.head;
                return Err(err);
            }
        }

        let total = self.cur_size_counter;
        let stored = self.last_stored_row()?;
        Ok((stored, total))
    }

    /// Appends `row`, returning only the bytes written so far.
    pub fn add_row_counted(&mut self, row: &Row) -> Result<usize> {
        self.add_row(row).map(|(_, total)| total)
    }

    /// Writes one stored row into the head block and advances it.
    fn append_row(&mut self, row: &Row) -> Result<usize> {
        let header_size = reserved_cells_size(self.reserved_columns.len());
        let needs_block = self
            .head_block()
            .map_or(true, |block| {
                block.remain_size() <= min_row_size(row.column_count()) + header_size
            });
        if needs_block {
            self.new_block()?;
        }

        for retry in 0..2 {
            let head = self.head.ok_or_else(|| {
                StrataError::UnexpectedState("row store has no head block".to_string())
            })?;
            let block = self.blocks.get_mut(head).ok_or_else(|| {
                StrataError::UnexpectedState(format!("row store head block {} missing", head))
            })?;
            match encode_stored_row(block.spare_mut(), row, &self.reserved_columns) {
                Ok(stored_size) => {
                    block.advance(stored_size);
                    return Ok(stored_size);
                }
                Err(err) if err.is_buffer_insufficient() => {
                    let remain_size = block.remain_size();
                    debug!(
                        block = head,
                        remain_size,
                        block_count = self.blocks.len(),
                        "block buffer not enough"
                    );
                    if retry == 0 {
                        self.new_block()?;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to append row");
                    return Err(err);
                }
            }
        }

        error!(
            columns = row.column_count(),
            block_size = self.block_size,
            "row does not fit in an empty block"
        );
        Err(StrataError::RowTooLarge {
            columns: row.column_count(),
        })
    }

    /// Undoes the most recent `add_row`. Only one level of undo is kept.
    pub fn rollback_last_row(&mut self) -> Result<()> {
        let Some(checkpoint) = self.rollback.take() else {
            warn!("only one row could be rolled back after add_row");
            return Err(StrataError::NotSupported(
                "no row to roll back since the last add_row".to_string(),
            ));
        };
        self.restore(&checkpoint);
        Ok(())
    }

    /// The most recently written row.
    pub fn last_stored_row(&self) -> Result<StoredRow<'_>> {
        if self.last_row_size == 0 {
            return Err(StrataError::UnexpectedState(
                "row store has no last stored row".to_string(),
            ));
        }
        let block = self.head_block().ok_or_else(|| {
            StrataError::UnexpectedState("row store has no head block".to_string())
        })?;
        let start = block
            .data_pos()
            .checked_sub(self.last_row_size)
            .ok_or_else(|| {
                StrataError::UnexpectedState(format!(
                    "last row size {} exceeds block data {}",
                    self.last_row_size,
                    block.data_pos()
                ))
            })?;
        StoredRow::parse(&block.data()[start..])
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Restarts iteration at the oldest row.
    pub fn reset_iterator(&mut self) {
        self.iter = IterCursor::default();
    }

    /// Moves the iterator past the next row, returning its block and offset.
    fn advance_iter(&mut self) -> Result<Option<(usize, usize)>> {
        let Some(head) = self.head else {
            return Ok(None);
        };
        loop {
            if self.iter.block > head {
                return Ok(None);
            }
            let Some(block) = self.blocks.get(self.iter.block) else {
                return Ok(None);
            };
            if self.iter.pos < block.data_pos() {
                break;
            }
            self.iter.block += 1;
            self.iter.pos = 0;
        }

        let IterCursor { block, pos } = self.iter;
        let stored = StoredRow::parse(&self.blocks[block].data()[pos..])?;
        self.iter.pos += stored.stored_size();
        Ok(Some((block, pos)))
    }

    fn stored_row_at(&self, block: usize, pos: usize) -> Result<StoredRow<'_>> {
        let block = self.blocks.get(block).ok_or_else(|| {
            StrataError::UnexpectedState(format!("row store block {} missing", block))
        })?;
        StoredRow::parse(&block.data()[pos..])
    }

    /// Returns the next stored row without decoding its cells, or `None`
    /// once every row has been read.
    pub fn next_stored_row(&mut self) -> Result<Option<StoredRow<'_>>> {
        match self.advance_iter()? {
            Some((block, pos)) => self.stored_row_at(block, pos).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes the next row into `row`. Returns its stored form, or `None`
    /// once every row has been read.
    pub fn get_next_row(&mut self, row: &mut Row) -> Result<Option<StoredRow<'_>>> {
        let Some((block, pos)) = self.advance_iter()? else {
            return Ok(None);
        };
        let stored = self.stored_row_at(block, pos)?;
        if let Err(err) = convert(stored.compact_row(), row) {
            warn!(error = %err, "fail to convert compact row");
            return Err(err);
        }
        Ok(Some(stored))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Forgets every row and the reserved columns; blocks are kept.
    pub fn reuse(&mut self) {
        self.rewind();
        self.reserved_columns.clear();
    }

    /// Forgets every row; blocks and reserved columns are kept.
    pub fn clear_rows(&mut self) {
        self.rewind();
    }

    /// Forgets everything and returns all blocks to the allocator.
    pub fn clear(&mut self) {
        self.reuse();
        self.release_blocks();
        self.head = None;
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Blocks holding rows, oldest first.
    fn written_blocks(&self) -> &[Block] {
        match self.head {
            Some(head) => &self.blocks[..=head],
            None => &[],
        }
    }

    /// Returns the number of bytes `serialize_into` writes.
    pub fn serialized_size(&self) -> usize {
        let blocks: usize = self
            .written_blocks()
            .iter()
            .map(|block| {
                Value::Int(block.data_pos() as i64).serialized_size() + block.data_pos()
            })
            .sum();
        blocks
            + Value::Extend(ActionFlag::BasicParamField).serialized_size()
            + encoded_length_vi64(self.last_row_size as i64)
            + Value::Extend(ActionFlag::EndFlag).serialized_size()
    }

    /// Writes the store at `*pos`.
    ///
    /// Wire layout:
    /// ```text
    /// ( Int(block data size) raw block bytes )*
    /// Extend(BASIC_PARAM_FIELD) varint(last row size) Extend(OP_END_FLAG)
    /// ```
    pub fn serialize_into(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        let needed = self.serialized_size();
        let available = buf.len().saturating_sub(*pos);
        if needed > available {
            warn!(needed, available, "row store serialize buffer not enough");
            return Err(StrataError::BufferTooSmall { needed, available });
        }

        let mut p = *pos;
        for block in self.written_blocks() {
            Value::Int(block.data_pos() as i64).serialize(buf, &mut p)?;
            encode_raw(buf, &mut p, block.data())?;
        }
        Value::Extend(ActionFlag::BasicParamField).serialize(buf, &mut p)?;
        encode_vi64(buf, &mut p, self.last_row_size as i64)?;
        Value::Extend(ActionFlag::EndFlag).serialize(buf, &mut p)?;
        *pos = p;
        Ok(())
    }

    /// Serializes into a fresh buffer.
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.serialized_size()];
        let mut pos = 0;
        self.serialize_into(&mut buf, &mut pos)?;
        Ok(Bytes::from(buf))
    }

    /// Replaces the contents of this store with rows read at `*pos`.
    ///
    /// Each serialized block is copied into an empty block of this store.
    /// On error `*pos` is left where it was; the store itself must then be
    /// reused or dropped.
    pub fn deserialize(&mut self, buf: &[u8], pos: &mut usize) -> Result<()> {
        let start = *pos;
        let mut p = start;
        match self.read_from(buf, &mut p) {
            Ok(()) => {
                *pos = p;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, pos = start, "row store deserialize rejected");
                Err(err)
            }
        }
    }

    fn read_from(&mut self, buf: &[u8], p: &mut usize) -> Result<()> {
        self.reuse();

        loop {
            match Value::deserialize(buf, p)? {
                Value::Int(size) => self.read_block(buf, p, size)?,
                Value::Extend(ActionFlag::BasicParamField) => break,
                other => {
                    return Err(StrataError::CorruptData(format!(
                        "expected block size or BASIC_PARAM_FIELD, got {}",
                        other
                    )))
                }
            }
        }

        let last_row_size = decode_vi64(buf, p)?;
        let head_pos = self.head_block().map_or(0, Block::data_pos);
        if last_row_size < 0 || last_row_size as usize > head_pos {
            return Err(StrataError::CorruptData(format!(
                "last row size {} outside head block of {} bytes",
                last_row_size, head_pos
            )));
        }
        self.last_row_size = last_row_size as usize;

        match Value::deserialize(buf, p)? {
            Value::Extend(ActionFlag::EndFlag) => Ok(()),
            other => Err(StrataError::CorruptData(format!(
                "expected OP_END_FLAG, got {}",
                other
            ))),
        }
    }

    fn read_block(&mut self, buf: &[u8], p: &mut usize, size: i64) -> Result<()> {
        self.ensure_empty_block()?;
        let capacity = self.head_block().map_or(0, Block::remain_size);
        if size < 0 || size as usize > capacity {
            return Err(StrataError::CorruptData(format!(
                "block data size {} outside block capacity {}",
                size, capacity
            )));
        }
        let chunk = decode_raw(buf, p, size as usize)?;

        let mut rows = 0;
        let mut offset = 0;
        while offset < chunk.len() {
            offset += StoredRow::parse(&chunk[offset..])?.stored_size();
            rows += 1;
        }

        let head = self.head.ok_or_else(|| {
            StrataError::UnexpectedState("row store has no head block".to_string())
        })?;
        let block = &mut self.blocks[head];
        block.spare_mut()[..chunk.len()].copy_from_slice(chunk);
        block.advance(chunk.len());
        self.cur_size_counter += chunk.len();
        self.row_count += rows;
        debug!(block = head, size = chunk.len(), rows, "deserialized row store block");
        Ok(())
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Number of blocks held, including leftovers past the head.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes held in blocks.
    #[inline]
    pub fn used_mem_size(&self) -> usize {
        self.blocks.len() * self.block_size
    }

    /// Bytes of stored rows, headers included.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.cur_size_counter
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn reserved_columns(&self) -> &[(u64, u64)] {
        &self.reserved_columns
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Returns true if every block still carries its magic tag.
    pub fn is_intact(&self) -> bool {
        self.blocks.iter().all(Block::is_intact)
    }
}

impl<A: PageAllocator> Drop for RowStore<A> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<A: PageAllocator> std::fmt::Display for RowStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "data_size={} block_count={}",
            self.cur_size_counter,
            self.blocks.len()
        )
    }
}

impl<A: PageAllocator> std::fmt::Debug for RowStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStore")
            .field("block_size", &self.block_size)
            .field("block_count", &self.blocks.len())
            .field("head", &self.head)
            .field("row_count", &self.row_count)
            .field("data_size", &self.cur_size_counter)
            .field("reserved_columns", &self.reserved_columns)
            .finish()
    }
}
