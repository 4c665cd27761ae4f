//! Stored row encoding.
//!
//! Stored row layout:
//! ```text
//! +----------------------------+ 0
//! | reserved_cells_count: u32  | 4
//! | compact_row_size: u32      | 8 (STORED_ROW_HEADER_SIZE)
//! +----------------------------+
//! | reserved cell slots        | count * RESERVED_CELL_SIZE
//! +----------------------------+
//! | compact row                | compact_row_size
//! +----------------------------+
//! ```

use super::constants::{reserved_cells_size, MAX_RESERVED_COLUMNS, RESERVED_CELL_SIZE};
use crate::compact::{CompactCellWriter, Escape, LayoutMode};
use crate::row::Row;
use bytes::Bytes;
use strata_common::{ActionFlag, ObjType, Result, StrataError, Value};

/// Read-only view of one row inside a block.
#[derive(Clone, Copy)]
pub struct StoredRow<'a> {
    bytes: &'a [u8],
}

impl<'a> StoredRow<'a> {
    /// Parses the stored row at the start of `buf`.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < reserved_cells_size(0) {
            return Err(StrataError::CorruptData(format!(
                "stored row header needs {} bytes, {} left",
                reserved_cells_size(0),
                buf.len()
            )));
        }
        let count = read_u32(buf, 0) as usize;
        if count > MAX_RESERVED_COLUMNS {
            return Err(StrataError::CorruptData(format!(
                "stored row claims {} reserved cells",
                count
            )));
        }
        let size = reserved_cells_size(count) + read_u32(buf, 4) as usize;
        if size > buf.len() {
            return Err(StrataError::CorruptData(format!(
                "stored row of {} bytes overruns block ({} left)",
                size,
                buf.len()
            )));
        }
        Ok(Self {
            bytes: &buf[..size],
        })
    }

    #[inline]
    pub fn reserved_cells_count(&self) -> usize {
        read_u32(self.bytes, 0) as usize
    }

    #[inline]
    pub fn compact_row_size(&self) -> usize {
        read_u32(self.bytes, 4) as usize
    }

    /// Total bytes of this row in its block.
    #[inline]
    pub fn stored_size(&self) -> usize {
        self.bytes.len()
    }

    /// The compact-encoded cells.
    #[inline]
    pub fn compact_row(&self) -> &'a [u8] {
        &self.bytes[reserved_cells_size(self.reserved_cells_count())..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Decodes reserved cell `index` without touching the other cells.
    pub fn reserved_cell(&self, index: usize) -> Result<Value> {
        let count = self.reserved_cells_count();
        if index >= count {
            return Err(StrataError::InvalidArgument(format!(
                "reserved cell {} out of range for {} cells",
                index, count
            )));
        }
        let start = reserved_cells_size(index);
        decode_reserved_cell(
            &self.bytes[start..start + RESERVED_CELL_SIZE],
            self.compact_row(),
        )
    }
}

impl std::fmt::Debug for StoredRow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredRow")
            .field("reserved_cells_count", &self.reserved_cells_count())
            .field("compact_row_size", &self.compact_row_size())
            .finish()
    }
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Encodes `row` as a stored row at the start of `buf`, copying the cells of
/// `reserved` columns into the header slots. Returns the stored size.
///
/// Fails with `BufferInsufficient` when the row does not fit. Nothing past
/// the returned size is touched on success.
pub(crate) fn encode_stored_row(
    buf: &mut [u8],
    row: &Row,
    reserved: &[(u64, u64)],
) -> Result<usize> {
    let header_size = reserved_cells_size(reserved.len());
    if buf.len() < header_size {
        return Err(StrataError::BufferInsufficient);
    }
    let (header, body) = buf.split_at_mut(header_size);
    header.fill(0);
    header[..4].copy_from_slice(&(reserved.len() as u32).to_le_bytes());

    let mut writer = CompactCellWriter::new(body, LayoutMode::Sparse);
    for index in 0..row.column_count() {
        let (value, table_id, column_id) = row.cell_at(index)?;
        let data_offset = match value {
            Value::Extend(flag) => {
                writer.append_escape(Escape::from_action_flag(*flag)?)?;
                0
            }
            _ => writer.append(column_id, value)?,
        };

        if let Some(slot) = reserved
            .iter()
            .position(|&(tid, cid)| tid == table_id && cid == column_id)
        {
            let start = reserved_cells_size(slot);
            encode_reserved_cell(
                &mut header[start..start + RESERVED_CELL_SIZE],
                value,
                data_offset,
            )?;
        }
    }
    writer.row_finish()?;

    let compact_size = writer.size();
    let compact_size_u32 = u32::try_from(compact_size).map_err(|_| StrataError::SizeOverflow {
        what: "compact row size",
        limit: u32::MAX as usize,
    })?;
    header[4..8].copy_from_slice(&compact_size_u32.to_le_bytes());
    Ok(header_size + compact_size)
}

fn encode_reserved_cell(slot: &mut [u8], value: &Value, data_offset: usize) -> Result<()> {
    slot[0] = value.obj_type() as u8;
    let payload = match value {
        Value::Null => 0,
        Value::Bool(v) => *v as u64,
        Value::Int(v) | Value::DateTime(v) | Value::PreciseDateTime(v) => *v as u64,
        Value::Float(v) => v.to_bits() as u64,
        Value::Double(v) => v.to_bits(),
        Value::Varchar(v) => {
            let len = u32::try_from(v.len()).map_err(|_| StrataError::SizeOverflow {
                what: "reserved varchar length",
                limit: u32::MAX as usize,
            })?;
            slot[4..8].copy_from_slice(&len.to_le_bytes());
            data_offset as u64
        }
        Value::Extend(flag) => *flag as i64 as u64,
    };
    slot[8..16].copy_from_slice(&payload.to_le_bytes());
    Ok(())
}

fn decode_reserved_cell(slot: &[u8], compact_row: &[u8]) -> Result<Value> {
    let payload = read_u64(slot, 8);
    let value = match ObjType::try_from(slot[0])? {
        ObjType::Null => Value::Null,
        ObjType::Bool => Value::Bool(payload != 0),
        ObjType::Int => Value::Int(payload as i64),
        ObjType::DateTime => Value::DateTime(payload as i64),
        ObjType::PreciseDateTime => Value::PreciseDateTime(payload as i64),
        ObjType::Float => Value::Float(f32::from_bits(payload as u32)),
        ObjType::Double => Value::Double(f64::from_bits(payload)),
        ObjType::Varchar => {
            let len = read_u32(slot, 4) as usize;
            let start = payload as usize;
            let data = start
                .checked_add(len)
                .and_then(|end| compact_row.get(start..end))
                .ok_or_else(|| {
                    StrataError::CorruptData(format!(
                        "reserved varchar [{}, +{}) outside compact row of {} bytes",
                        start,
                        len,
                        compact_row.len()
                    ))
                })?;
            Value::Varchar(Bytes::copy_from_slice(data))
        }
        ObjType::Extend => Value::Extend(ActionFlag::try_from(payload as i64)?),
    };
    Ok(value)
}
