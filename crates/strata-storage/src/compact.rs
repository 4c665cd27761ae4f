//! Compact cell encoding for rows held in the row store.
//!
//! A compact row is a sequence of cells terminated by an end-row escape:
//! ```text
//! cell   := meta:u8 [column_id:varint] payload
//! escape := 0xF0 escape:u8
//! row    := (cell | escape)* 0xF0 END_ROW
//! ```
//! `meta` is the value's `ObjType` code. The column id is only written in
//! sparse layout. Payloads use the same encoding as tagged values.

use crate::row::Row;
use strata_common::serialization::{
    decode_i8, decode_vi64, encode_i8, encode_vi64, encoded_length_vi64,
};
use strata_common::{ActionFlag, ObjType, Result, StrataError, Value};

/// Meta byte introducing an escape.
pub const ESCAPE_META: u8 = 0xF0;

/// Whether cells carry their column id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// Every cell is preceded by its column id.
    #[default]
    Sparse,
    /// Cells appear in column order without ids.
    Dense,
}

/// Escape codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Escape {
    EndRow = 0,
    Valid = 1,
    NotExistRow = 2,
    DelRow = 3,
    NewAdd = 4,
    NopRow = 5,
}

impl Escape {
    /// Maps a cell marker to its escape. Wire-only flags have no escape.
    pub fn from_action_flag(flag: ActionFlag) -> Result<Self> {
        match flag {
            ActionFlag::Valid => Ok(Escape::Valid),
            ActionFlag::RowDoesNotExist => Ok(Escape::NotExistRow),
            ActionFlag::DeleteRow => Ok(Escape::DelRow),
            ActionFlag::NewAdd => Ok(Escape::NewAdd),
            ActionFlag::Nop => Ok(Escape::NopRow),
            ActionFlag::BasicParamField | ActionFlag::EndFlag => Err(
                StrataError::NotSupported(format!("{} cannot be stored in a row", flag)),
            ),
        }
    }

    /// Maps a cell escape back to its marker. `EndRow` has none.
    pub fn to_action_flag(self) -> Option<ActionFlag> {
        match self {
            Escape::EndRow => None,
            Escape::Valid => Some(ActionFlag::Valid),
            Escape::NotExistRow => Some(ActionFlag::RowDoesNotExist),
            Escape::DelRow => Some(ActionFlag::DeleteRow),
            Escape::NewAdd => Some(ActionFlag::NewAdd),
            Escape::NopRow => Some(ActionFlag::Nop),
        }
    }
}

impl TryFrom<u8> for Escape {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Escape::EndRow),
            1 => Ok(Escape::Valid),
            2 => Ok(Escape::NotExistRow),
            3 => Ok(Escape::DelRow),
            4 => Ok(Escape::NewAdd),
            5 => Ok(Escape::NopRow),
            _ => Err(StrataError::CorruptData(format!(
                "invalid compact escape: {}",
                value
            ))),
        }
    }
}

/// Lower bound on the encoded size of a row with `column_count` cells.
#[inline]
pub fn min_row_size(column_count: usize) -> usize {
    column_count + 2
}

/// Writes cells into a caller-provided buffer.
pub struct CompactCellWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    mode: LayoutMode,
}

impl<'a> CompactCellWriter<'a> {
    pub fn new(buf: &'a mut [u8], mode: LayoutMode) -> Self {
        Self { buf, pos: 0, mode }
    }

    /// Bytes written so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.pos
    }

    #[inline]
    fn remain(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Appends one value cell.
    ///
    /// Returns the offset of the value's raw bytes within the row; for a
    /// varchar that is past the length prefix. Fails with
    /// `BufferInsufficient` when the cell does not fit, leaving the writer
    /// unchanged.
    pub fn append(&mut self, column_id: u64, value: &Value) -> Result<usize> {
        if let Value::Extend(flag) = value {
            return Err(StrataError::NotSupported(format!(
                "extend value {} must be appended as an escape",
                flag
            )));
        }

        let id_len = match self.mode {
            LayoutMode::Sparse => encoded_length_vi64(column_id as i64),
            LayoutMode::Dense => 0,
        };
        let needed = 1 + id_len + value.payload_size();
        if needed > self.remain() {
            return Err(StrataError::BufferInsufficient);
        }

        let mut pos = self.pos;
        encode_i8(self.buf, &mut pos, value.obj_type() as u8)?;
        if self.mode == LayoutMode::Sparse {
            encode_vi64(self.buf, &mut pos, column_id as i64)?;
        }
        let mut data_offset = pos;
        if let Value::Varchar(bytes) = value {
            data_offset += encoded_length_vi64(bytes.len() as i64);
        }
        value.serialize_payload(self.buf, &mut pos)?;
        self.pos = pos;
        Ok(data_offset)
    }

    pub fn append_escape(&mut self, escape: Escape) -> Result<()> {
        if self.remain() < 2 {
            return Err(StrataError::BufferInsufficient);
        }
        self.buf[self.pos] = ESCAPE_META;
        self.buf[self.pos + 1] = escape as u8;
        self.pos += 2;
        Ok(())
    }

    /// Terminates the row.
    pub fn row_finish(&mut self) -> Result<()> {
        self.append_escape(Escape::EndRow)
    }
}

/// One decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactCell {
    /// Column id, present for sparse value cells.
    pub column_id: Option<u64>,
    pub value: Value,
}

/// Reads cells back out of a compact row.
pub struct CompactCellReader<'a> {
    buf: &'a [u8],
    pos: usize,
    mode: LayoutMode,
    finished: bool,
}

impl<'a> CompactCellReader<'a> {
    pub fn new(buf: &'a [u8], mode: LayoutMode) -> Self {
        Self {
            buf,
            pos: 0,
            mode,
            finished: false,
        }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the next cell, or `None` once the end-row escape is read.
    ///
    /// Escapes other than end-row come back as `Extend` values.
    pub fn next_cell(&mut self) -> Result<Option<CompactCell>> {
        if self.finished {
            return Ok(None);
        }

        let mut pos = self.pos;
        let meta = decode_i8(self.buf, &mut pos)
            .map_err(|_| StrataError::CorruptData("compact row missing end marker".to_string()))?;

        let cell = if meta == ESCAPE_META {
            let escape = Escape::try_from(decode_i8(self.buf, &mut pos)?)?;
            match escape.to_action_flag() {
                Some(flag) => Some(CompactCell {
                    column_id: None,
                    value: Value::Extend(flag),
                }),
                None => {
                    self.finished = true;
                    None
                }
            }
        } else {
            let obj_type = ObjType::try_from(meta)?;
            if obj_type == ObjType::Extend {
                return Err(StrataError::CorruptData(
                    "extend value outside an escape".to_string(),
                ));
            }
            let column_id = match self.mode {
                LayoutMode::Sparse => Some(decode_vi64(self.buf, &mut pos)? as u64),
                LayoutMode::Dense => None,
            };
            let value = Value::deserialize_payload(obj_type, self.buf, &mut pos)?;
            Some(CompactCell { column_id, value })
        };
        self.pos = pos;
        Ok(cell)
    }
}

/// Rebuilds `row` from a sparse compact row.
///
/// Cells are assigned in column order; columns past the last encoded cell
/// become `Null`.
pub fn convert(compact_row: &[u8], row: &mut Row) -> Result<()> {
    let mut reader = CompactCellReader::new(compact_row, LayoutMode::Sparse);
    let mut index = 0;
    while let Some(cell) = reader.next_cell()? {
        if index >= row.column_count() {
            return Err(StrataError::CorruptData(format!(
                "compact row has more than {} cells",
                row.column_count()
            )));
        }
        row.set_cell(index, cell.value)?;
        index += 1;
    }
    for rest in index..row.column_count() {
        row.set_cell(rest, Value::Null)?;
    }
    Ok(())
}
