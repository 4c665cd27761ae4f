//! Logical rows and their column descriptors.

use std::collections::HashMap;
use std::sync::Arc;
use strata_common::{Result, StrataError, Value};

/// Maximum number of columns a row descriptor can hold.
pub const MAX_COLUMNS: usize = 512;

/// Ordered list of the (table_id, column_id) pairs making up a row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDesc {
    /// Columns in declaration order.
    columns: Vec<(u64, u64)>,
    /// (table_id, column_id) to position.
    index: HashMap<(u64, u64), usize>,
}

impl RowDesc {
    /// Creates an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a descriptor from a column list.
    pub fn from_columns(columns: &[(u64, u64)]) -> Result<Self> {
        let mut desc = Self::new();
        for &(table_id, column_id) in columns {
            desc.add_column_desc(table_id, column_id)?;
        }
        Ok(desc)
    }

    /// Appends a column.
    pub fn add_column_desc(&mut self, table_id: u64, column_id: u64) -> Result<()> {
        if self.columns.len() >= MAX_COLUMNS {
            return Err(StrataError::SizeOverflow {
                what: "row columns",
                limit: MAX_COLUMNS,
            });
        }
        if self.index.contains_key(&(table_id, column_id)) {
            return Err(StrataError::InvalidArgument(format!(
                "column ({}, {}) already in row descriptor",
                table_id, column_id
            )));
        }
        self.index.insert((table_id, column_id), self.columns.len());
        self.columns.push((table_id, column_id));
        Ok(())
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the (table_id, column_id) pair at `index`.
    #[inline]
    pub fn column_at(&self, index: usize) -> Option<(u64, u64)> {
        self.columns.get(index).copied()
    }

    /// Returns the position of a column.
    #[inline]
    pub fn index_of(&self, table_id: u64, column_id: u64) -> Option<usize> {
        self.index.get(&(table_id, column_id)).copied()
    }

    pub fn columns(&self) -> &[(u64, u64)] {
        &self.columns
    }
}

/// A logical row: one cell per descriptor column.
///
/// Cells start out `Null`.
#[derive(Debug, Clone)]
pub struct Row {
    desc: Arc<RowDesc>,
    cells: Vec<Value>,
}

impl Row {
    /// Creates a row of `Null` cells shaped by `desc`.
    pub fn new(desc: Arc<RowDesc>) -> Self {
        let cells = vec![Value::Null; desc.column_count()];
        Self { desc, cells }
    }

    /// Creates a row and fills it with `cells` in column order.
    pub fn with_cells(desc: Arc<RowDesc>, cells: Vec<Value>) -> Result<Self> {
        if cells.len() != desc.column_count() {
            return Err(StrataError::InvalidArgument(format!(
                "row has {} columns, got {} cells",
                desc.column_count(),
                cells.len()
            )));
        }
        Ok(Self { desc, cells })
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.cells.len()
    }

    pub fn desc(&self) -> &Arc<RowDesc> {
        &self.desc
    }

    /// Returns the cell at `index` with its owning table and column ids.
    pub fn cell_at(&self, index: usize) -> Result<(&Value, u64, u64)> {
        match (self.cells.get(index), self.desc.column_at(index)) {
            (Some(value), Some((table_id, column_id))) => Ok((value, table_id, column_id)),
            _ => Err(self.out_of_range(index)),
        }
    }

    /// Looks a cell up by (table_id, column_id).
    pub fn get_cell(&self, table_id: u64, column_id: u64) -> Result<&Value> {
        self.desc
            .index_of(table_id, column_id)
            .and_then(|index| self.cells.get(index))
            .ok_or(StrataError::ColumnNotFound {
                table_id,
                column_id,
            })
    }

    /// Replaces the cell at `index`.
    pub fn set_cell(&mut self, index: usize, value: Value) -> Result<()> {
        let err = self.out_of_range(index);
        let cell = self.cells.get_mut(index).ok_or(err)?;
        *cell = value;
        Ok(())
    }

    /// Replaces the cell of (table_id, column_id).
    pub fn raw_set_cell(&mut self, table_id: u64, column_id: u64, value: Value) -> Result<()> {
        let index = self
            .desc
            .index_of(table_id, column_id)
            .ok_or(StrataError::ColumnNotFound {
                table_id,
                column_id,
            })?;
        self.set_cell(index, value)
    }

    pub fn cells(&self) -> &[Value] {
        &self.cells
    }

    /// Sets every cell back to `Null`.
    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = Value::Null);
    }

    fn out_of_range(&self, index: usize) -> StrataError {
        StrataError::InvalidArgument(format!(
            "cell index {} out of range for {} columns",
            index,
            self.cells.len()
        ))
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.desc.columns() == other.desc.columns() && self.cells == other.cells
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", cell)?;
        }
        write!(f, "]")
    }
}
