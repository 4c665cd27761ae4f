//! Type identifiers for Strata cell values.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};

/// Identifier for all supported cell types in Strata.
///
/// The numeric codes are part of the wire format: they prefix every tagged
/// value and every compact-encoded cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjType {
    Null = 0,
    Int = 1,
    Float = 2,
    Double = 3,
    DateTime = 4,
    PreciseDateTime = 5,
    Varchar = 6,
    /// Control marker carried in place of a value.
    Extend = 10,
    Bool = 11,
}

impl TryFrom<u8> for ObjType {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ObjType::Null),
            1 => Ok(ObjType::Int),
            2 => Ok(ObjType::Float),
            3 => Ok(ObjType::Double),
            4 => Ok(ObjType::DateTime),
            5 => Ok(ObjType::PreciseDateTime),
            6 => Ok(ObjType::Varchar),
            10 => Ok(ObjType::Extend),
            11 => Ok(ObjType::Bool),
            _ => Err(StrataError::CorruptData(format!(
                "invalid object type: {}",
                value
            ))),
        }
    }
}

impl std::fmt::Display for ObjType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjType::Null => "NULL",
            ObjType::Int => "INT",
            ObjType::Float => "FLOAT",
            ObjType::Double => "DOUBLE",
            ObjType::DateTime => "DATETIME",
            ObjType::PreciseDateTime => "PRECISE_DATETIME",
            ObjType::Varchar => "VARCHAR",
            ObjType::Extend => "EXTEND",
            ObjType::Bool => "BOOL",
        };
        write!(f, "{}", name)
    }
}

/// Control flags carried by `Extend` cells and by the row store wire format.
///
/// The first five are per-cell markers that can appear inside a row. The
/// last two only delimit sections of a serialized row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum ActionFlag {
    Valid = 1,
    RowDoesNotExist = 2,
    DeleteRow = 3,
    NewAdd = 4,
    Nop = 5,
    BasicParamField = 6,
    EndFlag = 7,
}

impl TryFrom<i64> for ActionFlag {
    type Error = StrataError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ActionFlag::Valid),
            2 => Ok(ActionFlag::RowDoesNotExist),
            3 => Ok(ActionFlag::DeleteRow),
            4 => Ok(ActionFlag::NewAdd),
            5 => Ok(ActionFlag::Nop),
            6 => Ok(ActionFlag::BasicParamField),
            7 => Ok(ActionFlag::EndFlag),
            _ => Err(StrataError::CorruptData(format!(
                "invalid action flag: {}",
                value
            ))),
        }
    }
}

impl std::fmt::Display for ActionFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionFlag::Valid => "OP_VALID",
            ActionFlag::RowDoesNotExist => "OP_ROW_DOES_NOT_EXIST",
            ActionFlag::DeleteRow => "OP_DEL_ROW",
            ActionFlag::NewAdd => "OP_NEW_ADD",
            ActionFlag::Nop => "OP_NOP",
            ActionFlag::BasicParamField => "BASIC_PARAM_FIELD",
            ActionFlag::EndFlag => "OP_END_FLAG",
        };
        write!(f, "{}", name)
    }
}
