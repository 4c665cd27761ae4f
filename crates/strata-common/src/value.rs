//! Cell values and their tagged binary encoding.

use crate::error::{Result, StrataError};
use crate::serialization::{
    decode_i8, decode_raw, decode_vi64, decode_vstr, encode_i8, encode_raw, encode_vi64,
    encode_vstr, encoded_length_vi64, encoded_length_vstr,
};
use crate::types::{ActionFlag, ObjType};
use bytes::Bytes;

/// A single cell value.
///
/// `Extend` cells carry a control marker instead of data (a deleted row, a
/// row that does not exist, and so on).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    DateTime(i64),
    PreciseDateTime(i64),
    Varchar(Bytes),
    Extend(ActionFlag),
}

impl Value {
    /// Creates a varchar value by copying `data`.
    pub fn varchar(data: impl AsRef<[u8]>) -> Self {
        Value::Varchar(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Returns the type tag of this value.
    pub fn obj_type(&self) -> ObjType {
        match self {
            Value::Null => ObjType::Null,
            Value::Bool(_) => ObjType::Bool,
            Value::Int(_) => ObjType::Int,
            Value::Float(_) => ObjType::Float,
            Value::Double(_) => ObjType::Double,
            Value::DateTime(_) => ObjType::DateTime,
            Value::PreciseDateTime(_) => ObjType::PreciseDateTime,
            Value::Varchar(_) => ObjType::Varchar,
            Value::Extend(_) => ObjType::Extend,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_extend(&self) -> bool {
        matches!(self, Value::Extend(_))
    }

    fn mismatch(&self, expected: ObjType) -> StrataError {
        StrataError::TypeMismatch {
            expected: expected.to_string(),
            actual: self.obj_type().to_string(),
        }
    }

    pub fn get_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch(ObjType::Int)),
        }
    }

    pub fn get_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(ObjType::Bool)),
        }
    }

    pub fn get_double(&self) -> Result<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            _ => Err(self.mismatch(ObjType::Double)),
        }
    }

    pub fn get_varchar(&self) -> Result<&[u8]> {
        match self {
            Value::Varchar(v) => Ok(v.as_ref()),
            _ => Err(self.mismatch(ObjType::Varchar)),
        }
    }

    pub fn get_ext(&self) -> Result<ActionFlag> {
        match self {
            Value::Extend(flag) => Ok(*flag),
            _ => Err(self.mismatch(ObjType::Extend)),
        }
    }

    /// Returns the number of bytes `serialize` writes.
    pub fn serialized_size(&self) -> usize {
        1 + self.payload_size()
    }

    /// Returns the size of the payload that follows the type byte.
    pub fn payload_size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(v) | Value::DateTime(v) | Value::PreciseDateTime(v) => {
                encoded_length_vi64(*v)
            }
            Value::Float(_) => 4,
            Value::Double(_) => 8,
            Value::Varchar(v) => encoded_length_vstr(v.len()),
            Value::Extend(flag) => encoded_length_vi64(*flag as i64),
        }
    }

    /// Writes the tagged encoding of this value at `*pos`.
    ///
    /// Layout: one type byte followed by a type-specific payload. Integers
    /// and extend flags are varints, floats are little-endian IEEE bits,
    /// varchars are length-prefixed.
    pub fn serialize(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        let available = buf.len().saturating_sub(*pos);
        let needed = self.serialized_size();
        if needed > available {
            return Err(StrataError::BufferTooSmall { needed, available });
        }

        encode_i8(buf, pos, self.obj_type() as u8)?;
        self.serialize_payload(buf, pos)
    }

    /// Writes only the payload, without the type byte.
    pub fn serialize_payload(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        let available = buf.len().saturating_sub(*pos);
        let needed = self.payload_size();
        if needed > available {
            return Err(StrataError::BufferTooSmall { needed, available });
        }

        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => encode_i8(buf, pos, *v as u8),
            Value::Int(v) | Value::DateTime(v) | Value::PreciseDateTime(v) => {
                encode_vi64(buf, pos, *v)
            }
            Value::Float(v) => encode_raw(buf, pos, &v.to_bits().to_le_bytes()),
            Value::Double(v) => encode_raw(buf, pos, &v.to_bits().to_le_bytes()),
            Value::Varchar(v) => encode_vstr(buf, pos, v),
            Value::Extend(flag) => encode_vi64(buf, pos, *flag as i64),
        }
    }

    /// Reads a tagged value at `*pos`.
    pub fn deserialize(buf: &[u8], pos: &mut usize) -> Result<Value> {
        let mut p = *pos;
        let obj_type = ObjType::try_from(decode_i8(buf, &mut p)?)?;
        let value = Self::deserialize_payload(obj_type, buf, &mut p)?;
        *pos = p;
        Ok(value)
    }

    /// Reads the payload of a value whose type byte was already consumed.
    pub fn deserialize_payload(obj_type: ObjType, buf: &[u8], pos: &mut usize) -> Result<Value> {
        let mut p = *pos;
        let value = match obj_type {
            ObjType::Null => Value::Null,
            ObjType::Bool => Value::Bool(decode_i8(buf, &mut p)? != 0),
            ObjType::Int => Value::Int(decode_vi64(buf, &mut p)?),
            ObjType::DateTime => Value::DateTime(decode_vi64(buf, &mut p)?),
            ObjType::PreciseDateTime => Value::PreciseDateTime(decode_vi64(buf, &mut p)?),
            ObjType::Float => {
                let raw = decode_raw(buf, &mut p, 4)?;
                Value::Float(f32::from_bits(u32::from_le_bytes([
                    raw[0], raw[1], raw[2], raw[3],
                ])))
            }
            ObjType::Double => {
                let raw = decode_raw(buf, &mut p, 8)?;
                let mut bits = [0u8; 8];
                bits.copy_from_slice(raw);
                Value::Double(f64::from_bits(u64::from_le_bytes(bits)))
            }
            ObjType::Varchar => Value::varchar(decode_vstr(buf, &mut p)?),
            ObjType::Extend => Value::Extend(ActionFlag::try_from(decode_vi64(buf, &mut p)?)?),
        };
        *pos = p;
        Ok(value)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::varchar(v)
    }
}

impl From<ActionFlag> for Value {
    fn from(flag: ActionFlag) -> Self {
        Value::Extend(flag)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "DATETIME({})", v),
            Value::PreciseDateTime(v) => write!(f, "PRECISE_DATETIME({})", v),
            Value::Varchar(v) => write!(f, "'{}'", String::from_utf8_lossy(v)),
            Value::Extend(flag) => write!(f, "{}", flag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        let mut buf = vec![0u8; value.serialized_size()];
        let mut pos = 0;
        value.serialize(&mut buf, &mut pos).unwrap();
        assert_eq!(pos, buf.len());

        let mut read = 0;
        let decoded = Value::deserialize(&buf, &mut read).unwrap();
        assert_eq!(read, pos);
        decoded
    }

    #[test]
    fn test_obj_type() {
        assert_eq!(Value::Null.obj_type(), ObjType::Null);
        assert_eq!(Value::Int(1).obj_type(), ObjType::Int);
        assert_eq!(Value::varchar("a").obj_type(), ObjType::Varchar);
        assert_eq!(Value::Extend(ActionFlag::Nop).obj_type(), ObjType::Extend);
    }

    #[test]
    fn test_getters() {
        assert_eq!(Value::Int(42).get_int().unwrap(), 42);
        assert!(Value::Bool(true).get_bool().unwrap());
        assert_eq!(Value::Double(1.5).get_double().unwrap(), 1.5);
        assert_eq!(Value::varchar("abc").get_varchar().unwrap(), b"abc");
        assert_eq!(
            Value::Extend(ActionFlag::DeleteRow).get_ext().unwrap(),
            ActionFlag::DeleteRow
        );

        let err = Value::varchar("abc").get_int().unwrap_err();
        assert_eq!(err.to_string(), "Type mismatch: expected INT, got VARCHAR");
    }

    #[test]
    fn test_tagged_encoding_preserves_each_type() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Int(-7),
            Value::Float(2.5),
            Value::Double(-0.125),
            Value::DateTime(1_700_000_000),
            Value::PreciseDateTime(1_700_000_000_123_456),
            Value::varchar("hello"),
            Value::Extend(ActionFlag::EndFlag),
        ];
        for value in &values {
            assert_eq!(&roundtrip(value), value);
        }
    }

    #[test]
    fn test_int_layout() {
        let mut buf = [0u8; 8];
        let mut pos = 0;
        Value::Int(5).serialize(&mut buf, &mut pos).unwrap();
        assert_eq!(&buf[..pos], &[ObjType::Int as u8, 5]);
    }

    #[test]
    fn test_serialize_buffer_too_small() {
        let mut buf = [0u8; 3];
        let mut pos = 1;
        let err = Value::varchar("hello").serialize(&mut buf, &mut pos).unwrap_err();
        assert!(matches!(err, StrataError::BufferTooSmall { needed: 7, available: 2 }));
        assert_eq!(pos, 1);
    }

    #[test]
    fn test_deserialize_rejects_bad_tag() {
        let buf = [99u8, 0, 0];
        let mut pos = 0;
        assert!(matches!(
            Value::deserialize(&buf, &mut pos),
            Err(StrataError::CorruptData(_))
        ));
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_deserialize_rejects_bad_flag() {
        let buf = [ObjType::Extend as u8, 99];
        let mut pos = 0;
        assert!(Value::deserialize(&buf, &mut pos).is_err());
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_payload_without_tag() {
        let value = Value::varchar("abc");
        let mut buf = [0u8; 8];
        let mut pos = 0;
        value.serialize_payload(&mut buf, &mut pos).unwrap();
        assert_eq!(pos, value.payload_size());
        assert_eq!(pos, value.serialized_size() - 1);

        let mut read = 0;
        let decoded = Value::deserialize_payload(ObjType::Varchar, &buf, &mut read).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(read, pos);
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from(false), Value::Bool(false));
        assert_eq!(Value::from("x"), Value::varchar("x"));
        assert_eq!(Value::from(ActionFlag::Nop), Value::Extend(ActionFlag::Nop));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::varchar("ab").to_string(), "'ab'");
        assert_eq!(Value::Extend(ActionFlag::NewAdd).to_string(), "OP_NEW_ADD");
    }
}
