//! Row values and their storage encoding.
//!
//! A row travels through the executors as a `Vec<Cell>` in the logical
//! column order. On disk it is laid out in storage order (fixed-width
//! fields first, strings last): fixed fields at their declared width,
//! CHAR fields zero-padded to their declared size, VARCHAR fields with a
//! u16 length prefix.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::{
    error::WrenError,
    storage::schema::{ColumnSchema, FieldType, TableSchema},
};

#[derive(Debug, Clone)]
pub enum Cell {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
}

pub type Row = Vec<Cell>;

impl Cell {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int32(v) => Some(*v as i64),
            Cell::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int32(v) => Some(*v as f64),
            Cell::Int64(v) => Some(*v as f64),
            Cell::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Cell::Int32(_) | Cell::Int64(_))
    }

    /// Coerce the cell to a column's type, applying integer widening /
    /// narrowing and int→float promotion. Strings never convert.
    pub fn coerce_to(&self, col: &ColumnSchema) -> Result<Cell, WrenError> {
        match (col.field_type, self) {
            (FieldType::Int32, Cell::Int32(v)) => Ok(Cell::Int32(*v)),
            (FieldType::Int32, Cell::Int64(v)) => {
                if *v < i32::MIN as i64 || *v > i32::MAX as i64 {
                    return Err(WrenError::schema(&format!(
                        "value {} out of range for int32 column {}",
                        v, col.name
                    )));
                }
                Ok(Cell::Int32(*v as i32))
            }
            (FieldType::Int64, Cell::Int32(v)) => Ok(Cell::Int64(*v as i64)),
            (FieldType::Int64, Cell::Int64(v)) => Ok(Cell::Int64(*v)),
            (FieldType::Float64, Cell::Float64(v)) => Ok(Cell::Float64(*v)),
            (FieldType::Float64, Cell::Int32(v)) => Ok(Cell::Float64(*v as f64)),
            (FieldType::Float64, Cell::Int64(v)) => Ok(Cell::Float64(*v as f64)),
            (FieldType::Char, Cell::String(s)) | (FieldType::Varchar, Cell::String(s)) => {
                if s.len() > col.size as usize {
                    return Err(WrenError::schema(&format!(
                        "string of {} bytes too long for column {}({})",
                        s.len(),
                        col.name,
                        col.size
                    )));
                }
                Ok(Cell::String(s.clone()))
            }
            _ => Err(WrenError::schema(&format!(
                "type mismatch for column {}: {:?}",
                col.name, self
            ))),
        }
    }

    /// Canonical bytes for hashing and grouping. Integers widen to 8
    /// bytes so that int32 and int64 cells of equal value collide.
    pub fn hash_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Cell::Int32(v) => out.put_i64_le(*v as i64),
            Cell::Int64(v) => out.put_i64_le(*v),
            Cell::Float64(v) => out.put_u64_le(v.to_bits()),
            Cell::String(s) => {
                out.put_u32_le(s.len() as u32);
                out.put_slice(s.as_bytes());
            }
        }
    }
}

// Comparison follows the engine's promotion rules: int32 widens to
// int64, int/float mixes compare as float64. Strings only compare with
// strings.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Cell::String(a), Cell::String(b)) => a.partial_cmp(b),
            (a, b) if a.is_integer() && b.is_integer() => {
                a.as_i64().unwrap().partial_cmp(&b.as_i64().unwrap())
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cell::Int32(v) => write!(f, "{}", v),
            Cell::Int64(v) => write!(f, "{}", v),
            Cell::Float64(v) => write!(f, "{}", v),
            Cell::String(s) => write!(f, "{}", s),
        }
    }
}

/// Encode a logical-order row into storage order. The cells must already
/// have the column types (see `Cell::coerce_to`).
pub fn encode_row(schema: &TableSchema, row: &[Cell]) -> Result<Vec<u8>, WrenError> {
    if row.len() != schema.columns().len() {
        return Err(WrenError::schema(&format!(
            "row of {} cells for table {} with {} columns",
            row.len(),
            schema.name(),
            schema.columns().len()
        )));
    }
    let mut buf = Vec::new();
    for &logical in schema.storage_order() {
        let col = &schema.columns()[logical];
        let cell = &row[logical];
        match (col.field_type, cell) {
            (FieldType::Int32, Cell::Int32(v)) => buf.put_i32_le(*v),
            (FieldType::Int64, Cell::Int64(v)) => buf.put_i64_le(*v),
            (FieldType::Float64, Cell::Float64(v)) => buf.put_f64_le(*v),
            (FieldType::Char, Cell::String(s)) => {
                if s.len() > col.size as usize {
                    return Err(WrenError::schema(&format!(
                        "string too long for column {}",
                        col.name
                    )));
                }
                buf.put_slice(s.as_bytes());
                buf.put_bytes(0, col.size as usize - s.len());
            }
            (FieldType::Varchar, Cell::String(s)) => {
                if s.len() > col.size as usize {
                    return Err(WrenError::schema(&format!(
                        "string too long for column {}",
                        col.name
                    )));
                }
                buf.put_u16_le(s.len() as u16);
                buf.put_slice(s.as_bytes());
            }
            _ => {
                return Err(WrenError::schema(&format!(
                    "type mismatch for column {}: {:?}",
                    col.name, cell
                )))
            }
        }
    }
    Ok(buf)
}

/// Decode storage bytes back into a logical-order row.
pub fn decode_row(schema: &TableSchema, bytes: &[u8]) -> Result<Row, WrenError> {
    let mut buf = bytes;
    let mut row: Vec<Option<Cell>> = vec![None; schema.columns().len()];
    for &logical in schema.storage_order() {
        let col = &schema.columns()[logical];
        let cell = match col.field_type {
            FieldType::Int32 => {
                check_remaining(&buf, 4, col)?;
                Cell::Int32(buf.get_i32_le())
            }
            FieldType::Int64 => {
                check_remaining(&buf, 8, col)?;
                Cell::Int64(buf.get_i64_le())
            }
            FieldType::Float64 => {
                check_remaining(&buf, 8, col)?;
                Cell::Float64(buf.get_f64_le())
            }
            FieldType::Char => {
                check_remaining(&buf, col.size as usize, col)?;
                let mut raw = vec![0u8; col.size as usize];
                buf.copy_to_slice(&mut raw);
                while raw.last() == Some(&0) {
                    raw.pop();
                }
                Cell::String(
                    String::from_utf8(raw)
                        .map_err(|_| WrenError::io("stored string is not utf-8"))?,
                )
            }
            FieldType::Varchar => {
                check_remaining(&buf, 2, col)?;
                let len = buf.get_u16_le() as usize;
                check_remaining(&buf, len, col)?;
                let mut raw = vec![0u8; len];
                buf.copy_to_slice(&mut raw);
                Cell::String(
                    String::from_utf8(raw)
                        .map_err(|_| WrenError::io("stored string is not utf-8"))?,
                )
            }
        };
        row[logical] = Some(cell);
    }
    Ok(row.into_iter().map(|c| c.unwrap()).collect())
}

fn check_remaining(buf: &&[u8], need: usize, col: &ColumnSchema) -> Result<(), WrenError> {
    if buf.remaining() < need {
        return Err(WrenError::io(&format!(
            "truncated tuple while reading column {}",
            col.name
        )));
    }
    Ok(())
}

/// Encode a primary key cell as B+tree key bytes.
pub fn encode_key(cell: &Cell, col: &ColumnSchema) -> Result<Vec<u8>, WrenError> {
    match (col.field_type, cell) {
        (FieldType::Int32, Cell::Int32(v)) => Ok(v.to_le_bytes().to_vec()),
        (FieldType::Int32, Cell::Int64(v)) => Ok((*v as i32).to_le_bytes().to_vec()),
        (FieldType::Int64, _) if cell.is_integer() => {
            Ok(cell.as_i64().unwrap().to_le_bytes().to_vec())
        }
        (FieldType::Float64, _) => match cell.as_f64() {
            Some(v) => Ok(v.to_le_bytes().to_vec()),
            None => Err(WrenError::schema("non-numeric key for float column")),
        },
        (FieldType::Char, Cell::String(s)) | (FieldType::Varchar, Cell::String(s)) => {
            Ok(s.as_bytes().to_vec())
        }
        _ => Err(WrenError::schema(&format!(
            "cannot use {:?} as key for column {}",
            cell, col.name
        ))),
    }
}

pub fn decode_key(col: &ColumnSchema, bytes: &[u8]) -> Result<Cell, WrenError> {
    match col.field_type {
        FieldType::Int32 => {
            if bytes.len() == 4 {
                Ok(Cell::Int32(i32::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            } else {
                Err(WrenError::io("bad int32 key length"))
            }
        }
        FieldType::Int64 => {
            if bytes.len() == 8 {
                let mut b = [0u8; 8];
                b.copy_from_slice(bytes);
                Ok(Cell::Int64(i64::from_le_bytes(b)))
            } else {
                Err(WrenError::io("bad int64 key length"))
            }
        }
        FieldType::Float64 => {
            if bytes.len() == 8 {
                let mut b = [0u8; 8];
                b.copy_from_slice(bytes);
                Ok(Cell::Float64(f64::from_le_bytes(b)))
            } else {
                Err(WrenError::io("bad float key length"))
            }
        }
        FieldType::Char | FieldType::Varchar => Ok(Cell::String(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| WrenError::io("stored key is not utf-8"))?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::ColumnSchema;

    fn sample_schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnSchema::varchar("name", 16),
                ColumnSchema::int64("id"),
                ColumnSchema::float64("score"),
                ColumnSchema::char("tag", 4),
            ],
            1,
            false,
            false,
            vec![],
        )
    }

    #[test]
    fn test_row_roundtrip() {
        let schema = sample_schema();
        let row = vec![
            Cell::String("bob".to_string()),
            Cell::Int64(7),
            Cell::Float64(2.5),
            Cell::String("xy".to_string()),
        ];
        let bytes = encode_row(&schema, &row).unwrap();
        let back = decode_row(&schema, &bytes).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_row_rejects_type_mismatch() {
        let schema = sample_schema();
        let row = vec![
            Cell::Int64(1),
            Cell::Int64(7),
            Cell::Float64(2.5),
            Cell::String("xy".to_string()),
        ];
        assert!(encode_row(&schema, &row).is_err());
    }

    #[test]
    fn test_cell_promotion() {
        assert_eq!(Cell::Int32(5), Cell::Int64(5));
        assert!(Cell::Int32(5) < Cell::Int64(6));
        assert_eq!(Cell::Int64(2), Cell::Float64(2.0));
        assert!(Cell::Float64(1.5) < Cell::Int32(2));
        assert_ne!(Cell::String("2".to_string()), Cell::Int64(2));
    }

    #[test]
    fn test_key_roundtrip() {
        let col = ColumnSchema::int64("id");
        let key = encode_key(&Cell::Int64(-3), &col).unwrap();
        assert_eq!(key.len(), 8);
        assert_eq!(decode_key(&col, &key).unwrap(), Cell::Int64(-3));

        let col = ColumnSchema::varchar("name", 8);
        let key = encode_key(&Cell::String("ann".to_string()), &col).unwrap();
        assert_eq!(decode_key(&col, &key).unwrap(), Cell::String("ann".to_string()));
    }
}
