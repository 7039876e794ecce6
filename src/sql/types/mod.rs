use std::{cmp::Ordering, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::storage::keycode;

mod convert;

pub use convert::{FromColumn, ToColumn};

/// Canonical storage type of a column or value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Null => "NULL",
        })
    }
}

/// Runtime value, the stored representation of every column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Null => ColumnType::Null,
            Self::Integer(_) => ColumnType::Integer,
            Self::Float(_) => ColumnType::Float,
            Self::Text(_) => ColumnType::Text,
            Self::Blob(_) => ColumnType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness in a WHERE/HAVING position: non-zero numbers are true
    pub fn is_true(&self) -> bool {
        match self {
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            _ => false,
        }
    }

    pub fn from_bool(b: bool) -> Self {
        Self::Integer(b as i64)
    }

    /// Total order across storage classes: NULL < numbers < TEXT < BLOB.
    /// Integers and floats compare by numeric value.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (a, b) => a.class_rank().cmp(&b.class_rank()),
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    /// Appends an order-preserving encoding of the value, used for row keys
    /// and grouping keys
    pub fn encode_key(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(0x00),
            Value::Integer(i) => {
                out.push(0x01);
                keycode::encode_i64(out, *i);
            }
            Value::Float(f) => {
                out.push(0x02);
                keycode::encode_f64(out, *f);
            }
            Value::Text(s) => {
                out.push(0x03);
                keycode::encode_bytes(out, s.as_bytes());
            }
            Value::Blob(b) => {
                out.push(0x04);
                keycode::encode_bytes(out, b);
            }
        }
    }
}

/// Renders the value as a SQL literal
impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Value::Blob(v) => {
                write!(f, "X'")?;
                for b in v {
                    write!(f, "{:02X}", b)?;
                }
                write!(f, "'")
            }
        }
    }
}

/// Implements partial ordering for Value comparison (used by ORDER BY)
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.compare(other))
    }
}

/// A row is a vector of values
pub type Row = Vec<Value>;
