//! Typed value conversion between Rust values and stored column values
//!
//! `ToColumn` is total: every implementor maps to exactly one `ColumnType`
//! (`Option<T>` maps `None` to NULL). `FromColumn` fails with
//! `Error::TypeMismatch` when the stored value does not fit.

use crate::{
    error::{Error, Result},
    sql::{
        expr::Expression,
        types::{ColumnType, Value},
    },
};

pub trait ToColumn {
    /// Storage type used for non-null values of this type
    fn column_type() -> ColumnType
    where
        Self: Sized;

    fn to_value(&self) -> Value;
}

pub trait FromColumn: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

impl<T: ToColumn> From<T> for Value {
    fn from(value: T) -> Self {
        value.to_value()
    }
}

impl<T: ToColumn> From<T> for Expression {
    fn from(value: T) -> Self {
        Expression::Literal(value.to_value())
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Literal(value)
    }
}

fn mismatch(expected: ColumnType, value: &Value) -> Error {
    Error::TypeMismatch(format!(
        "expected {} value, found {}",
        expected,
        value.column_type()
    ))
}

macro_rules! integer_column {
    ($($t:ty),*) => {$(
        impl ToColumn for $t {
            fn column_type() -> ColumnType {
                ColumnType::Integer
            }

            fn to_value(&self) -> Value {
                Value::Integer(*self as i64)
            }
        }

        impl FromColumn for $t {
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Integer(i) => <$t>::try_from(i).map_err(|_| {
                        Error::TypeMismatch(format!(
                            "integer {} out of range for {}",
                            i,
                            stringify!($t)
                        ))
                    }),
                    v => Err(mismatch(ColumnType::Integer, &v)),
                }
            }
        }
    )*};
}

integer_column!(i64, i32, u32);

impl ToColumn for bool {
    fn column_type() -> ColumnType {
        ColumnType::Integer
    }

    fn to_value(&self) -> Value {
        Value::from_bool(*self)
    }
}

impl FromColumn for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i != 0),
            v => Err(mismatch(ColumnType::Integer, &v)),
        }
    }
}

impl ToColumn for f64 {
    fn column_type() -> ColumnType {
        ColumnType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl FromColumn for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            v => Err(mismatch(ColumnType::Float, &v)),
        }
    }
}

impl ToColumn for f32 {
    fn column_type() -> ColumnType {
        ColumnType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }
}

impl FromColumn for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl ToColumn for String {
    fn column_type() -> ColumnType {
        ColumnType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToColumn for &str {
    fn column_type() -> ColumnType {
        ColumnType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromColumn for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            v => Err(mismatch(ColumnType::Text, &v)),
        }
    }
}

impl ToColumn for Vec<u8> {
    fn column_type() -> ColumnType {
        ColumnType::Blob
    }

    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }
}

impl ToColumn for &[u8] {
    fn column_type() -> ColumnType {
        ColumnType::Blob
    }

    fn to_value(&self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl FromColumn for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(b) => Ok(b),
            v => Err(mismatch(ColumnType::Blob, &v)),
        }
    }
}

impl<T: ToColumn> ToColumn for Option<T> {
    fn column_type() -> ColumnType {
        T::column_type()
    }

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromColumn> FromColumn for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

/// Plain values pass through unchanged when read back
impl FromColumn for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{FromColumn, ToColumn};
    use crate::{
        error::{Error, Result},
        sql::types::{ColumnType, Value},
    };

    fn round_trip<T: ToColumn + FromColumn + PartialEq + std::fmt::Debug>(value: T) -> Result<()> {
        let stored = value.to_value();
        assert_eq!(T::from_value(stored)?, value);
        Ok(())
    }

    #[test]
    fn test_round_trip_per_column_type() -> Result<()> {
        round_trip(42i64)?;
        round_trip(-7i32)?;
        round_trip(true)?;
        round_trip(3.25f64)?;
        round_trip("hello".to_string())?;
        round_trip(vec![0u8, 1, 255])?;
        round_trip(None::<i64>)?;
        round_trip(Some("x".to_string()))?;

        assert_eq!(i64::column_type(), ColumnType::Integer);
        assert_eq!(f32::column_type(), ColumnType::Float);
        assert_eq!(<&str>::column_type(), ColumnType::Text);
        assert_eq!(<Vec<u8>>::column_type(), ColumnType::Blob);
        assert_eq!(None::<String>.to_value().column_type(), ColumnType::Null);
        Ok(())
    }

    #[test]
    fn test_mismatch() -> Result<()> {
        assert!(matches!(
            i64::from_value(Value::Text("1".into())),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(String::from_value(Value::Null), Err(Error::TypeMismatch(_))));
        assert!(matches!(
            u32::from_value(Value::Integer(-1)),
            Err(Error::TypeMismatch(_))
        ));
        // integers widen to floats
        assert_eq!(f64::from_value(Value::Integer(3))?, 3.0);
        Ok(())
    }

    #[test]
    fn test_into_value() {
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(false), Value::Integer(0));
        assert_eq!(Value::from(Some(1.5)), Value::Float(1.5));
        assert_eq!(Value::from(&b"ab"[..]), Value::Blob(b"ab".to_vec()));
    }
}
