use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, ErrorCode, Result},
    sql::types::{ColumnType, Row, Value},
};

/// Table schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Builds and validates a table schema
    pub fn new(name: &str, columns: Vec<Column>) -> Result<Self> {
        let table = Self {
            name: name.to_string(),
            columns,
        };
        table.validate()?;
        Ok(table)
    }

    /// Checks the schema: at least one column, unique names, at most one primary key
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidStatement("table name is empty".into()));
        }
        if self.columns.is_empty() {
            return Err(Error::InvalidStatement(format!("table {} has no columns", self.name)));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(Error::InvalidStatement(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
            if column.column_type == ColumnType::Null {
                return Err(Error::InvalidStatement(format!(
                    "column {} cannot have type NULL",
                    column.name
                )));
            }
            if column.primary_key && column.nullable {
                return Err(Error::InvalidStatement(format!(
                    "primary key column {} cannot be nullable",
                    column.name
                )));
            }
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(Error::InvalidStatement(format!(
                "table {} has more than one primary key",
                self.name
            )));
        }
        Ok(())
    }

    /// Position of the primary key column; `None` means rows are keyed by a hidden row id
    pub fn primary_key(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    /// Returns the column index for a given column name
    pub fn get_col_index(&self, col_name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == col_name)
            .ok_or_else(|| {
                Error::engine(
                    ErrorCode::Error,
                    format!("table {} has no column named {}", self.name, col_name),
                )
            })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Checks a row against the schema before it is stored
    ///
    /// Integers are widened into REAL columns; any other type difference is a
    /// mismatch. NULL in a NOT NULL column violates a constraint.
    pub fn check_row(&self, row: &mut Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::engine(
                ErrorCode::Error,
                format!(
                    "table {} has {} columns but {} values were supplied",
                    self.name,
                    self.columns.len(),
                    row.len()
                ),
            ));
        }

        for (column, value) in self.columns.iter().zip(row.iter_mut()) {
            match (value.column_type(), column.column_type) {
                (ColumnType::Null, _) if column.nullable => {}
                (ColumnType::Null, _) => {
                    return Err(Error::engine(
                        ErrorCode::Constraint,
                        format!("NOT NULL constraint failed: {}.{}", self.name, column.name),
                    ));
                }
                (ColumnType::Integer, ColumnType::Float) => {
                    if let Value::Integer(i) = *value {
                        *value = Value::Float(i as f64);
                    }
                }
                (actual, expected) if actual == expected => {}
                (actual, expected) => {
                    return Err(Error::TypeMismatch(format!(
                        "cannot store {} value in {} column {}.{}",
                        actual, expected, self.name, column.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Column schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Value used when an INSERT omits the column; nullable columns fall back to NULL
    pub default: Option<Value>,
    pub primary_key: bool,
}

impl Column {
    /// A nullable column without default
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    /// Marks the column as the primary key, which implies NOT NULL
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Value stored when an INSERT does not name this column
    pub(crate) fn fill_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, Table};
    use crate::{
        error::{Error, ErrorCode, Result},
        sql::types::{ColumnType, Value},
    };

    fn users() -> Result<Table> {
        Table::new(
            "users",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("name", ColumnType::Text).not_null(),
                Column::new("score", ColumnType::Float),
            ],
        )
    }

    #[test]
    fn test_validate() -> Result<()> {
        assert_eq!(users()?.primary_key(), Some(0));
        assert!(matches!(Table::new("t", vec![]), Err(Error::InvalidStatement(_))));
        assert!(matches!(
            Table::new(
                "t",
                vec![Column::new("a", ColumnType::Integer), Column::new("a", ColumnType::Text)]
            ),
            Err(Error::InvalidStatement(_))
        ));
        assert!(matches!(
            Table::new(
                "t",
                vec![
                    Column::new("a", ColumnType::Integer).primary_key(),
                    Column::new("b", ColumnType::Integer).primary_key()
                ]
            ),
            Err(Error::InvalidStatement(_))
        ));
        assert!(matches!(
            Table::new("t", vec![Column::new("a", ColumnType::Null)]),
            Err(Error::InvalidStatement(_))
        ));
        assert_eq!(Table::new("t", vec![Column::new("a", ColumnType::Blob)])?.primary_key(), None);
        Ok(())
    }

    #[test]
    fn test_check_row() -> Result<()> {
        let table = users()?;

        let mut row = vec![Value::Integer(1), Value::Text("a".into()), Value::Integer(3)];
        table.check_row(&mut row)?;
        assert_eq!(row[2], Value::Float(3.0));

        let mut row = vec![Value::Integer(1), Value::Null, Value::Null];
        let err = table.check_row(&mut row).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Constraint));

        let mut row = vec![Value::Text("1".into()), Value::Text("a".into()), Value::Null];
        assert!(matches!(table.check_row(&mut row), Err(Error::TypeMismatch(_))));
        Ok(())
    }
}
