use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        schema::Table,
        types::{Row, Value},
    },
    storage::{
        self,
        engine::Engine as StorageEngine,
        keycode,
        mvcc::{Mvcc, MvccTransaction},
    },
};

use super::{Engine, Transaction};

/// Key-value store backed SQL engine
pub struct KVEngine<E: StorageEngine> {
    pub kv: storage::mvcc::Mvcc<E>,
    sync: bool,
}

impl<E: StorageEngine> Clone for KVEngine<E> {
    fn clone(&self) -> Self {
        Self {
            kv: self.kv.clone(),
            sync: self.sync,
        }
    }
}

impl<E: StorageEngine> KVEngine<E> {
    /// With `sync`, every commit is flushed to durable storage
    pub fn new(engine: E, sync: bool) -> Self {
        Self {
            kv: Mvcc::new(engine),
            sync,
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.kv.flush()
    }
}

impl<E: StorageEngine + 'static> Engine for KVEngine<E> {
    type Transaction = KVTransaction<E>;

    fn begin(&self) -> Result<Self::Transaction> {
        Ok(KVTransaction {
            txn: self.kv.begin()?,
            kv: self.kv.clone(),
            sync: self.sync,
        })
    }
}

/// Key-value transaction (wrapper around MVCC transaction)
pub struct KVTransaction<E: StorageEngine> {
    txn: MvccTransaction<E>,
    kv: Mvcc<E>,
    sync: bool,
}

impl<E: StorageEngine> KVTransaction<E> {
    pub fn version(&self) -> u64 {
        self.txn.version()
    }

    fn row_exists(&self, table: &Table, id: &Value) -> Result<bool> {
        Ok(self.txn.get(Key::Row(&table.name, id).encode())?.is_some())
    }

    /// Allocates the next hidden row id of a table
    fn next_row_id(&mut self, table: &Table) -> Result<i64> {
        let key = Key::RowId(&table.name).encode();
        let last: i64 = match self.txn.get(key.clone())? {
            Some(value) => bincode::deserialize(&value)?,
            None => 0,
        };
        let next = last.checked_add(1).ok_or_else(|| {
            Error::engine(ErrorCode::Range, format!("row ids of table {} exhausted", table.name))
        })?;
        self.txn.set(key, bincode::serialize(&next)?)?;
        Ok(next)
    }

    /// Keeps the row id counter ahead of explicitly chosen integer keys
    fn observe_row_id(&mut self, table: &Table, id: i64) -> Result<()> {
        let key = Key::RowId(&table.name).encode();
        let last: i64 = match self.txn.get(key.clone())? {
            Some(value) => bincode::deserialize(&value)?,
            None => 0,
        };
        if id > last {
            self.txn.set(key, bincode::serialize(&id)?)?;
        }
        Ok(())
    }

    fn write_row(&mut self, table: &Table, id: &Value, row: &Row) -> Result<()> {
        self.txn.set(
            Key::Row(&table.name, id).encode(),
            bincode::serialize(&(id, row))?,
        )
    }
}

fn unique_violation(table: &Table) -> Error {
    let column = table
        .primary_key()
        .map(|i| table.columns[i].name.as_str())
        .unwrap_or("rowid");
    Error::engine(
        ErrorCode::Constraint,
        format!("UNIQUE constraint failed: {}.{}", table.name, column),
    )
}

impl<E: StorageEngine> Transaction for KVTransaction<E> {
    fn commit(&self) -> Result<()> {
        self.txn.commit()?;
        if self.sync {
            self.kv.flush()?;
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.txn.rollback()
    }

    fn create_row(&mut self, table: &Table, mut row: Row, replace: bool) -> Result<()> {
        // an omitted INTEGER primary key is assigned like a row id
        if let Some(pk) = table.primary_key() {
            if row.get(pk).is_some_and(Value::is_null)
                && table.columns[pk].column_type == crate::sql::types::ColumnType::Integer
            {
                row[pk] = Value::Integer(self.next_row_id(table)?);
            }
        }
        table.check_row(&mut row)?;

        let id = match table.primary_key() {
            Some(pk) => {
                let id = row[pk].clone();
                if let Value::Integer(i) = id {
                    self.observe_row_id(table, i)?;
                }
                id
            }
            None => Value::Integer(self.next_row_id(table)?),
        };

        if !replace && self.row_exists(table, &id)? {
            return Err(unique_violation(table));
        }
        self.write_row(table, &id, &row)
    }

    fn update_row(&mut self, table: &Table, id: &Value, mut row: Row) -> Result<()> {
        table.check_row(&mut row)?;

        let new_id = match table.primary_key() {
            Some(pk) => row[pk].clone(),
            None => id.clone(),
        };
        if new_id != *id {
            if self.row_exists(table, &new_id)? {
                return Err(unique_violation(table));
            }
            self.txn.delete(Key::Row(&table.name, id).encode())?;
        }
        self.write_row(table, &new_id, &row)
    }

    fn delete_row(&mut self, table: &Table, id: &Value) -> Result<()> {
        self.txn.delete(Key::Row(&table.name, id).encode())
    }

    fn scan_table(&self, table: &Table) -> Result<Vec<(Value, Row)>> {
        let prefix = KeyPrefix::Row(&table.name).encode();
        self.txn
            .scan_prefix(prefix)?
            .into_iter()
            .map(|result| Ok(bincode::deserialize(&result.value)?))
            .collect()
    }

    fn create_table(&mut self, table: Table) -> Result<()> {
        if self.get_table(&table.name)?.is_some() {
            return Err(Error::engine(
                ErrorCode::Error,
                format!("table {} already exists", table.name),
            ));
        }
        table.validate()?;

        let key = Key::Table(&table.name).encode();
        self.txn.set(key, bincode::serialize(&table)?)
    }

    fn drop_table(&mut self, table_name: &str) -> Result<()> {
        let table = self.must_get_table(table_name)?;
        for (id, _) in self.scan_table(&table)? {
            self.delete_row(&table, &id)?;
        }
        self.txn.delete(Key::RowId(table_name).encode())?;
        self.txn.delete(Key::Table(table_name).encode())
    }

    fn get_table(&self, table_name: &str) -> Result<Option<Table>> {
        self.txn
            .get(Key::Table(table_name).encode())?
            .map(|v| bincode::deserialize(&v))
            .transpose()
            .map_err(Error::from)
    }
}

/// Keys of the SQL layer in the KV store
///
/// Encoded by hand with `keycode` so that rows of one table sort by id and
/// share a prefix that no other table's rows can extend.
#[derive(Debug)]
enum Key<'a> {
    Table(&'a str),
    Row(&'a str, &'a Value),
    RowId(&'a str),
}

impl Key<'_> {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Key::Table(name) => {
                out.push(0x01);
                keycode::encode_bytes(&mut out, name.as_bytes());
            }
            Key::Row(table, id) => {
                out.push(0x02);
                keycode::encode_bytes(&mut out, table.as_bytes());
                id.encode_key(&mut out);
            }
            Key::RowId(table) => {
                out.push(0x03);
                keycode::encode_bytes(&mut out, table.as_bytes());
            }
        }
        out
    }
}

/// Key prefixes for prefix scanning
enum KeyPrefix<'a> {
    Row(&'a str),
}

impl KeyPrefix<'_> {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            KeyPrefix::Row(table) => {
                out.push(0x02);
                keycode::encode_bytes(&mut out, table.as_bytes());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{Key, KeyPrefix, KVEngine};
    use crate::{
        error::{Error, ErrorCode, Result},
        sql::{
            engine::{Engine, Transaction},
            schema::{Column, Table},
            types::{ColumnType, Value},
        },
        storage::memory::MemoryEngine,
    };

    fn users() -> Result<Table> {
        Table::new(
            "users",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("name", ColumnType::Text),
            ],
        )
    }

    #[test]
    fn test_row_prefix_is_exclusive() {
        let id = Value::Integer(1);
        let prefix = KeyPrefix::Row("user").encode();
        assert!(!Key::Row("users", &id).encode().starts_with(&prefix));
        assert!(Key::Row("user", &id).encode().starts_with(&prefix));
    }

    #[test]
    fn test_create_scan_update_delete() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new(), false);
        let mut txn = engine.begin()?;
        txn.create_table(users()?)?;
        let table = txn.must_get_table("users")?;

        txn.create_row(&table, vec![Value::Integer(2), Value::Text("b".into())], false)?;
        txn.create_row(&table, vec![Value::Integer(1), Value::Text("a".into())], false)?;
        // omitted integer key is assigned after the largest id seen
        txn.create_row(&table, vec![Value::Null, Value::Text("c".into())], false)?;

        let rows = txn.scan_table(&table)?;
        let ids: Vec<Value> = rows.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);

        let err = txn
            .create_row(&table, vec![Value::Integer(1), Value::Null], false)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Constraint));
        txn.create_row(&table, vec![Value::Integer(1), Value::Text("z".into())], true)?;

        txn.update_row(&table, &Value::Integer(1), vec![Value::Integer(10), Value::Text("z".into())])?;
        let err = txn
            .update_row(&table, &Value::Integer(2), vec![Value::Integer(10), Value::Null])
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Constraint));

        txn.delete_row(&table, &Value::Integer(2))?;
        let rows = txn.scan_table(&table)?;
        assert_eq!(
            rows,
            vec![
                (Value::Integer(3), vec![Value::Integer(3), Value::Text("c".into())]),
                (Value::Integer(10), vec![Value::Integer(10), Value::Text("z".into())]),
            ]
        );
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn test_hidden_row_id() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new(), false);
        let mut txn = engine.begin()?;
        txn.create_table(Table::new("log", vec![Column::new("msg", ColumnType::Text)])?)?;
        let table = txn.must_get_table("log")?;
        txn.create_row(&table, vec![Value::Text("x".into())], false)?;
        txn.create_row(&table, vec![Value::Text("x".into())], false)?;
        assert_eq!(txn.scan_table(&table)?.len(), 2);

        txn.drop_table("log")?;
        assert!(txn.get_table("log")?.is_none());
        assert!(matches!(
            txn.must_get_table("log"),
            Err(Error::Engine { code: ErrorCode::Error, .. })
        ));
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn test_type_checks() -> Result<()> {
        let engine = KVEngine::new(MemoryEngine::new(), false);
        let mut txn = engine.begin()?;
        txn.create_table(users()?)?;
        let table = txn.must_get_table("users")?;
        assert!(matches!(
            txn.create_row(&table, vec![Value::Text("1".into()), Value::Null], false),
            Err(Error::TypeMismatch(_))
        ));
        txn.rollback()?;

        // rolled back DDL is gone
        let txn = engine.begin()?;
        assert!(txn.get_table("users")?.is_none());
        Ok(())
    }
}
