use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use crate::{
    config::Config,
    error::{Error, ErrorCode, Result},
    sql::{schema::Table, types::{Row, Value}},
    storage::{
        disk::DiskEngine,
        engine::{Engine as StorageEngine, Open},
        memory::MemoryEngine,
    },
};

mod handle;
mod kv;
mod prepared;

pub use handle::{Handle, Step};
pub use kv::{KVEngine, KVTransaction};
pub use prepared::{MAX_PARAMETERS, PreparedStatement};

/// SQL engine trait
pub trait Engine: Clone {
    type Transaction: Transaction + 'static;

    fn begin(&self) -> Result<Self::Transaction>;
}

/// SQL transaction trait (DDL and DML operations)
///
/// Rows are addressed by their id: the primary key value, or the hidden row
/// id of tables declared without one.
pub trait Transaction {
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Stores a new row; with `replace` an existing row with the same key is overwritten
    fn create_row(&mut self, table: &Table, row: Row, replace: bool) -> Result<()>;
    /// Replaces the row stored under `id`, moving it if its primary key changed
    fn update_row(&mut self, table: &Table, id: &Value, row: Row) -> Result<()>;
    fn delete_row(&mut self, table: &Table, id: &Value) -> Result<()>;
    /// Returns every visible row with its id, in id order
    fn scan_table(&self, table: &Table) -> Result<Vec<(Value, Row)>>;

    // DDL operations
    fn create_table(&mut self, table: Table) -> Result<()>;
    /// Drops the table and all its rows
    fn drop_table(&mut self, table_name: &str) -> Result<()>;
    fn get_table(&self, table_name: &str) -> Result<Option<Table>>;
    /// Returns table info, fails if the table doesn't exist
    fn must_get_table(&self, table_name: &str) -> Result<Table> {
        self.get_table(table_name)?.ok_or_else(|| {
            Error::engine(ErrorCode::Error, format!("no such table: {}", table_name))
        })
    }
}

/// Shared store that handles connect to
///
/// Cloning is cheap and every clone refers to the same store. The storage
/// engine is opened by the first handle that connects, not on construction.
pub struct Database<E: StorageEngine + Open + 'static> {
    config: Arc<Config>,
    engine: Arc<Mutex<Option<KVEngine<E>>>>,
}

impl<E: StorageEngine + Open + 'static> Clone for Database<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl Database<MemoryEngine> {
    pub fn memory() -> Self {
        Self::new(Config::memory())
    }
}

impl Database<DiskEngine> {
    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self::new(Config::disk(path))
    }
}

impl<E: StorageEngine + Open + 'static> Database<E> {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a new closed handle on this database
    pub fn handle(&self) -> Handle<E> {
        Handle::new(self.clone())
    }

    /// Returns the SQL engine, opening the storage on first use
    pub(crate) fn connect(&self) -> Result<KVEngine<E>> {
        let mut engine = self.engine.lock()?;
        if let Some(engine) = engine.as_ref() {
            return Ok(engine.clone());
        }

        let storage = E::open(&self.config).map_err(|err| Error::Connection(err.to_string()))?;
        tracing::info!(path = ?self.config.path, "opened storage");
        let opened = KVEngine::new(storage, self.config.sync);
        *engine = Some(opened.clone());
        Ok(opened)
    }

    /// Number of transactions currently open against the store, read
    /// transactions of unfinalized statements included
    pub fn active_transactions(&self) -> Result<usize> {
        match self.engine.lock()?.as_ref() {
            Some(engine) => Ok(engine.kv.active_versions()?.len()),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::{config::Config, error::{Error, Result}, storage::disk::DiskEngine};

    #[test]
    fn test_lazy_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lazy.db");
        let db = Database::disk(&path);
        assert!(!path.exists());
        assert_eq!(db.active_transactions()?, 0);

        let mut handle = db.handle();
        handle.open()?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_open_failure_is_connection_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // a directory cannot be opened as the log file
        let db: Database<DiskEngine> = Database::new(Config::disk(dir.path()));
        let mut handle = db.handle();
        assert!(matches!(handle.open(), Err(Error::Connection(_))));
        assert!(matches!(handle.last_error(), Some(Error::Connection(_))));
        assert!(!handle.is_open());
        Ok(())
    }
}
