use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        engine::{Database, Engine, KVEngine, KVTransaction, PreparedStatement, Transaction},
        schema::{Column, Table},
        statement::{Compile, Statement},
        types::{Row, Value},
    },
    storage::engine::{Engine as StorageEngine, Open},
};

/// Outcome of stepping a prepared statement
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Row(Row),
    /// No more rows; repeated steps keep returning `Done`
    Done,
}

enum Slot<E: StorageEngine + 'static> {
    Empty,
    Prepared(PreparedStatement<E>),
    /// Finalized after reaching Done under auto-finalize
    Exhausted,
}

fn closed() -> Error {
    Error::engine(ErrorCode::Misuse, "handle is not open")
}

/// A connection to a database
///
/// A handle holds at most one prepared statement, the last error it produced,
/// the row count of the last mutation, and an optional explicit transaction.
/// Without an explicit transaction every statement commits on its own.
///
/// Every failing call returns the error and also stores it as `last_error()`.
/// Dropping an open handle closes it.
pub struct Handle<E: StorageEngine + Open + 'static> {
    database: Database<E>,
    engine: Option<KVEngine<E>>,
    slot: Slot<E>,
    txn: Option<KVTransaction<E>>,
    last_error: Option<Error>,
    changes: usize,
    auto_finalize: bool,
}

impl<E: StorageEngine + Open + 'static> Handle<E> {
    pub(crate) fn new(database: Database<E>) -> Self {
        let auto_finalize = database.config().auto_finalize;
        Self {
            database,
            engine: None,
            slot: Slot::Empty,
            txn: None,
            last_error: None,
            changes: 0,
            auto_finalize,
        }
    }

    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            tracing::debug!(error = %err, "handle call failed");
            self.last_error = Some(err.clone());
        }
        result
    }

    fn engine(&self) -> Result<&KVEngine<E>> {
        self.engine.as_ref().ok_or_else(closed)
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    /// Connects to the database; opening an open handle does nothing
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let result = self.database.connect();
        match self.record(result) {
            Ok(engine) => {
                tracing::debug!("opened handle");
                self.engine = Some(engine);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Finalizes the prepared statement, rolls back an explicit transaction,
    /// flushes the store and disconnects. Closing a closed handle does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };
        let mut result = self.finalize_slot();
        if let Some(txn) = self.txn.take() {
            tracing::debug!(version = txn.version(), "rolling back transaction left open at close");
            result = result.and(txn.rollback());
        }
        result = result.and(engine.flush());
        tracing::debug!("closed handle");
        self.record(result)
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Rows inserted, updated or deleted by the most recent mutation
    pub fn changes(&self) -> usize {
        self.changes
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self.slot, Slot::Prepared(_))
    }

    /// Output column names of the prepared query, once it has been stepped
    pub fn column_names(&self) -> &[String] {
        match &self.slot {
            Slot::Prepared(statement) => statement.columns(),
            _ => &[],
        }
    }

    /// With auto-finalize on (the default), a statement is finalized as soon
    /// as `execute` returns or stepping reaches `Done`
    pub fn auto_finalize(&mut self, enabled: bool) -> &mut Self {
        self.auto_finalize = enabled;
        self
    }

    /// Compiles a statement into the slot, finalizing the previous one
    ///
    /// Compile errors are returned before the store is touched.
    pub fn prepare(&mut self, statement: &impl Compile) -> Result<()> {
        let result = self.prepare_statement(statement);
        self.record(result)
    }

    fn prepare_statement(&mut self, statement: &impl Compile) -> Result<()> {
        let statement = statement.statement()?;
        if !self.is_open() {
            return Err(closed());
        }
        self.finalize_slot()?;
        tracing::trace!(sql = %statement, "prepared statement");
        self.slot = Slot::Prepared(PreparedStatement::new(statement)?);
        Ok(())
    }

    fn prepared(&mut self) -> Result<&mut PreparedStatement<E>> {
        match &mut self.slot {
            Slot::Prepared(statement) => Ok(statement),
            _ => Err(Error::engine(ErrorCode::Misuse, "no statement is prepared")),
        }
    }

    /// Binds the 1-based parameter `index` of the prepared statement
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let result = self.prepared().and_then(|s| s.bind(index, value));
        self.record(result)
    }

    pub fn bind_named(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let result = self.prepared().and_then(|s| s.bind_named(name, value));
        self.record(result)
    }

    /// Resets every parameter of the prepared statement to NULL
    pub fn clear_bindings(&mut self) -> Result<()> {
        let result = self.prepared().map(|s| s.clear_bindings());
        self.record(result)
    }

    /// Rewinds the prepared statement so it can run again, keeping its bindings
    pub fn reset(&mut self) -> Result<()> {
        let result = self.prepared().and_then(|s| s.reset());
        self.record(result)
    }

    /// Advances the prepared statement by one row
    ///
    /// The first step executes the statement; mutations run to completion and
    /// return `Done`.
    pub fn step(&mut self) -> Result<Step> {
        let result = self.step_statement();
        self.record(result)
    }

    fn step_statement(&mut self) -> Result<Step> {
        let engine = self.engine.as_ref().ok_or_else(closed)?;
        let step = match &mut self.slot {
            Slot::Empty => return Err(Error::engine(ErrorCode::Misuse, "no statement is prepared")),
            Slot::Exhausted => return Ok(Step::Done),
            Slot::Prepared(statement) => {
                let step = statement.step(engine, self.txn.as_mut())?;
                if statement.is_mutation() {
                    self.changes = statement.changes();
                }
                step
            }
        };
        tracing::trace!(done = step == Step::Done, "stepped statement");

        if step == Step::Done && self.auto_finalize {
            self.finalize_slot()?;
            self.slot = Slot::Exhausted;
        }
        Ok(step)
    }

    /// Prepares and steps a statement once
    ///
    /// Returns the first row of a query, `None` for everything else. With
    /// auto-finalize on the statement is finalized before returning, on error
    /// too; otherwise it stays prepared for further `step` calls.
    pub fn execute(&mut self, statement: &impl Compile) -> Result<Option<Row>> {
        self.prepare(statement)?;
        let result = self.step();
        if self.auto_finalize {
            let finalized = self.finalize();
            if result.is_ok() {
                finalized?;
            }
        }
        Ok(match result? {
            Step::Row(row) => Some(row),
            Step::Done => None,
        })
    }

    /// Releases the prepared statement; finalizing twice is harmless
    pub fn finalize(&mut self) -> Result<()> {
        let result = self.finalize_slot();
        self.record(result)
    }

    fn finalize_slot(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Prepared(mut statement) => {
                tracing::trace!("finalized statement");
                statement.release()
            }
            Slot::Empty | Slot::Exhausted => Ok(()),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Starts an explicit transaction; statements run in it until commit or rollback
    pub fn begin(&mut self) -> Result<()> {
        let result = match (&self.txn, self.engine()) {
            (Some(_), _) => Err(Error::engine(ErrorCode::Misuse, "a transaction is already active")),
            (None, Ok(engine)) => engine.begin(),
            (None, Err(err)) => Err(err),
        };
        match self.record(result) {
            Ok(txn) => {
                tracing::debug!(version = txn.version(), "began transaction");
                self.txn = Some(txn);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn take_transaction(&mut self) -> Result<KVTransaction<E>> {
        self.txn
            .take()
            .ok_or_else(|| Error::engine(ErrorCode::Misuse, "no transaction is active"))
    }

    pub fn commit(&mut self) -> Result<()> {
        let result = self.take_transaction().and_then(|txn| {
            tracing::debug!(version = txn.version(), "committing transaction");
            txn.commit()
        });
        self.record(result)
    }

    pub fn rollback(&mut self) -> Result<()> {
        let result = self.take_transaction().and_then(|txn| {
            tracing::debug!(version = txn.version(), "rolling back transaction");
            txn.rollback()
        });
        self.record(result)
    }

    /// Runs `f` in a transaction, committing when it succeeds and rolling
    /// back when it fails
    pub fn run_transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if self.in_transaction() {
                    self.rollback()?;
                }
                Err(err)
            }
        }
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> Result<()> {
        self.create(name, columns, false)
    }

    pub fn create_table_if_not_exists(&mut self, name: &str, columns: Vec<Column>) -> Result<()> {
        self.create(name, columns, true)
    }

    fn create(&mut self, name: &str, columns: Vec<Column>, if_not_exists: bool) -> Result<()> {
        let schema = Table::new(name, columns);
        let schema = self.record(schema)?;
        self.execute(&Statement::CreateTable {
            schema,
            if_not_exists,
        })
        .map(|_| ())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.execute(&Statement::DropTable {
            name: name.to_string(),
            if_exists: false,
        })
        .map(|_| ())
    }

    pub fn table_exists(&mut self, name: &str) -> Result<bool> {
        let result = self.lookup_table(name).map(|t| t.is_some());
        self.record(result)
    }

    fn lookup_table(&mut self, name: &str) -> Result<Option<Table>> {
        if let Some(txn) = &self.txn {
            return txn.get_table(name);
        }
        let txn = self.engine()?.begin()?;
        let table = txn.get_table(name);
        txn.commit()?;
        table
    }
}

impl<E: StorageEngine + Open + 'static> Drop for Handle<E> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::Step;
    use crate::{
        config::Config,
        error::{Error, ErrorCode, Result},
        sql::{
            engine::{Database, Handle},
            expr::{bind, bind_named, column, count_all, literal},
            schema::Column,
            statement::StatementBuilder,
            types::{ColumnType, Value},
        },
        storage::{
            engine::{Engine, Open},
            memory::{MemoryEngine, MemoryEngineIterator},
        },
    };

    fn users(db: &Database<MemoryEngine>) -> Result<Handle<MemoryEngine>> {
        let mut handle = db.handle();
        handle.open()?;
        handle.create_table(
            "users",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("name", ColumnType::Text).not_null(),
                Column::new("age", ColumnType::Integer),
            ],
        )?;
        Ok(handle)
    }

    fn insert(handle: &mut Handle<MemoryEngine>, id: i64, name: &str, age: i64) -> Result<()> {
        let mut insert = StatementBuilder::insert();
        insert
            .into_table("users")
            .values([literal(id), literal(name), literal(age)])?;
        handle.execute(&insert)?;
        Ok(())
    }

    #[test]
    fn test_limit_sorted_scenario() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        // 25 adults inserted in reverse name order, plus some minors
        for i in 0..25 {
            insert(&mut handle, i, &format!("user{:02}", 24 - i), 30)?;
        }
        for i in 25..30 {
            insert(&mut handle, i, &format!("child{}", i), 10)?;
        }

        handle.prepare(
            StatementBuilder::select([column("name")])
                .from("users")
                .where_(column("age").gt(18))
                .order([column("name").asc()])
                .limit(10),
        )?;
        let mut names = Vec::new();
        while let Step::Row(row) = handle.step()? {
            names.push(row[0].clone());
        }
        let expected: Vec<Value> = (0..10).map(|i| Value::Text(format!("user{:02}", i))).collect();
        assert_eq!(names, expected);
        assert_eq!(handle.step()?, Step::Done);
        assert_eq!(handle.step()?, Step::Done);
        Ok(())
    }

    #[test]
    fn test_close_with_prepared_statement() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        insert(&mut handle, 1, "a", 20)?;
        insert(&mut handle, 2, "b", 21)?;

        handle.prepare(StatementBuilder::select(["*"]).from("users"))?;
        assert!(matches!(handle.step()?, Step::Row(_)));
        // the unfinished query holds its read transaction
        assert_eq!(db.active_transactions()?, 1);

        handle.close()?;
        assert!(!handle.is_prepared());
        assert_eq!(db.active_transactions()?, 0);
        assert!(handle.last_error().is_none());
        Ok(())
    }

    #[test]
    fn test_finalize_twice() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        handle.auto_finalize(false);
        handle.prepare(StatementBuilder::select(["*"]).from("users"))?;
        assert_eq!(handle.step()?, Step::Done);
        assert_eq!(handle.step()?, Step::Done);
        assert!(handle.is_prepared());

        handle.finalize()?;
        handle.finalize()?;
        assert!(!handle.is_prepared());
        assert_eq!(db.active_transactions()?, 0);
        assert!(handle.last_error().is_none());
        Ok(())
    }

    #[test]
    fn test_failed_step_repeats_error() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        insert(&mut handle, 1, "a", 20)?;
        handle.auto_finalize(false);

        handle.prepare(StatementBuilder::select([column("nope")]).from("users"))?;
        let err = handle.step().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Error));
        assert_eq!(handle.step().unwrap_err(), err);
        assert_eq!(handle.step().unwrap_err(), err);
        assert_eq!(db.active_transactions()?, 0);

        // reset runs the statement again
        handle.reset()?;
        assert_eq!(handle.step().unwrap_err(), err);
        handle.finalize()?;

        let oversized = StatementBuilder::select(["*"])
            .from("users")
            .where_(column("id").eq(bind(usize::MAX)))
            .clone();
        let err = handle.prepare(&oversized).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Range));
        assert!(!handle.is_prepared());
        Ok(())
    }

    static ENGINE_CALLS: AtomicUsize = AtomicUsize::new(0);

    /// Memory engine that counts every storage call
    struct CountingEngine(MemoryEngine);

    impl Open for CountingEngine {
        fn open(_config: &Config) -> Result<Self> {
            Ok(Self(MemoryEngine::new()))
        }
    }

    impl Engine for CountingEngine {
        type EngineIterator<'a> = MemoryEngineIterator<'a>;

        fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
            ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
            self.0.set(key, value)
        }

        fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
            ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
            self.0.get(key)
        }

        fn delete(&mut self, key: Vec<u8>) -> Result<()> {
            ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
            self.0.delete(key)
        }

        fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_> {
            ENGINE_CALLS.fetch_add(1, Ordering::SeqCst);
            self.0.scan(range)
        }
    }

    #[test]
    fn test_execute_without_from_touches_nothing() -> Result<()> {
        let db: Database<CountingEngine> = Database::new(Config::memory());
        let mut handle = db.handle();
        handle.open()?;
        let before = ENGINE_CALLS.load(Ordering::SeqCst);

        let mut select = StatementBuilder::select(["*"]);
        select.where_(column("a").eq(1));
        let err = handle.execute(&select).unwrap_err();
        assert!(matches!(err, Error::InvalidStatement(_)));
        assert_eq!(handle.last_error(), Some(&err));
        assert_eq!(ENGINE_CALLS.load(Ordering::SeqCst), before);
        Ok(())
    }

    #[test]
    fn test_bind_and_reset() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        handle.auto_finalize(false);

        let mut insert = StatementBuilder::insert();
        insert
            .into_table("users")
            .values([bind(1), bind_named("name"), literal(40)])?;
        handle.prepare(&insert)?;
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            handle.bind(1, id)?;
            handle.bind_named("name", name)?;
            assert_eq!(handle.step()?, Step::Done);
            assert_eq!(handle.changes(), 1);
            // bindings are frozen until reset
            assert_eq!(handle.bind(1, 9).unwrap_err().code(), Some(ErrorCode::Misuse));
            handle.reset()?;
        }
        assert_eq!(handle.bind(4, 1).unwrap_err().code(), Some(ErrorCode::Range));
        handle.finalize()?;

        let count = handle.execute(&StatementBuilder::select([count_all()]).from("users").clone())?;
        assert_eq!(count, Some(vec![Value::Integer(3)]));
        Ok(())
    }

    #[test]
    fn test_misuse() -> Result<()> {
        let db = Database::memory();
        let mut handle = db.handle();
        let select = StatementBuilder::select(["*"]).from("users").clone();
        assert_eq!(handle.execute(&select).unwrap_err().code(), Some(ErrorCode::Misuse));

        handle.open()?;
        handle.open()?;
        assert_eq!(handle.step().unwrap_err().code(), Some(ErrorCode::Misuse));
        assert_eq!(handle.commit().unwrap_err().code(), Some(ErrorCode::Misuse));

        // unknown table is an engine error, recorded in the handle
        let err = handle.execute(&select).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Error));
        assert_eq!(handle.last_error(), Some(&err));
        handle.close()?;
        handle.close()?;
        Ok(())
    }

    #[test]
    fn test_transactions() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        let count = StatementBuilder::select([count_all()]).from("users").clone();

        handle.begin()?;
        insert(&mut handle, 1, "a", 20)?;
        assert_eq!(handle.execute(&count)?, Some(vec![Value::Integer(1)]));
        handle.rollback()?;
        assert_eq!(handle.execute(&count)?, Some(vec![Value::Integer(0)]));

        handle.run_transaction(|h| {
            insert(h, 1, "a", 20)?;
            insert(h, 2, "b", 20)
        })?;
        assert_eq!(handle.execute(&count)?, Some(vec![Value::Integer(2)]));

        let err = handle
            .run_transaction(|h| {
                insert(h, 3, "c", 20)?;
                insert(h, 1, "dup", 20)
            })
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Constraint));
        assert!(!handle.in_transaction());
        assert_eq!(handle.execute(&count)?, Some(vec![Value::Integer(2)]));

        // a transaction left open is rolled back on close
        handle.begin()?;
        insert(&mut handle, 4, "d", 20)?;
        handle.close()?;
        handle.open()?;
        assert_eq!(handle.execute(&count)?, Some(vec![Value::Integer(2)]));
        Ok(())
    }

    #[test]
    fn test_write_conflict_is_busy() -> Result<()> {
        let db = Database::memory();
        let mut first = users(&db)?;
        let mut second = db.handle();
        second.open()?;

        first.begin()?;
        second.begin()?;
        insert(&mut first, 1, "a", 20)?;
        let err = insert(&mut second, 1, "b", 20).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Busy));
        assert_eq!(second.last_error().and_then(Error::code), Some(ErrorCode::Busy));
        first.commit()?;
        second.rollback()?;
        Ok(())
    }

    #[test]
    fn test_schema_helpers() -> Result<()> {
        let db = Database::memory();
        let mut handle = users(&db)?;
        assert!(handle.table_exists("users")?);
        assert!(!handle.table_exists("missing")?);

        let err = handle
            .create_table("users", vec![Column::new("x", ColumnType::Integer)])
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Error));
        handle.create_table_if_not_exists("users", vec![Column::new("x", ColumnType::Integer)])?;

        assert!(matches!(
            handle.create_table("empty", vec![]),
            Err(Error::InvalidStatement(_))
        ));
        handle.drop_table("users")?;
        assert!(!handle.table_exists("users")?);
        Ok(())
    }
}
