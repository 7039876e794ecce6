use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        engine::{Engine, KVEngine, KVTransaction, Transaction, handle::Step},
        executor::ResultSet,
        expr::{BindParameter, Expression, normalize_param_name},
        plan::Plan,
        statement::Statement,
        types::{Row, Value},
    },
    storage::engine::Engine as StorageEngine,
};

/// Highest parameter number a statement may use
pub const MAX_PARAMETERS: usize = 32766;

enum Cursor {
    /// Not executed yet, parameters may be bound
    Ready,
    Rows(std::vec::IntoIter<Row>),
    Done,
    /// Execution failed; stepping repeats the error until reset
    Failed(Error),
}

/// A compiled statement with its parameter bindings and cursor
///
/// Parameters are numbered from 1. `?N` occupies slot N; each distinct named
/// parameter takes the next free slot when first seen. Unbound parameters are
/// NULL. A SELECT run outside an explicit transaction keeps its read
/// transaction until the statement is released.
pub struct PreparedStatement<E: StorageEngine + 'static> {
    statement: Statement,
    parameters: Vec<Option<String>>,
    values: Vec<Value>,
    cursor: Cursor,
    columns: Vec<String>,
    changes: usize,
    txn: Option<KVTransaction<E>>,
}

impl<E: StorageEngine + 'static> PreparedStatement<E> {
    pub(crate) fn new(statement: Statement) -> Result<Self> {
        let mut parameters: Vec<Option<String>> = Vec::new();
        statement.clone().transform(&mut |expr| {
            if let Expression::Bind(param) = &expr {
                match param {
                    BindParameter::Index(i) if *i > MAX_PARAMETERS => {
                        return Err(Error::engine(
                            ErrorCode::Range,
                            format!("parameter index {} exceeds the limit of {}", i, MAX_PARAMETERS),
                        ));
                    }
                    BindParameter::Index(i) if parameters.len() < *i => parameters.resize(*i, None),
                    BindParameter::Index(_) => {}
                    BindParameter::Named(name) => {
                        if !parameters.iter().any(|p| p.as_ref() == Some(name)) {
                            parameters.push(Some(name.clone()));
                        }
                    }
                }
                if parameters.len() > MAX_PARAMETERS {
                    return Err(Error::engine(
                        ErrorCode::Range,
                        format!("statement uses more than {} parameters", MAX_PARAMETERS),
                    ));
                }
            }
            Ok(expr)
        })?;

        Ok(Self {
            statement,
            values: vec![Value::Null; parameters.len()],
            parameters,
            cursor: Cursor::Ready,
            columns: Vec::new(),
            changes: 0,
            txn: None,
        })
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Output column names, known once a query has been stepped
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows changed by the last run of a mutation
    pub fn changes(&self) -> usize {
        self.changes
    }

    pub(crate) fn is_mutation(&self) -> bool {
        matches!(
            self.statement,
            Statement::Insert { .. } | Statement::Update { .. } | Statement::Delete { .. }
        )
    }

    pub(crate) fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        if !matches!(self.cursor, Cursor::Ready) {
            return Err(Error::engine(
                ErrorCode::Misuse,
                "parameters can only be bound before the first step, reset the statement first",
            ));
        }
        match self.values.get_mut(index.wrapping_sub(1)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::engine(
                ErrorCode::Range,
                format!(
                    "parameter index {} out of range 1..={}",
                    index,
                    self.parameters.len()
                ),
            )),
        }
    }

    pub(crate) fn bind_named(&mut self, name: &str, value: Value) -> Result<()> {
        let name = normalize_param_name(name);
        match self.parameters.iter().position(|p| p.as_ref() == Some(&name)) {
            Some(i) => self.bind(i + 1, value),
            None => Err(Error::engine(ErrorCode::Range, format!("no such parameter: {}", name))),
        }
    }

    /// Rewinds to the unexecuted state, keeping the bindings
    pub(crate) fn reset(&mut self) -> Result<()> {
        let released = self.release();
        self.cursor = Cursor::Ready;
        self.columns.clear();
        self.changes = 0;
        released
    }

    pub(crate) fn clear_bindings(&mut self) {
        self.values.iter_mut().for_each(|v| *v = Value::Null);
    }

    /// The statement with every parameter replaced by its bound value
    fn bound_statement(&self) -> Result<Statement> {
        self.statement.clone().transform(&mut |expr| {
            Ok(match expr {
                Expression::Bind(BindParameter::Index(i)) => {
                    Expression::Literal(self.values.get(i.wrapping_sub(1)).cloned().unwrap_or(Value::Null))
                }
                Expression::Bind(BindParameter::Named(name)) => Expression::Literal(
                    self.parameters
                        .iter()
                        .position(|p| p.as_ref() == Some(&name))
                        .map(|i| self.values[i].clone())
                        .unwrap_or(Value::Null),
                ),
                expr => expr,
            })
        })
    }

    /// Runs the statement, in `txn` when given, otherwise in its own transaction
    fn run(&mut self, engine: &KVEngine<E>, txn: Option<&mut KVTransaction<E>>) -> Result<ResultSet> {
        let plan = Plan::build(self.bound_statement()?)?;
        if let Some(txn) = txn {
            return plan.execute(txn);
        }

        let mut txn = engine.begin()?;
        match plan.execute(&mut txn) {
            Ok(result) if self.statement.is_select() => {
                self.txn = Some(txn);
                Ok(result)
            }
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(err) => {
                txn.rollback()?;
                Err(err)
            }
        }
    }

    /// Advances the cursor; the first step executes the statement
    ///
    /// A failed execution keeps returning its error until `reset`.
    pub(crate) fn step(&mut self, engine: &KVEngine<E>, txn: Option<&mut KVTransaction<E>>) -> Result<Step> {
        if let Cursor::Ready = self.cursor {
            match self.run(engine, txn) {
                Ok(ResultSet::Scan { columns, rows }) => {
                    self.columns = columns;
                    self.cursor = Cursor::Rows(rows.into_iter());
                }
                Ok(result) => {
                    self.changes = result.changes();
                    self.cursor = Cursor::Done;
                }
                Err(err) => self.cursor = Cursor::Failed(err),
            }
        }

        Ok(match &mut self.cursor {
            Cursor::Rows(rows) => match rows.next() {
                Some(row) => Step::Row(row),
                None => {
                    self.cursor = Cursor::Done;
                    Step::Done
                }
            },
            Cursor::Failed(err) => return Err(err.clone()),
            Cursor::Ready | Cursor::Done => Step::Done,
        })
    }

    /// Ends the read transaction held for this statement, if any
    pub(crate) fn release(&mut self) -> Result<()> {
        match self.txn.take() {
            Some(txn) => {
                tracing::trace!(version = txn.version(), "releasing statement transaction");
                txn.commit()
            }
            None => Ok(()),
        }
    }
}

impl<E: StorageEngine + 'static> Drop for PreparedStatement<E> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(error = %err, "failed to release prepared statement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_PARAMETERS, PreparedStatement};
    use crate::{
        error::{ErrorCode, Result},
        sql::{
            expr::{bind, bind_named, column},
            statement::{Compile, StatementBuilder},
            types::Value,
        },
        storage::memory::MemoryEngine,
    };

    #[test]
    fn test_parameter_slots() -> Result<()> {
        let stmt = StatementBuilder::select(["*"])
            .from("t")
            .where_(column("a").eq(bind(2)).and(column("b").eq(bind_named("b"))))
            .limit(bind_named(":b"))
            .statement()?;
        let mut prepared: PreparedStatement<MemoryEngine> = PreparedStatement::new(stmt)?;
        assert_eq!(prepared.parameter_count(), 3);

        prepared.bind(1, Value::Integer(1))?;
        prepared.bind_named("b", Value::Integer(5))?;
        assert_eq!(
            prepared.bound_statement()?.to_string(),
            "SELECT * FROM t WHERE (a = NULL) AND (b = 5) LIMIT 5"
        );

        assert_eq!(prepared.bind(0, Value::Null).unwrap_err().code(), Some(ErrorCode::Range));
        assert_eq!(prepared.bind(4, Value::Null).unwrap_err().code(), Some(ErrorCode::Range));
        assert_eq!(
            prepared.bind_named("missing", Value::Null).unwrap_err().code(),
            Some(ErrorCode::Range)
        );

        prepared.clear_bindings();
        assert!(prepared.bound_statement()?.to_string().contains("b = NULL"));
        Ok(())
    }

    #[test]
    fn test_parameter_limit() -> Result<()> {
        let select = |index: usize| {
            StatementBuilder::select(["*"])
                .from("t")
                .where_(column("a").eq(bind(index)))
                .statement()
        };
        let prepared: PreparedStatement<MemoryEngine> = PreparedStatement::new(select(MAX_PARAMETERS)?)?;
        assert_eq!(prepared.parameter_count(), MAX_PARAMETERS);

        for index in [MAX_PARAMETERS + 1, 100_000_000, usize::MAX] {
            let err = PreparedStatement::<MemoryEngine>::new(select(index)?).err();
            assert_eq!(err.and_then(|e| e.code()), Some(ErrorCode::Range));
        }
        Ok(())
    }
}
