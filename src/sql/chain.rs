//! Chain calls
//!
//! A chain is a statement builder bound to a handle, so a statement can be
//! described and run in one expression:
//!
//! ```ignore
//! let names: Vec<String> = handle
//!     .select([column("name")])
//!     .from("users")
//!     .where_(column("age").gt(18))
//!     .order([column("name").asc()])
//!     .limit(10)
//!     .all_values()?;
//! ```
//!
//! Clause setters return the chain. A clause the statement kind does not
//! support is recorded as the handle's last error and surfaces again when the
//! chain runs.

use crate::{
    error::{Error, Result},
    sql::{
        engine::{Handle, Step},
        expr::{Expression, OrderingTerm, ResultColumn},
        statement::{Compile, Statement, StatementBuilder},
        types::{FromColumn, Row},
    },
    storage::engine::{Engine as StorageEngine, Open},
};

/// Setters shared by every chain that has a WHERE clause
macro_rules! filter_setters {
    () => {
        pub fn where_(&mut self, expr: impl Into<Expression>) -> &mut Self {
            self.builder.where_(expr);
            self.touch();
            self
        }

        pub fn order<T: Into<OrderingTerm>>(&mut self, terms: impl IntoIterator<Item = T>) -> &mut Self {
            self.builder.order(terms);
            self.touch();
            self
        }

        pub fn limit(&mut self, expr: impl Into<Expression>) -> &mut Self {
            self.builder.limit(expr);
            self.touch();
            self
        }

        pub fn offset(&mut self, expr: impl Into<Expression>) -> &mut Self {
            self.builder.offset(expr);
            self.touch();
            self
        }
    };
}

/// Applies a kind-specific builder setter, recording a failure on the handle
///
/// Once the chain holds an error later setters are skipped, so the first
/// failure is the one reported.
fn apply<E: StorageEngine + Open + 'static>(
    handle: &mut Handle<E>,
    builder: &mut StatementBuilder,
    error: &mut Option<Error>,
    setter: impl FnOnce(&mut StatementBuilder) -> Result<&mut StatementBuilder>,
) {
    if error.is_some() {
        return;
    }
    if let Err(err) = setter(builder) {
        let _ = handle.record::<()>(Err(err.clone()));
        *error = Some(err);
    }
}

impl<E: StorageEngine + Open + 'static> Handle<E> {
    pub fn select<C: Into<ResultColumn>>(&mut self, columns: impl IntoIterator<Item = C>) -> Select<'_, E> {
        Select {
            builder: StatementBuilder::select(columns),
            handle: self,
            error: None,
            prepared: false,
        }
    }

    pub fn delete(&mut self) -> Delete<'_, E> {
        Delete {
            builder: StatementBuilder::delete(),
            handle: self,
        }
    }

    pub fn insert_into(&mut self, table: &str) -> Insert<'_, E> {
        let mut builder = StatementBuilder::insert();
        builder.into_table(table);
        Insert {
            builder,
            handle: self,
            error: None,
        }
    }

    pub fn update(&mut self, table: &str) -> Update<'_, E> {
        let mut builder = StatementBuilder::update();
        builder.from(table);
        Update {
            builder,
            handle: self,
            error: None,
        }
    }
}

/// SELECT bound to a handle
///
/// The statement is prepared on the first `next_row` and stepped on each
/// following call. Changing a clause prepares it again. Dropping the chain
/// finalizes the statement.
pub struct Select<'h, E: StorageEngine + Open + 'static> {
    handle: &'h mut Handle<E>,
    builder: StatementBuilder,
    error: Option<Error>,
    prepared: bool,
}

impl<'h, E: StorageEngine + Open + 'static> Select<'h, E> {
    fn touch(&mut self) {
        self.prepared = false;
    }

    pub fn from(&mut self, table: &str) -> &mut Self {
        self.builder.from(table);
        self.touch();
        self
    }

    filter_setters!();

    pub fn group<T: Into<Expression>>(&mut self, exprs: impl IntoIterator<Item = T>) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.group(exprs));
        self.touch();
        self
    }

    pub fn having(&mut self, expr: impl Into<Expression>) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.having(expr));
        self.touch();
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.distinct());
        self.touch();
        self
    }

    pub fn builder(&self) -> &StatementBuilder {
        &self.builder
    }

    /// Steps the query, preparing it first if needed; `None` once exhausted
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.prepared {
            let statement = self.statement();
            let statement = self.handle.record(statement)?;
            self.handle.prepare(&statement)?;
            self.prepared = true;
        }
        Ok(match self.handle.step()? {
            Step::Row(row) => Some(row),
            Step::Done => None,
        })
    }

    /// Runs the query from the start and collects every row
    pub fn all_rows(&mut self) -> Result<Vec<Row>> {
        self.touch();
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// First column of the next row, converted to `T`
    pub fn next_value<T: FromColumn>(&mut self) -> Result<Option<T>> {
        match self.next_row()? {
            Some(row) => first_column(row).map(Some),
            None => Ok(None),
        }
    }

    /// First column of every row, converted to `T`
    pub fn all_values<T: FromColumn>(&mut self) -> Result<Vec<T>> {
        self.all_rows()?.into_iter().map(first_column).collect()
    }

    /// Runs the query once and returns its first row
    pub fn execute(&mut self) -> Result<Option<Row>> {
        self.touch();
        let row = self.next_row()?;
        self.handle.finalize()?;
        self.prepared = false;
        Ok(row)
    }
}

fn first_column<T: FromColumn>(row: Row) -> Result<T> {
    match row.into_iter().next() {
        Some(value) => T::from_value(value),
        None => Err(Error::TypeMismatch("row has no columns".into())),
    }
}

impl<E: StorageEngine + Open + 'static> Compile for Select<'_, E> {
    fn statement(&self) -> Result<Statement> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => self.builder.statement(),
        }
    }
}

impl<E: StorageEngine + Open + 'static> Drop for Select<'_, E> {
    fn drop(&mut self) {
        if self.prepared {
            if let Err(err) = self.handle.finalize() {
                tracing::warn!(error = %err, "failed to finalize select");
            }
        }
    }
}

/// Runs a compiled mutation and returns the number of changed rows
fn run_mutation<E: StorageEngine + Open + 'static>(handle: &mut Handle<E>, statement: Result<Statement>) -> Result<usize> {
    let statement = handle.record(statement)?;
    handle.execute(&statement)?;
    Ok(handle.changes())
}

/// DELETE bound to a handle
pub struct Delete<'h, E: StorageEngine + Open + 'static> {
    handle: &'h mut Handle<E>,
    builder: StatementBuilder,
}

impl<'h, E: StorageEngine + Open + 'static> Delete<'h, E> {
    fn touch(&mut self) {}

    pub fn from(&mut self, table: &str) -> &mut Self {
        self.builder.from(table);
        self
    }

    filter_setters!();

    pub fn execute(&mut self) -> Result<usize> {
        run_mutation(self.handle, self.builder.statement())
    }
}

impl<E: StorageEngine + Open + 'static> Compile for Delete<'_, E> {
    fn statement(&self) -> Result<Statement> {
        self.builder.statement()
    }
}

/// INSERT bound to a handle
pub struct Insert<'h, E: StorageEngine + Open + 'static> {
    handle: &'h mut Handle<E>,
    builder: StatementBuilder,
    error: Option<Error>,
}

impl<'h, E: StorageEngine + Open + 'static> Insert<'h, E> {
    pub fn columns<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.columns(names));
        self
    }

    /// Appends one row of values
    pub fn values<T: Into<Expression>>(&mut self, row: impl IntoIterator<Item = T>) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.values(row));
        self
    }

    pub fn or_replace(&mut self) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.or_replace());
        self
    }

    pub fn execute(&mut self) -> Result<usize> {
        let statement = self.statement();
        run_mutation(self.handle, statement)
    }
}

impl<E: StorageEngine + Open + 'static> Compile for Insert<'_, E> {
    fn statement(&self) -> Result<Statement> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => self.builder.statement(),
        }
    }
}

/// UPDATE bound to a handle
pub struct Update<'h, E: StorageEngine + Open + 'static> {
    handle: &'h mut Handle<E>,
    builder: StatementBuilder,
    error: Option<Error>,
}

impl<'h, E: StorageEngine + Open + 'static> Update<'h, E> {
    fn touch(&mut self) {}

    /// `SET column = expr`
    pub fn set(&mut self, column: &str, expr: impl Into<Expression>) -> &mut Self {
        apply(self.handle, &mut self.builder, &mut self.error, |b| b.set(column, expr));
        self
    }

    filter_setters!();

    pub fn execute(&mut self) -> Result<usize> {
        let statement = self.statement();
        run_mutation(self.handle, statement)
    }
}

impl<E: StorageEngine + Open + 'static> Compile for Update<'_, E> {
    fn statement(&self) -> Result<Statement> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => self.builder.statement(),
        }
    }
}
