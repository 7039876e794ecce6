use std::collections::HashMap;

use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        engine::Transaction,
        executor::{ResultSet, matches, sort_by_terms},
        expr::{Expression, Scope, evaluate},
        plan::Selection,
        schema::Table,
        types::{Row, Value},
    },
};

use super::Executor;

/// INSERT executor
pub struct Insert {
    table_name: String,
    columns: Vec<String>,
    values: Vec<Vec<Expression>>,
    replace: bool,
}

impl Insert {
    pub fn new(table_name: String, columns: Vec<String>, values: Vec<Vec<Expression>>, replace: bool) -> Box<Self> {
        Box::new(Self {
            table_name,
            columns,
            values,
            replace,
        })
    }
}

/// Completes a row given in table order: missing trailing columns take their default
///
/// insert into tbl values(1, 2, 3);
/// a       b       c       d
/// 1       2       3       default
fn pad_row(table: &Table, mut row: Row) -> Result<Row> {
    if row.len() > table.columns.len() {
        return Err(Error::engine(
            ErrorCode::Error,
            format!(
                "table {} has {} columns but {} values were supplied",
                table.name,
                table.columns.len(),
                row.len()
            ),
        ));
    }
    for column in table.columns.iter().skip(row.len()) {
        row.push(column.fill_value());
    }
    Ok(row)
}

/// Places values given for named columns, filling the others with defaults
///
/// insert into tbl(d, c) values(1, 2);
/// a         b         c       d
/// default   default   2       1
fn make_row(table: &Table, columns: &[String], values: Row) -> Result<Row> {
    let mut inputs = HashMap::new();
    for (name, value) in columns.iter().zip(values) {
        table.get_col_index(name)?;
        if inputs.insert(name.as_str(), value).is_some() {
            return Err(Error::engine(
                ErrorCode::Error,
                format!("column {} specified more than once", name),
            ));
        }
    }

    Ok(table
        .columns
        .iter()
        .map(|col| inputs.remove(col.name.as_str()).unwrap_or_else(|| col.fill_value()))
        .collect())
}

impl<T: Transaction + 'static> Executor<T> for Insert {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;
        let mut count = 0;
        for exprs in self.values {
            let row = exprs
                .iter()
                .map(|e| evaluate(e, &Scope::empty(), txn))
                .collect::<Result<Row>>()?;

            let row = if self.columns.is_empty() {
                pad_row(&table, row)?
            } else {
                make_row(&table, &self.columns, row)?
            };
            txn.create_row(&table, row, self.replace)?;
            count += 1;
        }
        tracing::trace!(table = %self.table_name, count, "inserted rows");
        Ok(ResultSet::Insert { count })
    }
}

/// Finds the rows a selection targets, with their ids
fn select_rows<T: Transaction + 'static>(
    txn: &mut T,
    table: &Table,
    selection: &Selection,
) -> Result<Vec<(Value, Row)>> {
    let columns = table.column_names();
    let mut rows = Vec::new();
    for (id, row) in txn.scan_table(table)? {
        let keep = match &selection.filter {
            Some(filter) => matches(filter, &Scope::new(&columns, &row), txn)?,
            None => true,
        };
        if keep {
            rows.push((id, row));
        }
    }
    if !selection.order_by.is_empty() {
        rows = sort_by_terms(rows, &selection.order_by, &columns, |(_, row)| row, txn)?;
    }
    Ok(rows
        .into_iter()
        .skip(selection.offset)
        .take(selection.limit.unwrap_or(usize::MAX))
        .collect())
}

/// UPDATE executor
pub struct Update {
    table_name: String,
    selection: Selection,
    assignments: Vec<(String, Expression)>,
}

impl Update {
    pub fn new(table_name: String, selection: Selection, assignments: Vec<(String, Expression)>) -> Box<Self> {
        Box::new(Self {
            table_name,
            selection,
            assignments,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Update {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;
        let columns = table.column_names();
        let targets = self
            .assignments
            .iter()
            .map(|(name, expr)| Ok((table.get_col_index(name)?, expr)))
            .collect::<Result<Vec<_>>>()?;

        let mut count = 0;
        for (id, row) in select_rows(txn, &table, &self.selection)? {
            // every assignment sees the old row
            let mut new_row = row.clone();
            for (index, expr) in &targets {
                new_row[*index] = evaluate(expr, &Scope::new(&columns, &row), txn)?;
            }
            txn.update_row(&table, &id, new_row)?;
            count += 1;
        }
        Ok(ResultSet::Update { count })
    }
}

/// DELETE executor
pub struct Delete {
    table_name: String,
    selection: Selection,
}

impl Delete {
    pub fn new(table_name: String, selection: Selection) -> Box<Self> {
        Box::new(Self {
            table_name,
            selection,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Delete {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;
        let mut count = 0;
        for (id, _) in select_rows(txn, &table, &self.selection)? {
            txn.delete_row(&table, &id)?;
            count += 1;
        }
        Ok(ResultSet::Delete { count })
    }
}
