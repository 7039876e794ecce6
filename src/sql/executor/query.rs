use std::collections::HashSet;

use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        engine::Transaction,
        executor::{ResultSet, matches, sort_by_terms},
        expr::{Expression, OrderingTerm, ResultColumn, Scope, evaluate},
    },
};

use super::Executor;

fn unexpected() -> Error {
    Error::engine(ErrorCode::Internal, "unexpected result set")
}

/// Table scan executor (SELECT)
pub struct Scan {
    table_name: String,
    filter: Option<Expression>,
}

impl Scan {
    pub fn new(table_name: String, filter: Option<Expression>) -> Box<Self> {
        Box::new(Self { table_name, filter })
    }
}

impl<T: Transaction + 'static> Executor<T> for Scan {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        let table = txn.must_get_table(&self.table_name)?;
        let columns = table.column_names();
        let mut rows = Vec::new();
        for (_, row) in txn.scan_table(&table)? {
            let keep = match &self.filter {
                Some(filter) => matches(filter, &Scope::new(&columns, &row), txn)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }
        Ok(ResultSet::Scan { columns, rows })
    }
}

/// HAVING executor - keeps rows matching a predicate
pub struct Filter<T: Transaction> {
    source: Box<dyn Executor<T>>,
    predicate: Expression,
}

impl<T: Transaction> Filter<T> {
    pub fn new(source: Box<dyn Executor<T>>, predicate: Expression) -> Box<Self> {
        Box::new(Self { source, predicate })
    }
}

impl<T: Transaction + 'static> Executor<T> for Filter<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        match self.source.execute(txn)? {
            ResultSet::Scan { columns, rows } => {
                let mut kept = Vec::new();
                for row in rows {
                    if matches(&self.predicate, &Scope::new(&columns, &row), txn)? {
                        kept.push(row);
                    }
                }
                Ok(ResultSet::Scan { columns, rows: kept })
            }
            _ => Err(unexpected()),
        }
    }
}

/// Projection executor - evaluates the result columns
pub struct Projection<T: Transaction> {
    source: Box<dyn Executor<T>>,
    exprs: Vec<ResultColumn>,
    hidden: usize,
}

impl<T: Transaction> Projection<T> {
    pub fn new(source: Box<dyn Executor<T>>, exprs: Vec<ResultColumn>, hidden: usize) -> Box<Self> {
        Box::new(Self {
            source,
            exprs,
            hidden,
        })
    }
}

impl<T: Transaction + 'static> Executor<T> for Projection<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        let ResultSet::Scan { columns, rows } = self.source.execute(txn)? else {
            return Err(unexpected());
        };
        // `*` expands to the source columns, without the aggregate columns at the end
        let visible = columns.len().saturating_sub(self.hidden);

        let mut new_columns = Vec::new();
        for expr in &self.exprs {
            match expr {
                ResultColumn::All => new_columns.extend(columns[..visible].iter().cloned()),
                expr => new_columns.push(expr.name()),
            }
        }

        let mut new_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let scope = Scope::new(&columns, &row);
            let mut new_row = Vec::with_capacity(new_columns.len());
            for expr in &self.exprs {
                match expr {
                    ResultColumn::All => new_row.extend(row[..visible].iter().cloned()),
                    ResultColumn::Expr(expr, _) => new_row.push(evaluate(expr, &scope, txn)?),
                }
            }
            new_rows.push(new_row);
        }
        Ok(ResultSet::Scan {
            columns: new_columns,
            rows: new_rows,
        })
    }
}

/// DISTINCT executor - drops repeated rows, keeping the first occurrence
pub struct Distinct<T: Transaction> {
    source: Box<dyn Executor<T>>,
}

impl<T: Transaction> Distinct<T> {
    pub fn new(source: Box<dyn Executor<T>>) -> Box<Self> {
        Box::new(Self { source })
    }
}

impl<T: Transaction> Executor<T> for Distinct<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        match self.source.execute(txn)? {
            ResultSet::Scan { columns, rows } => {
                let mut seen = HashSet::new();
                let rows = rows
                    .into_iter()
                    .filter(|row| {
                        let mut key = Vec::new();
                        row.iter().for_each(|v| v.encode_key(&mut key));
                        seen.insert(key)
                    })
                    .collect();
                Ok(ResultSet::Scan { columns, rows })
            }
            _ => Err(unexpected()),
        }
    }
}

/// ORDER BY executor - sorts rows by the ordering terms
pub struct Order<T: Transaction> {
    source: Box<dyn Executor<T>>,
    order_by: Vec<OrderingTerm>,
}

impl<T: Transaction> Order<T> {
    pub fn new(source: Box<dyn Executor<T>>, order_by: Vec<OrderingTerm>) -> Box<Self> {
        Box::new(Self { source, order_by })
    }
}

impl<T: Transaction + 'static> Executor<T> for Order<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        match self.source.execute(txn)? {
            ResultSet::Scan { columns, rows } => {
                let rows = sort_by_terms(rows, &self.order_by, &columns, |row| row, txn)?;
                Ok(ResultSet::Scan { columns, rows })
            }
            _ => Err(unexpected()),
        }
    }
}

/// LIMIT executor - restricts the number of rows returned
pub struct Limit<T: Transaction> {
    source: Box<dyn Executor<T>>,
    limit: usize,
}

impl<T: Transaction> Limit<T> {
    pub fn new(source: Box<dyn Executor<T>>, limit: usize) -> Box<Self> {
        Box::new(Self { source, limit })
    }
}

impl<T: Transaction> Executor<T> for Limit<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        match self.source.execute(txn)? {
            ResultSet::Scan { columns, rows } => Ok(ResultSet::Scan {
                columns,
                rows: rows.into_iter().take(self.limit).collect(),
            }),
            _ => Err(unexpected()),
        }
    }
}

/// OFFSET executor - skips the first N rows
pub struct Offset<T: Transaction> {
    source: Box<dyn Executor<T>>,
    offset: usize,
}

impl<T: Transaction> Offset<T> {
    pub fn new(source: Box<dyn Executor<T>>, offset: usize) -> Box<Self> {
        Box::new(Self { source, offset })
    }
}

impl<T: Transaction> Executor<T> for Offset<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        match self.source.execute(txn)? {
            ResultSet::Scan { columns, rows } => Ok(ResultSet::Scan {
                columns,
                rows: rows.into_iter().skip(self.offset).collect(),
            }),
            _ => Err(unexpected()),
        }
    }
}
