use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        executor::{Executor, ResultSet},
        expr::{Expression, OrderingTerm, ResultColumn},
        schema::Table,
        statement::Statement,
    },
};

mod planner;

pub use planner::Planner;

/// Execution plan node
#[derive(Debug, PartialEq)]
pub enum Node {
    CreateTable {
        schema: Table,
        if_not_exists: bool,
    },
    DropTable {
        table_name: String,
        if_exists: bool,
    },
    Insert {
        table_name: String,
        columns: Vec<String>,
        values: Vec<Vec<Expression>>,
        replace: bool,
    },
    /// Full table scan with an optional row filter
    Scan {
        table_name: String,
        filter: Option<Expression>,
    },
    /// Groups rows and computes aggregates; output columns are the source
    /// columns followed by one column per aggregate, named by its SQL text
    Aggregate {
        source: Box<Node>,
        group_by: Vec<Expression>,
        aggregates: Vec<Expression>,
    },
    /// Keeps rows for which the predicate is true (HAVING)
    Filter {
        source: Box<Node>,
        predicate: Expression,
    },
    /// Evaluates the result columns; `hidden` trailing source columns are left out of `*`
    Projection {
        source: Box<Node>,
        exprs: Vec<ResultColumn>,
        hidden: usize,
    },
    Distinct {
        source: Box<Node>,
    },
    Order {
        source: Box<Node>,
        order_by: Vec<OrderingTerm>,
    },
    Offset {
        source: Box<Node>,
        offset: usize,
    },
    Limit {
        source: Box<Node>,
        limit: usize,
    },
    Update {
        table_name: String,
        selection: Selection,
        assignments: Vec<(String, Expression)>,
    },
    Delete {
        table_name: String,
        selection: Selection,
    },
}

/// Rows targeted by UPDATE and DELETE
#[derive(Debug, Default, PartialEq)]
pub struct Selection {
    pub filter: Option<Expression>,
    pub order_by: Vec<OrderingTerm>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Execution plan
#[derive(Debug, PartialEq)]
pub struct Plan(pub Node);

impl Plan {
    pub fn build(stmt: Statement) -> Result<Self> {
        Planner::new().build(stmt)
    }

    pub fn execute<T: Transaction + 'static>(self, txn: &mut T) -> Result<ResultSet> {
        <dyn Executor<T>>::build(self.0).execute(txn)
    }
}
