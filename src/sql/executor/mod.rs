use std::cmp::Ordering;

use crate::{
    error::Result,
    sql::{
        engine::Transaction,
        executor::{
            agg::Aggregate,
            mutation::{Delete, Insert, Update},
            query::{Distinct, Filter, Limit, Offset, Order, Projection, Scan},
            schema::{CreateTable, DropTable},
        },
        expr::{OrderDirection, OrderingTerm, Scope, evaluate},
        plan::Node,
        types::{Row, Value},
    },
};

mod agg;
mod mutation;
mod query;
mod schema;

/// SQL executor trait
pub trait Executor<T: Transaction> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet>;
}

/// Builds an executor from a plan node
///
/// The `'static` bound is required for trait object usage in recursive executor building.
impl<T: Transaction + 'static> dyn Executor<T> {
    pub fn build(node: Node) -> Box<dyn Executor<T>> {
        match node {
            Node::CreateTable {
                schema,
                if_not_exists,
            } => CreateTable::new(schema, if_not_exists),
            Node::DropTable {
                table_name,
                if_exists,
            } => DropTable::new(table_name, if_exists),
            Node::Insert {
                table_name,
                columns,
                values,
                replace,
            } => Insert::new(table_name, columns, values, replace),
            Node::Scan { table_name, filter } => Scan::new(table_name, filter),
            Node::Aggregate {
                source,
                group_by,
                aggregates,
            } => Aggregate::new(Self::build(*source), group_by, aggregates),
            Node::Filter { source, predicate } => Filter::new(Self::build(*source), predicate),
            Node::Projection {
                source,
                exprs,
                hidden,
            } => Projection::new(Self::build(*source), exprs, hidden),
            Node::Distinct { source } => Distinct::new(Self::build(*source)),
            Node::Order { source, order_by } => Order::new(Self::build(*source), order_by),
            Node::Offset { source, offset } => Offset::new(Self::build(*source), offset),
            Node::Limit { source, limit } => Limit::new(Self::build(*source), limit),
            Node::Update {
                table_name,
                selection,
                assignments,
            } => Update::new(table_name, selection, assignments),
            Node::Delete {
                table_name,
                selection,
            } => Delete::new(table_name, selection),
        }
    }
}

/// Execution result set
#[derive(Debug, PartialEq)]
pub enum ResultSet {
    CreateTable { table_name: String },
    DropTable { table_name: String },
    Insert { count: usize },
    Scan { columns: Vec<String>, rows: Vec<Row> },
    Update { count: usize },
    Delete { count: usize },
}

impl ResultSet {
    /// Rows changed by a mutation, 0 for queries and DDL
    pub fn changes(&self) -> usize {
        match self {
            ResultSet::Insert { count } | ResultSet::Update { count } | ResultSet::Delete { count } => {
                *count
            }
            _ => 0,
        }
    }
}

/// Sorts items by ORDER BY terms, stable for equal keys
///
/// Sort keys are evaluated once per item before sorting, so evaluation
/// errors surface before any reordering happens.
pub(crate) fn sort_by_terms<R, T: Transaction + 'static>(
    items: Vec<R>,
    order_by: &[OrderingTerm],
    columns: &[String],
    row_of: impl Fn(&R) -> &Row,
    txn: &mut T,
) -> Result<Vec<R>> {
    let mut keyed = items
        .into_iter()
        .map(|item| {
            let scope = Scope::new(columns, row_of(&item));
            let keys = order_by
                .iter()
                .map(|term| evaluate(&term.expr, &scope, txn))
                .collect::<Result<Vec<Value>>>()?;
            Ok((keys, item))
        })
        .collect::<Result<Vec<_>>>()?;

    // Multi-column sort: compare keys term by term, the first unequal term decides
    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), term) in a.iter().zip(b.iter()).zip(order_by) {
            match x.compare(y) {
                Ordering::Equal => {}
                o if term.direction == OrderDirection::Descending => return o.reverse(),
                o => return o,
            }
        }
        Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

/// Whether a predicate holds for a row; NULL counts as false
pub(crate) fn matches<T: Transaction + 'static>(
    predicate: &crate::sql::expr::Expression,
    scope: &Scope,
    txn: &mut T,
) -> Result<bool> {
    Ok(evaluate(predicate, scope, txn)?.is_true())
}
