//! Compiled statements
//!
//! A `Statement` is the immutable output of the statement builder: a
//! self-contained description of one SQL statement that renders to canonical
//! SQL and is handed to the planner.

use std::fmt::{Display, Write};

use crate::{
    error::Result,
    sql::{
        expr::{Expression, OrderingTerm, ResultColumn, quote_ident},
        schema::Table,
    },
};

mod builder;

pub use builder::{StatementBuilder, StatementKind};

/// Anything that compiles into a statement: builders, chains, statements
pub trait Compile {
    /// Compiles the accumulated clauses. Pure and repeatable, never executes.
    fn statement(&self) -> Result<Statement>;
}

impl Compile for Statement {
    fn statement(&self) -> Result<Statement> {
        Ok(self.clone())
    }
}

impl Compile for SelectStatement {
    fn statement(&self) -> Result<Statement> {
        Ok(Statement::Select(self.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub columns: Vec<ResultColumn>,
    pub from: String,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Delete {
        table: String,
        where_clause: Option<Expression>,
        order_by: Vec<OrderingTerm>,
        limit: Option<Expression>,
        offset: Option<Expression>,
    },
    Insert {
        table: String,
        /// Target columns, empty means every column in table order
        columns: Vec<String>,
        values: Vec<Vec<Expression>>,
        or_replace: bool,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expression)>,
        where_clause: Option<Expression>,
        order_by: Vec<OrderingTerm>,
        limit: Option<Expression>,
        offset: Option<Expression>,
    },
    CreateTable {
        schema: Table,
        if_not_exists: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
}

impl Statement {
    pub fn is_select(&self) -> bool {
        matches!(self, Statement::Select(_))
    }

    /// Rewrites every expression of the statement, subqueries included
    pub(crate) fn transform(self, f: &mut impl FnMut(Expression) -> Result<Expression>) -> Result<Statement> {
        Ok(match self {
            Statement::Select(select) => Statement::Select(select.transform(f)?),
            Statement::Delete {
                table,
                where_clause,
                order_by,
                limit,
                offset,
            } => Statement::Delete {
                table,
                where_clause: transform_opt(where_clause, f)?,
                order_by: transform_terms(order_by, f)?,
                limit: transform_opt(limit, f)?,
                offset: transform_opt(offset, f)?,
            },
            Statement::Insert {
                table,
                columns,
                values,
                or_replace,
            } => Statement::Insert {
                table,
                columns,
                values: values
                    .into_iter()
                    .map(|row| row.into_iter().map(|e| e.transform(f)).collect())
                    .collect::<Result<_>>()?,
                or_replace,
            },
            Statement::Update {
                table,
                assignments,
                where_clause,
                order_by,
                limit,
                offset,
            } => Statement::Update {
                table,
                assignments: assignments
                    .into_iter()
                    .map(|(c, e)| Ok((c, e.transform(f)?)))
                    .collect::<Result<_>>()?,
                where_clause: transform_opt(where_clause, f)?,
                order_by: transform_terms(order_by, f)?,
                limit: transform_opt(limit, f)?,
                offset: transform_opt(offset, f)?,
            },
            stmt @ (Statement::CreateTable { .. } | Statement::DropTable { .. }) => stmt,
        })
    }
}

impl SelectStatement {
    pub(crate) fn transform(self, f: &mut impl FnMut(Expression) -> Result<Expression>) -> Result<Self> {
        Ok(SelectStatement {
            distinct: self.distinct,
            columns: self
                .columns
                .into_iter()
                .map(|c| match c {
                    ResultColumn::All => Ok(ResultColumn::All),
                    ResultColumn::Expr(e, alias) => Ok(ResultColumn::Expr(e.transform(f)?, alias)),
                })
                .collect::<Result<_>>()?,
            from: self.from,
            where_clause: transform_opt(self.where_clause, f)?,
            group_by: self
                .group_by
                .into_iter()
                .map(|e| e.transform(f))
                .collect::<Result<_>>()?,
            having: transform_opt(self.having, f)?,
            order_by: transform_terms(self.order_by, f)?,
            limit: transform_opt(self.limit, f)?,
            offset: transform_opt(self.offset, f)?,
        })
    }
}

fn transform_opt(
    expr: Option<Expression>,
    f: &mut impl FnMut(Expression) -> Result<Expression>,
) -> Result<Option<Expression>> {
    expr.map(|e| e.transform(f)).transpose()
}

fn transform_terms(
    terms: Vec<OrderingTerm>,
    f: &mut impl FnMut(Expression) -> Result<Expression>,
) -> Result<Vec<OrderingTerm>> {
    terms
        .into_iter()
        .map(|t| {
            Ok(OrderingTerm {
                expr: t.expr.transform(f)?,
                direction: t.direction,
            })
        })
        .collect()
}

fn join<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the trailing WHERE / ORDER BY / LIMIT / OFFSET clauses
fn write_tail(
    f: &mut std::fmt::Formatter<'_>,
    order_by: &[OrderingTerm],
    limit: &Option<Expression>,
    offset: &Option<Expression>,
) -> std::fmt::Result {
    if !order_by.is_empty() {
        write!(f, " ORDER BY {}", join(order_by))?;
    }
    match (limit, offset) {
        (Some(limit), Some(offset)) => write!(f, " LIMIT {} OFFSET {}", limit, offset),
        (Some(limit), None) => write!(f, " LIMIT {}", limit),
        (None, Some(offset)) => write!(f, " LIMIT -1 OFFSET {}", offset),
        (None, None) => Ok(()),
    }
}

impl Display for SelectStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        write!(f, "{} FROM {}", join(&self.columns), quote_ident(&self.from))?;
        if let Some(expr) = &self.where_clause {
            write!(f, " WHERE {}", expr)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", join(&self.group_by))?;
        }
        if let Some(expr) = &self.having {
            write!(f, " HAVING {}", expr)?;
        }
        write_tail(f, &self.order_by, &self.limit, &self.offset)
    }
}

/// Canonical SQL text of the statement
impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Select(select) => write!(f, "{}", select),
            Statement::Delete {
                table,
                where_clause,
                order_by,
                limit,
                offset,
            } => {
                write!(f, "DELETE FROM {}", quote_ident(table))?;
                if let Some(expr) = where_clause {
                    write!(f, " WHERE {}", expr)?;
                }
                write_tail(f, order_by, limit, offset)
            }
            Statement::Insert {
                table,
                columns,
                values,
                or_replace,
            } => {
                f.write_str(if *or_replace { "INSERT OR REPLACE INTO " } else { "INSERT INTO " })?;
                f.write_str(&quote_ident(table))?;
                if !columns.is_empty() {
                    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                    write!(f, " ({})", names.join(", "))?;
                }
                f.write_str(" VALUES ")?;
                for (i, row) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "({})", join(row))?;
                }
                Ok(())
            }
            Statement::Update {
                table,
                assignments,
                where_clause,
                order_by,
                limit,
                offset,
            } => {
                write!(f, "UPDATE {} SET ", quote_ident(table))?;
                for (i, (column, expr)) in assignments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", quote_ident(column), expr)?;
                }
                if let Some(expr) = where_clause {
                    write!(f, " WHERE {}", expr)?;
                }
                write_tail(f, order_by, limit, offset)
            }
            Statement::CreateTable {
                schema,
                if_not_exists,
            } => {
                f.write_str("CREATE TABLE ")?;
                if *if_not_exists {
                    f.write_str("IF NOT EXISTS ")?;
                }
                write!(f, "{} (", quote_ident(&schema.name))?;
                for (i, column) in schema.columns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let mut def = format!("{} {}", quote_ident(&column.name), column.column_type);
                    if column.primary_key {
                        def.push_str(" PRIMARY KEY");
                    } else if !column.nullable {
                        def.push_str(" NOT NULL");
                    }
                    if let Some(default) = &column.default {
                        write!(def, " DEFAULT {}", default)?;
                    }
                    f.write_str(&def)?;
                }
                f.write_str(")")
            }
            Statement::DropTable { name, if_exists } => {
                f.write_str("DROP TABLE ")?;
                if *if_exists {
                    f.write_str("IF EXISTS ")?;
                }
                f.write_str(&quote_ident(name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Statement;
    use crate::{
        error::Result,
        sql::{
            expr::{bind, column, literal},
            schema::{Column, Table},
            types::ColumnType,
        },
    };

    #[test]
    fn test_render_ddl() -> Result<()> {
        let schema = Table::new(
            "users",
            vec![
                Column::new("id", ColumnType::Integer).primary_key(),
                Column::new("name", ColumnType::Text).not_null(),
                Column::new("score", ColumnType::Float).default(0.5),
            ],
        )?;
        let create = Statement::CreateTable {
            schema,
            if_not_exists: true,
        };
        assert_eq!(
            create.to_string(),
            "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL DEFAULT 0.5)"
        );

        let drop = Statement::DropTable {
            name: "users".into(),
            if_exists: false,
        };
        assert_eq!(drop.to_string(), "DROP TABLE users");
        Ok(())
    }

    #[test]
    fn test_transform_reaches_every_clause() -> Result<()> {
        let stmt = Statement::Update {
            table: "t".into(),
            assignments: vec![("a".into(), bind(1))],
            where_clause: Some(column("b").eq(bind(2))),
            order_by: vec![],
            limit: Some(bind(3)),
            offset: None,
        };
        let mut seen = 0;
        let stmt = stmt.transform(&mut |e| {
            Ok(match e {
                crate::sql::expr::Expression::Bind(_) => {
                    seen += 1;
                    literal(seen)
                }
                e => e,
            })
        })?;
        assert_eq!(seen, 3);
        assert_eq!(stmt.to_string(), "UPDATE t SET a = 1 WHERE b = 2 LIMIT 3");
        Ok(())
    }
}
