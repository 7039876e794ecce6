use crate::{
    error::{Error, Result},
    sql::{
        expr::{self, Expression, NoSubquery, OrderingTerm, ResultColumn, Scope, is_aggregate},
        plan::{Node, Plan, Selection},
        statement::{SelectStatement, Statement},
        types::Value,
    },
};

/// Query planner - converts compiled statements into execution plan nodes
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self {}
    }

    /// Builds an execution plan from a statement
    pub fn build(&mut self, stmt: Statement) -> Result<Plan> {
        Ok(Plan(self.build_statement(stmt)?))
    }

    pub fn build_statement(&self, stmt: Statement) -> Result<Node> {
        Ok(match stmt {
            Statement::CreateTable {
                schema,
                if_not_exists,
            } => Node::CreateTable {
                schema,
                if_not_exists,
            },
            Statement::DropTable { name, if_exists } => Node::DropTable {
                table_name: name,
                if_exists,
            },
            Statement::Insert {
                table,
                columns,
                values,
                or_replace,
            } => Node::Insert {
                table_name: table,
                columns,
                values,
                replace: or_replace,
            },
            Statement::Select(select) => self.build_select(select)?,
            Statement::Update {
                table,
                assignments,
                where_clause,
                order_by,
                limit,
                offset,
            } => Node::Update {
                table_name: table,
                selection: self.build_selection(where_clause, order_by, limit, offset)?,
                assignments,
            },
            Statement::Delete {
                table,
                where_clause,
                order_by,
                limit,
                offset,
            } => Node::Delete {
                table_name: table,
                selection: self.build_selection(where_clause, order_by, limit, offset)?,
            },
        })
    }

    fn build_selection(
        &self,
        filter: Option<Expression>,
        order_by: Vec<OrderingTerm>,
        limit: Option<Expression>,
        offset: Option<Expression>,
    ) -> Result<Selection> {
        Ok(Selection {
            filter,
            order_by,
            offset: offset.map(|e| self.eval_bound(e, "OFFSET")).transpose()?.flatten().unwrap_or(0),
            limit: limit.map(|e| self.eval_bound(e, "LIMIT")).transpose()?.flatten(),
        })
    }

    /// SELECT pipeline:
    /// Scan -> [Aggregate] -> [Filter] -> [Order] -> Projection -> [Distinct]
    /// -> Offset -> Limit
    ///
    /// Ordering runs before projection so ORDER BY may use any source column;
    /// DISTINCT keeps the first row of each duplicate set, which preserves it.
    fn build_select(&self, select: SelectStatement) -> Result<Node> {
        let SelectStatement {
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        } = select;

        // result aliases may be used in HAVING and ORDER BY
        let having = having.map(|expr| resolve_aliases(expr, &columns)).transpose()?;
        let order_by = order_by
            .into_iter()
            .map(|term| {
                Ok(OrderingTerm {
                    expr: resolve_aliases(term.expr, &columns)?,
                    direction: term.direction,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut node = Node::Scan {
            table_name: from,
            filter: where_clause,
        };

        // aggregates referenced anywhere after grouping, deduplicated by SQL text
        let mut aggregates: Vec<Expression> = Vec::new();
        {
            let mut collect = |expr: &Expression| {
                expr.walk(&mut |e| {
                    if let Expression::Function(name, args) = e {
                        if is_aggregate(name, args) && !aggregates.contains(e) {
                            aggregates.push(e.clone());
                        }
                    }
                })
            };
            for column in &columns {
                if let ResultColumn::Expr(expr, _) = column {
                    collect(expr);
                }
            }
            if let Some(expr) = &having {
                collect(expr);
            }
            for term in &order_by {
                collect(&term.expr);
            }
        }

        let hidden = aggregates.len();
        if !group_by.is_empty() || !aggregates.is_empty() {
            node = Node::Aggregate {
                source: Box::new(node),
                group_by,
                aggregates,
            };
        }

        if let Some(predicate) = having {
            node = Node::Filter {
                source: Box::new(node),
                predicate,
            };
        }

        if !order_by.is_empty() {
            node = Node::Order {
                source: Box::new(node),
                order_by,
            };
        }
        node = Node::Projection {
            source: Box::new(node),
            exprs: columns,
            hidden,
        };
        if distinct {
            node = Node::Distinct {
                source: Box::new(node),
            };
        }

        // OFFSET - must be processed before LIMIT when both are present
        if let Some(offset) = offset.map(|e| self.eval_bound(e, "OFFSET")).transpose()?.flatten() {
            if offset > 0 {
                node = Node::Offset {
                    source: Box::new(node),
                    offset,
                };
            }
        }
        if let Some(limit) = limit.map(|e| self.eval_bound(e, "LIMIT")).transpose()?.flatten() {
            node = Node::Limit {
                source: Box::new(node),
                limit,
            };
        }

        Ok(node)
    }

    /// Evaluates a LIMIT / OFFSET expression; negative and NULL mean unbounded
    fn eval_bound(&self, expr: Expression, clause: &str) -> Result<Option<usize>> {
        match expr::evaluate(&expr, &Scope::empty(), &mut NoSubquery)? {
            Value::Integer(i) if i < 0 => Ok(None),
            Value::Integer(i) => Ok(Some(i as usize)),
            Value::Null => Ok(None),
            v => Err(Error::TypeMismatch(format!(
                "{} must be an integer, found {}",
                clause, v
            ))),
        }
    }
}

/// Whether an expression reads the named column
fn references(expr: &Expression, name: &str) -> bool {
    let mut found = false;
    expr.walk(&mut |e| found |= matches!(e, Expression::Column(c) if c == name));
    found
}

/// Replaces references to result aliases with the aliased expression
///
/// An alias shadowing a column its own expression reads (`sum(x) AS x`) is
/// left alone, so `x` keeps meaning the source column.
fn resolve_aliases(expr: Expression, columns: &[ResultColumn]) -> Result<Expression> {
    expr.transform(&mut |e| {
        Ok(match e {
            Expression::Column(name) => columns
                .iter()
                .find_map(|c| match c {
                    ResultColumn::Expr(expr, Some(alias)) if *alias == name && !references(expr, &name) => {
                        Some(expr.clone())
                    }
                    _ => None,
                })
                .unwrap_or(Expression::Column(name)),
            e => e,
        })
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Planner;
    use crate::{
        error::{Error, Result},
        sql::{
            expr::{ResultColumn, column, count_all, literal},
            plan::{Node, Plan},
            statement::{Compile, StatementBuilder},
        },
    };

    #[test]
    fn test_select_pipeline() -> Result<()> {
        let stmt = StatementBuilder::select([column("name")])
            .from("users")
            .where_(column("age").gt(18))
            .order([column("name").asc()])
            .limit(10)
            .offset(2)
            .statement()?;

        let Plan(node) = Planner::new().build(stmt)?;
        let expected = Node::Limit {
            source: Box::new(Node::Offset {
                source: Box::new(Node::Projection {
                    source: Box::new(Node::Order {
                        source: Box::new(Node::Scan {
                            table_name: "users".into(),
                            filter: Some(column("age").gt(18)),
                        }),
                        order_by: vec![column("name").asc()],
                    }),
                    exprs: vec![ResultColumn::from(column("name"))],
                    hidden: 0,
                }),
                offset: 2,
            }),
            limit: 10,
        };
        assert_eq!(node, expected);
        Ok(())
    }

    #[test]
    fn test_aggregates_collected_once() -> Result<()> {
        let stmt = StatementBuilder::select([column("dept").into(), count_all().alias("n")])
            .from("staff")
            .group([column("dept")])?
            .having(count_all().gt(1))?
            .order([column("n").desc()])
            .statement()?;

        let Plan(node) = Plan::build(stmt)?;
        let Node::Projection { source, hidden, .. } = node else {
            panic!("expected projection");
        };
        assert_eq!(hidden, 1);
        let Node::Order { source, order_by } = *source else {
            panic!("expected order");
        };
        // alias resolved to the aggregate
        assert_eq!(order_by, vec![count_all().desc()]);
        let Node::Filter { source, .. } = *source else {
            panic!("expected filter");
        };
        assert!(matches!(*source, Node::Aggregate { ref aggregates, .. } if aggregates == &vec![count_all()]));
        Ok(())
    }

    #[test]
    fn test_aliases_in_having() -> Result<()> {
        let stmt = StatementBuilder::select([column("dept").into(), column("age").sum().alias("s")])
            .from("staff")
            .group([column("dept")])?
            .having(column("s").gt(1))?
            .statement()?;
        let Plan(node) = Plan::build(stmt)?;
        let Node::Projection { source, .. } = node else {
            panic!("expected projection");
        };
        let Node::Filter { predicate, .. } = *source else {
            panic!("expected filter");
        };
        assert_eq!(predicate, column("age").sum().gt(1));

        // an alias naming its own input column is not substituted
        let stmt = StatementBuilder::select([column("age").sum().alias("age")])
            .from("staff")
            .order([column("age").asc()])
            .statement()?;
        let Plan(node) = Plan::build(stmt)?;
        let Node::Projection { source, .. } = node else {
            panic!("expected projection");
        };
        assert!(matches!(*source, Node::Order { ref order_by, .. } if order_by == &vec![column("age").asc()]));
        Ok(())
    }

    #[test]
    fn test_distinct_orders_before_projection() -> Result<()> {
        let stmt = StatementBuilder::select([column("name")])
            .from("users")
            .distinct()?
            .order([column("age").desc()])
            .statement()?;
        let Plan(node) = Plan::build(stmt)?;
        let expected = Node::Distinct {
            source: Box::new(Node::Projection {
                source: Box::new(Node::Order {
                    source: Box::new(Node::Scan {
                        table_name: "users".into(),
                        filter: None,
                    }),
                    order_by: vec![column("age").desc()],
                }),
                exprs: vec![ResultColumn::from(column("name"))],
                hidden: 0,
            }),
        };
        assert_eq!(node, expected);
        Ok(())
    }

    #[test]
    fn test_bounds() -> Result<()> {
        let stmt = StatementBuilder::select(["*"]).from("t").limit(-1).statement()?;
        let Plan(node) = Plan::build(stmt)?;
        assert!(matches!(node, Node::Projection { .. }));

        let stmt = StatementBuilder::select(["*"]).from("t").limit("ten").statement()?;
        assert!(matches!(Plan::build(stmt), Err(Error::TypeMismatch(_))));

        let stmt = StatementBuilder::select(["*"]).from("t").limit(literal(2).add(3)).statement()?;
        let Plan(node) = Plan::build(stmt)?;
        assert!(matches!(node, Node::Limit { limit: 5, .. }));
        Ok(())
    }
}
