use crate::{
    error::{Error, Result},
    sql::{
        expr::{Expression, OrderingTerm, ResultColumn},
        statement::{Compile, SelectStatement, Statement},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Delete,
    Insert,
    Update,
}

/// Chainable statement builder
///
/// Setters mutate the builder in place and return it, so clauses chain left to
/// right. Calling a setter again replaces the earlier value; `order` and
/// `group` replace the whole list. Setters that only make sense for some
/// statement kinds return `Result` and leave the builder untouched on error.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementBuilder {
    kind: StatementKind,
    table: Option<String>,
    result_columns: Vec<ResultColumn>,
    distinct: bool,
    where_clause: Option<Expression>,
    group_by: Vec<Expression>,
    having: Option<Expression>,
    order_by: Vec<OrderingTerm>,
    limit: Option<Expression>,
    offset: Option<Expression>,
    assignments: Vec<(String, Expression)>,
    insert_columns: Vec<String>,
    rows: Vec<Vec<Expression>>,
    or_replace: bool,
}

impl StatementBuilder {
    fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            table: None,
            result_columns: Vec::new(),
            distinct: false,
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            assignments: Vec::new(),
            insert_columns: Vec::new(),
            rows: Vec::new(),
            or_replace: false,
        }
    }

    /// `SELECT columns`; an empty list selects `*`
    pub fn select<C: Into<ResultColumn>>(columns: impl IntoIterator<Item = C>) -> Self {
        let mut builder = Self::new(StatementKind::Select);
        builder.result_columns = columns.into_iter().map(Into::into).collect();
        builder
    }

    pub fn delete() -> Self {
        Self::new(StatementKind::Delete)
    }

    pub fn insert() -> Self {
        Self::new(StatementKind::Insert)
    }

    pub fn update() -> Self {
        Self::new(StatementKind::Update)
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn from(&mut self, table: &str) -> &mut Self {
        self.table = Some(table.to_string());
        self
    }

    /// Same as `from`, reads better for INSERT
    pub fn into_table(&mut self, table: &str) -> &mut Self {
        self.from(table)
    }

    pub fn where_(&mut self, expr: impl Into<Expression>) -> &mut Self {
        self.where_clause = Some(expr.into());
        self
    }

    pub fn order<T: Into<OrderingTerm>>(&mut self, terms: impl IntoIterator<Item = T>) -> &mut Self {
        self.order_by = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(&mut self, expr: impl Into<Expression>) -> &mut Self {
        self.limit = Some(expr.into());
        self
    }

    pub fn offset(&mut self, expr: impl Into<Expression>) -> &mut Self {
        self.offset = Some(expr.into());
        self
    }

    fn require(&self, kind: StatementKind, clause: &str) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation(format!(
                "{} is not supported on {:?} statements",
                clause, self.kind
            )))
        }
    }

    pub fn group<T: Into<Expression>>(&mut self, exprs: impl IntoIterator<Item = T>) -> Result<&mut Self> {
        self.require(StatementKind::Select, "GROUP BY")?;
        self.group_by = exprs.into_iter().map(Into::into).collect();
        Ok(self)
    }

    pub fn having(&mut self, expr: impl Into<Expression>) -> Result<&mut Self> {
        self.require(StatementKind::Select, "HAVING")?;
        self.having = Some(expr.into());
        Ok(self)
    }

    pub fn distinct(&mut self) -> Result<&mut Self> {
        self.require(StatementKind::Select, "DISTINCT")?;
        self.distinct = true;
        Ok(self)
    }

    /// `SET column = expr`, replacing an earlier assignment to the same column
    pub fn set(&mut self, column: &str, expr: impl Into<Expression>) -> Result<&mut Self> {
        self.require(StatementKind::Update, "SET")?;
        let expr = expr.into();
        match self.assignments.iter_mut().find(|(c, _)| c == column) {
            Some((_, existing)) => *existing = expr,
            None => self.assignments.push((column.to_string(), expr)),
        }
        Ok(self)
    }

    pub fn columns<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) -> Result<&mut Self> {
        self.require(StatementKind::Insert, "column list")?;
        self.insert_columns = names.into_iter().map(Into::into).collect();
        Ok(self)
    }

    /// Appends one row of values
    pub fn values<T: Into<Expression>>(&mut self, row: impl IntoIterator<Item = T>) -> Result<&mut Self> {
        self.require(StatementKind::Insert, "VALUES")?;
        self.rows.push(row.into_iter().map(Into::into).collect());
        Ok(self)
    }

    pub fn or_replace(&mut self) -> Result<&mut Self> {
        self.require(StatementKind::Insert, "OR REPLACE")?;
        self.or_replace = true;
        Ok(self)
    }

    /// Compiles a SELECT builder into its statement, for use as a subquery
    pub fn select_statement(&self) -> Result<SelectStatement> {
        match self.statement()? {
            Statement::Select(select) => Ok(select),
            _ => Err(Error::InvalidStatement(format!(
                "{:?} statement used where a SELECT is expected",
                self.kind
            ))),
        }
    }

    fn table(&self) -> Result<String> {
        self.table
            .clone()
            .ok_or_else(|| Error::InvalidStatement(format!("{:?} statement has no table", self.kind)))
    }
}

impl Compile for StatementBuilder {
    fn statement(&self) -> Result<Statement> {
        let table = self.table()?;
        Ok(match self.kind {
            StatementKind::Select => {
                if self.having.is_some() && self.group_by.is_empty() {
                    return Err(Error::InvalidStatement("HAVING requires GROUP BY".into()));
                }
                let columns = if self.result_columns.is_empty() {
                    vec![ResultColumn::All]
                } else {
                    self.result_columns.clone()
                };
                Statement::Select(SelectStatement {
                    distinct: self.distinct,
                    columns,
                    from: table,
                    where_clause: self.where_clause.clone(),
                    group_by: self.group_by.clone(),
                    having: self.having.clone(),
                    order_by: self.order_by.clone(),
                    limit: self.limit.clone(),
                    offset: self.offset.clone(),
                })
            }
            StatementKind::Delete => Statement::Delete {
                table,
                where_clause: self.where_clause.clone(),
                order_by: self.order_by.clone(),
                limit: self.limit.clone(),
                offset: self.offset.clone(),
            },
            StatementKind::Update => {
                if self.assignments.is_empty() {
                    return Err(Error::InvalidStatement(format!(
                        "UPDATE {} has no SET clause",
                        table
                    )));
                }
                Statement::Update {
                    table,
                    assignments: self.assignments.clone(),
                    where_clause: self.where_clause.clone(),
                    order_by: self.order_by.clone(),
                    limit: self.limit.clone(),
                    offset: self.offset.clone(),
                }
            }
            StatementKind::Insert => {
                if self.where_clause.is_some()
                    || !self.order_by.is_empty()
                    || self.limit.is_some()
                    || self.offset.is_some()
                {
                    return Err(Error::InvalidStatement(
                        "INSERT does not take WHERE, ORDER BY, LIMIT or OFFSET".into(),
                    ));
                }
                if self.rows.is_empty() {
                    return Err(Error::InvalidStatement(format!("INSERT INTO {} has no values", table)));
                }
                if !self.insert_columns.is_empty() {
                    if let Some(row) = self.rows.iter().find(|r| r.len() != self.insert_columns.len()) {
                        return Err(Error::InvalidStatement(format!(
                            "{} values for {} columns",
                            row.len(),
                            self.insert_columns.len()
                        )));
                    }
                }
                Statement::Insert {
                    table,
                    columns: self.insert_columns.clone(),
                    values: self.rows.clone(),
                    or_replace: self.or_replace,
                }
            }
        })
    }
}
