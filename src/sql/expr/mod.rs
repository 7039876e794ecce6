//! Expression builder
//!
//! Expressions are immutable trees built by value. Combining two expressions
//! moves them into a new node; cloning is the way to reuse a subtree. Equality is
//! structural and `Display` renders canonical SQL, so two expressions built from
//! the same calls compare equal and print the same text.

use std::fmt::Display;

use crate::{
    error::{Error, Result},
    sql::{statement::SelectStatement, types::Value},
};

mod eval;

pub use eval::{NoSubquery, Scope, SubqueryRunner, evaluate};

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference
    Column(String),
    /// Constant value
    Literal(Value),
    /// Parameter bound at execution time
    Bind(BindParameter),
    Unary(UnaryOperator, Box<Expression>),
    Binary(BinaryOperator, Box<Expression>, Box<Expression>),
    /// Function call: Function("count", [Column("id")]); count(*) has no arguments
    Function(String, Vec<Expression>),
    /// Uncorrelated subquery
    Subquery(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindParameter {
    /// 1-based position, rendered as `?N`
    Index(usize),
    /// Named parameter including its prefix, e.g. `:name`
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Like,
    In,
}

impl BinaryOperator {
    fn as_sql(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessOrEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterOrEqual => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Concat => "||",
            BinaryOperator::Like => "LIKE",
            BinaryOperator::In => "IN",
        }
    }
}

/// Sort direction of an ordering term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// ORDER BY term
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingTerm {
    pub expr: Expression,
    pub direction: OrderDirection,
}

impl From<Expression> for OrderingTerm {
    fn from(expr: Expression) -> Self {
        OrderingTerm {
            expr,
            direction: OrderDirection::Ascending,
        }
    }
}

impl Display for OrderingTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            OrderDirection::Ascending => write!(f, "{} ASC", self.expr),
            OrderDirection::Descending => write!(f, "{} DESC", self.expr),
        }
    }
}

/// One entry of a SELECT result list
#[derive(Debug, Clone, PartialEq)]
pub enum ResultColumn {
    /// `*`
    All,
    Expr(Expression, Option<String>),
}

impl ResultColumn {
    /// Output column name: the alias, or the rendered expression
    pub fn name(&self) -> String {
        match self {
            ResultColumn::All => "*".into(),
            ResultColumn::Expr(_, Some(alias)) => alias.clone(),
            ResultColumn::Expr(expr, None) => expr.to_string(),
        }
    }
}

impl From<Expression> for ResultColumn {
    fn from(expr: Expression) -> Self {
        ResultColumn::Expr(expr, None)
    }
}

impl From<&str> for ResultColumn {
    fn from(name: &str) -> Self {
        match name {
            "*" => ResultColumn::All,
            name => ResultColumn::Expr(column(name), None),
        }
    }
}

impl Display for ResultColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultColumn::All => write!(f, "*"),
            ResultColumn::Expr(expr, Some(alias)) => write!(f, "{} AS {}", expr, quote_ident(alias)),
            ResultColumn::Expr(expr, None) => write!(f, "{}", expr),
        }
    }
}

pub fn column(name: impl Into<String>) -> Expression {
    Expression::Column(name.into())
}

pub fn literal(value: impl Into<Value>) -> Expression {
    Expression::Literal(value.into())
}

/// Positional parameter, 1-based
pub fn bind(index: usize) -> Expression {
    Expression::Bind(BindParameter::Index(index))
}

/// Named parameter; a leading `:`, `@` or `$` is kept, otherwise `:` is added
pub fn bind_named(name: &str) -> Expression {
    Expression::Bind(BindParameter::Named(normalize_param_name(name)))
}

pub(crate) fn normalize_param_name(name: &str) -> String {
    if name.starts_with([':', '@', '$']) {
        name.to_string()
    } else {
        format!(":{}", name)
    }
}

pub fn not(expr: Expression) -> Expression {
    Expression::Unary(UnaryOperator::Not, Box::new(expr))
}

pub fn compare(op: BinaryOperator, lhs: impl Into<Expression>, rhs: impl Into<Expression>) -> Expression {
    Expression::Binary(op, Box::new(lhs.into()), Box::new(rhs.into()))
}

pub fn subquery(select: SelectStatement) -> Expression {
    Expression::Subquery(Box::new(select))
}

/// `count(*)`
pub fn count_all() -> Expression {
    Expression::Function("count".into(), vec![])
}

/// Builds a function call, checking the argument count of known functions
///
/// Unknown functions are accepted here and rejected when executed.
pub fn function(name: &str, args: Vec<Expression>) -> Result<Expression> {
    let name = name.to_lowercase();
    if let Some((min, max)) = function_arity(&name) {
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(Error::InvalidStatement(format!(
                "wrong number of arguments to function {}()",
                name
            )));
        }
    }
    Ok(Expression::Function(name, args))
}

/// Accepted argument counts of the built-in functions
fn function_arity(name: &str) -> Option<(usize, Option<usize>)> {
    Some(match name {
        "count" => (0, Some(1)),
        "sum" | "avg" | "total" => (1, Some(1)),
        "min" | "max" => (1, None),
        "abs" | "upper" | "lower" | "length" | "typeof" => (1, Some(1)),
        "coalesce" => (2, None),
        "ifnull" => (2, Some(2)),
        _ => return None,
    })
}

/// Whether a call is an aggregate: single-argument min/max are, multi-argument are scalar
pub(crate) fn is_aggregate(name: &str, args: &[Expression]) -> bool {
    match name {
        "count" | "sum" | "avg" | "total" => true,
        "min" | "max" => args.len() == 1,
        _ => false,
    }
}

impl Expression {
    fn binary(self, op: BinaryOperator, rhs: impl Into<Expression>) -> Expression {
        Expression::Binary(op, Box::new(self), Box::new(rhs.into()))
    }

    fn unary(self, op: UnaryOperator) -> Expression {
        Expression::Unary(op, Box::new(self))
    }

    fn call(name: &str, args: Vec<Expression>) -> Expression {
        Expression::Function(name.into(), args)
    }

    pub fn eq(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Equal, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::NotEqual, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Less, rhs)
    }

    pub fn le(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::LessOrEqual, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Greater, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::GreaterOrEqual, rhs)
    }

    pub fn and(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Or, rhs)
    }

    pub fn not(self) -> Expression {
        self.unary(UnaryOperator::Not)
    }

    pub fn neg(self) -> Expression {
        self.unary(UnaryOperator::Negate)
    }

    pub fn add(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Add, rhs)
    }

    pub fn sub(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Subtract, rhs)
    }

    pub fn mul(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Multiply, rhs)
    }

    pub fn div(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Divide, rhs)
    }

    pub fn rem(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Modulo, rhs)
    }

    pub fn concat(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Concat, rhs)
    }

    pub fn like(self, pattern: impl Into<Expression>) -> Expression {
        self.binary(BinaryOperator::Like, pattern)
    }

    pub fn is_null(self) -> Expression {
        self.unary(UnaryOperator::IsNull)
    }

    pub fn not_null(self) -> Expression {
        self.unary(UnaryOperator::NotNull)
    }

    /// `expr IN (SELECT ...)`
    pub fn in_select(self, select: SelectStatement) -> Expression {
        self.binary(BinaryOperator::In, subquery(select))
    }

    pub fn asc(self) -> OrderingTerm {
        self.order(OrderDirection::Ascending)
    }

    pub fn desc(self) -> OrderingTerm {
        self.order(OrderDirection::Descending)
    }

    pub fn order(self, direction: OrderDirection) -> OrderingTerm {
        OrderingTerm {
            expr: self,
            direction,
        }
    }

    /// `expr AS alias` in a result list
    pub fn alias(self, alias: &str) -> ResultColumn {
        ResultColumn::Expr(self, Some(alias.to_string()))
    }

    pub fn count(self) -> Expression {
        Self::call("count", vec![self])
    }

    pub fn sum(self) -> Expression {
        Self::call("sum", vec![self])
    }

    pub fn avg(self) -> Expression {
        Self::call("avg", vec![self])
    }

    pub fn min(self) -> Expression {
        Self::call("min", vec![self])
    }

    pub fn max(self) -> Expression {
        Self::call("max", vec![self])
    }

    pub fn abs(self) -> Expression {
        Self::call("abs", vec![self])
    }

    pub fn upper(self) -> Expression {
        Self::call("upper", vec![self])
    }

    pub fn lower(self) -> Expression {
        Self::call("lower", vec![self])
    }

    pub fn length(self) -> Expression {
        Self::call("length", vec![self])
    }

    /// Visits this expression and every subexpression, subqueries excluded
    pub(crate) fn walk(&self, visitor: &mut impl FnMut(&Expression)) {
        visitor(self);
        match self {
            Expression::Unary(_, expr) => expr.walk(visitor),
            Expression::Binary(_, lhs, rhs) => {
                lhs.walk(visitor);
                rhs.walk(visitor);
            }
            Expression::Function(_, args) => args.iter().for_each(|arg| arg.walk(visitor)),
            Expression::Column(_)
            | Expression::Literal(_)
            | Expression::Bind(_)
            | Expression::Subquery(_) => {}
        }
    }

    /// Returns a copy with every node rewritten bottom-up by `f`
    pub(crate) fn transform(self, f: &mut impl FnMut(Expression) -> Result<Expression>) -> Result<Expression> {
        let expr = match self {
            Expression::Unary(op, expr) => Expression::Unary(op, Box::new(expr.transform(f)?)),
            Expression::Binary(op, lhs, rhs) => {
                Expression::Binary(op, Box::new(lhs.transform(f)?), Box::new(rhs.transform(f)?))
            }
            Expression::Function(name, args) => Expression::Function(
                name,
                args.into_iter()
                    .map(|arg| arg.transform(f))
                    .collect::<Result<_>>()?,
            ),
            Expression::Subquery(select) => Expression::Subquery(Box::new(select.transform(f)?)),
            expr => expr,
        };
        f(expr)
    }

    fn is_compound(&self) -> bool {
        matches!(self, Expression::Binary(..) | Expression::Unary(UnaryOperator::Not, _))
    }
}

/// Quotes an identifier unless it is a plain (optionally qualified) name
pub(crate) fn quote_ident(name: &str) -> String {
    let plain = |part: &str| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if name.split('.').all(plain) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

struct Operand<'a>(&'a Expression);

impl Display for Operand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_compound() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Canonical SQL rendering
impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Column(name) => write!(f, "{}", quote_ident(name)),
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Bind(BindParameter::Index(i)) => write!(f, "?{}", i),
            Expression::Bind(BindParameter::Named(name)) => write!(f, "{}", name),
            Expression::Unary(op, expr) => match op {
                UnaryOperator::Not => write!(f, "NOT {}", Operand(expr)),
                UnaryOperator::Negate => {
                    // `--` would read as a comment
                    let operand = Operand(expr).to_string();
                    if operand.starts_with('-') {
                        write!(f, "-({})", operand)
                    } else {
                        write!(f, "-{}", operand)
                    }
                }
                UnaryOperator::IsNull => write!(f, "{} ISNULL", Operand(expr)),
                UnaryOperator::NotNull => write!(f, "{} NOTNULL", Operand(expr)),
            },
            Expression::Binary(op, lhs, rhs) => {
                write!(f, "{} {} {}", Operand(lhs), op.as_sql(), Operand(rhs))
            }
            Expression::Function(name, args) if args.is_empty() => write!(f, "{}(*)", name),
            Expression::Function(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::Subquery(select) => write!(f, "({})", select),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::Error, sql::statement::StatementBuilder};

    #[test]
    fn test_render() {
        let expr = column("age").gt(18).and(column("name").like("A%"));
        assert_eq!(expr.to_string(), "(age > 18) AND (name LIKE 'A%')");

        let expr = not(column("deleted").is_null()).or(bind(1).eq(bind_named("id")));
        assert_eq!(expr.to_string(), "(NOT deleted ISNULL) OR (?1 = :id)");

        assert_eq!(count_all().to_string(), "count(*)");
        assert_eq!(column("price").mul(1.5).sum().to_string(), "sum(price * 1.5)");
        assert_eq!(column("first name").to_string(), "\"first name\"");
        assert_eq!(column("users.id").to_string(), "users.id");
        assert_eq!(column("x").neg().to_string(), "-x");
    }

    #[test]
    fn test_render_nested_negation() {
        assert_eq!(literal(-5).neg().to_string(), "-(-5)");
        assert_eq!(literal(-2.5).neg().to_string(), "-(-2.5)");
        assert_eq!(column("a").neg().neg().to_string(), "-(-a)");
        assert_eq!(column("a").sub(1).neg().to_string(), "-(a - 1)");
        assert_eq!(literal(5).neg().to_string(), "-5");
    }

    #[test]
    fn test_structural_equality() {
        let a = compare(BinaryOperator::Equal, column("id"), literal(5));
        let b = column("id").eq(5);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, column("id").eq(6));
    }

    #[test]
    fn test_function_arity() -> Result<()> {
        assert_eq!(function("COUNT", vec![])?, count_all());
        assert_eq!(function("abs", vec![column("x")])?, column("x").abs());
        assert!(matches!(
            function("abs", vec![column("x"), column("y")]),
            Err(Error::InvalidStatement(_))
        ));
        assert!(matches!(function("coalesce", vec![column("x")]), Err(Error::InvalidStatement(_))));
        // unknown functions are left to the engine
        assert!(function("soundex", vec![column("x")]).is_ok());
        Ok(())
    }

    #[test]
    fn test_subquery_render() -> Result<()> {
        let inner = StatementBuilder::select([column("id")])
            .from("banned")
            .select_statement()?;
        let expr = column("id").in_select(inner).not();
        assert_eq!(expr.to_string(), "NOT (id IN (SELECT id FROM banned))");
        Ok(())
    }

    #[test]
    fn test_ordering_and_alias() {
        assert_eq!(column("name").asc().to_string(), "name ASC");
        assert_eq!(column("age").desc().to_string(), "age DESC");
        assert_eq!(count_all().alias("total").to_string(), "count(*) AS total");
        assert_eq!(ResultColumn::from("*"), ResultColumn::All);
        assert_eq!(count_all().alias("n").name(), "n");
    }
}
