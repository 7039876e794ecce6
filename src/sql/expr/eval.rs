use std::cmp::Ordering;

use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        engine::Transaction,
        expr::{BinaryOperator, Expression, UnaryOperator, is_aggregate},
        plan::Plan,
        statement::{SelectStatement, Statement},
        types::{Row, Value},
    },
};

/// Column names and values of the row an expression is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    columns: &'a [String],
    row: &'a [Value],
}

impl<'a> Scope<'a> {
    pub fn new(columns: &'a [String], row: &'a [Value]) -> Self {
        Self { columns, row }
    }

    /// Scope without columns, for constant expressions
    pub fn empty() -> Scope<'static> {
        Scope { columns: &[], row: &[] }
    }

    fn exact(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.row.get(i))
    }

    /// Resolves a column reference; `t.c` falls back to `c`
    fn column(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.exact(name) {
            return Ok(value.clone());
        }
        if let Some((_, unqualified)) = name.rsplit_once('.') {
            if let Some(value) = self.exact(unqualified) {
                return Ok(value.clone());
            }
        }
        Err(Error::engine(ErrorCode::Error, format!("no such column: {}", name)))
    }
}

/// Runs uncorrelated subqueries on behalf of the evaluator
pub trait SubqueryRunner {
    fn run(&mut self, select: &SelectStatement) -> Result<Vec<Row>>;
}

impl<T: Transaction + 'static> SubqueryRunner for T {
    fn run(&mut self, select: &SelectStatement) -> Result<Vec<Row>> {
        match Plan::build(Statement::Select(select.clone()))?.execute(self)? {
            crate::sql::executor::ResultSet::Scan { rows, .. } => Ok(rows),
            _ => Err(Error::engine(ErrorCode::Internal, "subquery did not produce rows")),
        }
    }
}

/// Rejects subqueries; used where no transaction is available
pub struct NoSubquery;

impl SubqueryRunner for NoSubquery {
    fn run(&mut self, _: &SelectStatement) -> Result<Vec<Row>> {
        Err(Error::engine(ErrorCode::Error, "subqueries are not allowed here"))
    }
}

/// Evaluates an expression against a row
///
/// Follows SQL three-valued logic: NULL operands yield NULL, except for
/// `AND`/`OR` where the other operand can decide the result. Truth values are
/// `Integer(0)` / `Integer(1)`. Unbound parameters evaluate to NULL.
pub fn evaluate(expr: &Expression, scope: &Scope, runner: &mut dyn SubqueryRunner) -> Result<Value> {
    Ok(match expr {
        Expression::Column(name) => scope.column(name)?,
        Expression::Literal(value) => value.clone(),
        Expression::Bind(_) => Value::Null,
        Expression::Unary(op, expr) => {
            let value = evaluate(expr, scope, runner)?;
            match op {
                UnaryOperator::IsNull => Value::from_bool(value.is_null()),
                UnaryOperator::NotNull => Value::from_bool(!value.is_null()),
                UnaryOperator::Not if value.is_null() => Value::Null,
                UnaryOperator::Not => Value::from_bool(!value.is_true()),
                UnaryOperator::Negate => negate(value)?,
            }
        }
        Expression::Binary(BinaryOperator::And, lhs, rhs) => {
            let lhs = evaluate(lhs, scope, runner)?;
            if !lhs.is_null() && !lhs.is_true() {
                return Ok(Value::from_bool(false));
            }
            let rhs = evaluate(rhs, scope, runner)?;
            match (lhs.is_null(), rhs.is_null()) {
                (_, false) if !rhs.is_true() => Value::from_bool(false),
                (false, false) => Value::from_bool(true),
                _ => Value::Null,
            }
        }
        Expression::Binary(BinaryOperator::Or, lhs, rhs) => {
            let lhs = evaluate(lhs, scope, runner)?;
            if lhs.is_true() {
                return Ok(Value::from_bool(true));
            }
            let rhs = evaluate(rhs, scope, runner)?;
            match (lhs.is_null(), rhs.is_null()) {
                (_, false) if rhs.is_true() => Value::from_bool(true),
                (false, false) => Value::from_bool(false),
                _ => Value::Null,
            }
        }
        Expression::Binary(BinaryOperator::In, lhs, rhs) => {
            let needle = evaluate(lhs, scope, runner)?;
            let candidates = match rhs.as_ref() {
                Expression::Subquery(select) => runner
                    .run(select)?
                    .into_iter()
                    .map(|row| row.into_iter().next().unwrap_or(Value::Null))
                    .collect(),
                rhs => vec![evaluate(rhs, scope, runner)?],
            };
            in_list(needle, &candidates)
        }
        Expression::Binary(op, lhs, rhs) => {
            let lhs = evaluate(lhs, scope, runner)?;
            let rhs = evaluate(rhs, scope, runner)?;
            binary(*op, lhs, rhs)?
        }
        Expression::Function(name, args) if is_aggregate(name, args) => scope
            .exact(&expr.to_string())
            .cloned()
            .ok_or_else(|| {
                Error::engine(ErrorCode::Error, format!("misuse of aggregate function {}()", name))
            })?,
        Expression::Function(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope, runner))
                .collect::<Result<Vec<_>>>()?;
            scalar_function(name, args)?
        }
        Expression::Subquery(select) => runner
            .run(select)?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(Value::Null),
    })
}

fn in_list(needle: Value, candidates: &[Value]) -> Value {
    if needle.is_null() {
        return Value::Null;
    }
    let mut saw_null = false;
    for candidate in candidates {
        if candidate.is_null() {
            saw_null = true;
        } else if needle.compare(candidate) == Ordering::Equal {
            return Value::from_bool(true);
        }
    }
    if saw_null { Value::Null } else { Value::from_bool(false) }
}

fn negate(value: Value) -> Result<Value> {
    Ok(match value {
        Value::Null => Value::Null,
        Value::Integer(i) => i
            .checked_neg()
            .map(Value::Integer)
            .unwrap_or(Value::Float(-(i as f64))),
        Value::Float(f) => Value::Float(-f),
        v => return Err(not_numeric(&v)),
    })
}

fn not_numeric(value: &Value) -> Error {
    Error::TypeMismatch(format!(
        "cannot apply arithmetic to {} value {}",
        value.column_type(),
        value
    ))
}

fn binary(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
    use BinaryOperator::*;

    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    Ok(match op {
        Equal => Value::from_bool(lhs.compare(&rhs) == Ordering::Equal),
        NotEqual => Value::from_bool(lhs.compare(&rhs) != Ordering::Equal),
        Less => Value::from_bool(lhs.compare(&rhs) == Ordering::Less),
        LessOrEqual => Value::from_bool(lhs.compare(&rhs) != Ordering::Greater),
        Greater => Value::from_bool(lhs.compare(&rhs) == Ordering::Greater),
        GreaterOrEqual => Value::from_bool(lhs.compare(&rhs) != Ordering::Less),
        Add | Subtract | Multiply | Divide | Modulo => arithmetic(op, lhs, rhs)?,
        Concat => Value::Text(format!("{}{}", text_of(&lhs), text_of(&rhs))),
        Like => Value::from_bool(like(&text_of(&lhs), &text_of(&rhs))),
        And | Or | In => {
            return Err(Error::engine(
                ErrorCode::Internal,
                format!("operator {:?} evaluated out of place", op),
            ));
        }
    })
}

fn arithmetic(op: BinaryOperator, lhs: Value, rhs: Value) -> Result<Value> {
    match (&lhs, &rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            let checked = match op {
                BinaryOperator::Add => a.checked_add(b),
                BinaryOperator::Subtract => a.checked_sub(b),
                BinaryOperator::Multiply => a.checked_mul(b),
                BinaryOperator::Divide | BinaryOperator::Modulo if b == 0 => return Ok(Value::Null),
                BinaryOperator::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            match checked {
                Some(i) => Ok(Value::Integer(i)),
                // overflow, continue in floating point
                None => float_arithmetic(op, a as f64, b as f64),
            }
        }
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            float_arithmetic(op, as_f64(&lhs), as_f64(&rhs))
        }
        (Value::Integer(_) | Value::Float(_), other) | (other, _) => Err(not_numeric(other)),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn float_arithmetic(op: BinaryOperator, a: f64, b: f64) -> Result<Value> {
    Ok(match op {
        BinaryOperator::Add => Value::Float(a + b),
        BinaryOperator::Subtract => Value::Float(a - b),
        BinaryOperator::Multiply => Value::Float(a * b),
        BinaryOperator::Divide | BinaryOperator::Modulo if b == 0.0 => Value::Null,
        BinaryOperator::Divide => Value::Float(a / b),
        _ => Value::Float(a % b),
    })
}

/// Text form used by `||`, LIKE and the string functions
fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        v => v.to_string(),
    }
}

/// LIKE matching: `%` any run, `_` one character, ASCII case-insensitive
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '_' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp + 1;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

fn scalar_function(name: &str, mut args: Vec<Value>) -> Result<Value> {
    let argc = args.len();
    let arity = |n: usize| -> Result<()> {
        if argc == n {
            Ok(())
        } else {
            Err(Error::engine(
                ErrorCode::Error,
                format!("wrong number of arguments to function {}()", name),
            ))
        }
    };

    Ok(match name {
        "abs" => {
            arity(1)?;
            match args.remove(0) {
                Value::Null => Value::Null,
                Value::Integer(i) => i
                    .checked_abs()
                    .map(Value::Integer)
                    .unwrap_or(Value::Float((i as f64).abs())),
                Value::Float(f) => Value::Float(f.abs()),
                v => return Err(not_numeric(&v)),
            }
        }
        "upper" | "lower" => {
            arity(1)?;
            match args.remove(0) {
                Value::Null => Value::Null,
                v if name == "upper" => Value::Text(text_of(&v).to_uppercase()),
                v => Value::Text(text_of(&v).to_lowercase()),
            }
        }
        "length" => {
            arity(1)?;
            match args.remove(0) {
                Value::Null => Value::Null,
                Value::Blob(b) => Value::Integer(b.len() as i64),
                v => Value::Integer(text_of(&v).chars().count() as i64),
            }
        }
        "typeof" => {
            arity(1)?;
            Value::Text(args[0].column_type().to_string().to_lowercase())
        }
        "coalesce" | "ifnull" => args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null),
        "min" | "max" => {
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let pick = if name == "min" { Ordering::Less } else { Ordering::Greater };
            args.into_iter()
                .reduce(|best, v| if v.compare(&best) == pick { v } else { best })
                .unwrap_or(Value::Null)
        }
        _ => return Err(Error::engine(ErrorCode::Error, format!("no such function: {}", name))),
    })
}

#[cfg(test)]
mod tests {
    use super::{NoSubquery, Scope, evaluate, like};
    use crate::{
        error::{Error, ErrorCode, Result},
        sql::{
            expr::{Expression, bind, column, count_all, function, literal},
            types::Value,
        },
    };

    fn eval(expr: Expression) -> Result<Value> {
        let columns = vec!["id".to_string(), "name".to_string(), "score".to_string()];
        let row = vec![Value::Integer(7), Value::Text("Alice".into()), Value::Null];
        evaluate(&expr, &Scope::new(&columns, &row), &mut NoSubquery)
    }

    #[test]
    fn test_three_valued_logic() -> Result<()> {
        assert_eq!(eval(column("score").eq(1))?, Value::Null);
        assert_eq!(eval(column("score").gt(1).and(literal(false)))?, Value::Integer(0));
        assert_eq!(eval(column("score").gt(1).and(literal(true)))?, Value::Null);
        assert_eq!(eval(column("score").gt(1).or(literal(true)))?, Value::Integer(1));
        assert_eq!(eval(column("score").gt(1).or(literal(false)))?, Value::Null);
        assert_eq!(eval(column("score").is_null())?, Value::Integer(1));
        assert_eq!(eval(column("score").eq(1).not())?, Value::Null);
        assert_eq!(eval(bind(1).is_null())?, Value::Integer(1));
        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        assert_eq!(eval(column("id").add(3))?, Value::Integer(10));
        assert_eq!(eval(column("id").div(2))?, Value::Integer(3));
        assert_eq!(eval(column("id").div(2.0))?, Value::Float(3.5));
        assert_eq!(eval(column("id").div(0))?, Value::Null);
        assert_eq!(eval(column("id").rem(4))?, Value::Integer(3));
        assert_eq!(eval(literal(i64::MAX).add(1))?, Value::Float(i64::MAX as f64 + 1.0));
        assert_eq!(eval(column("id").neg())?, Value::Integer(-7));
        assert!(matches!(eval(column("name").add(1)), Err(Error::TypeMismatch(_))));
        assert_eq!(eval(column("name").concat(column("id")))?, Value::Text("Alice7".into()));
        Ok(())
    }

    #[test]
    fn test_like() {
        assert!(like("Alice", "a%"));
        assert!(like("Alice", "%LIC_"));
        assert!(like("", "%"));
        assert!(!like("Alice", "a_"));
        assert!(like("abcabc", "%bc"));
        assert!(!like("abc", "%d%"));
    }

    #[test]
    fn test_functions() -> Result<()> {
        assert_eq!(eval(column("name").upper())?, Value::Text("ALICE".into()));
        assert_eq!(eval(column("name").length())?, Value::Integer(5));
        assert_eq!(eval(literal(-2.5).abs())?, Value::Float(2.5));
        assert_eq!(
            eval(function("coalesce", vec![column("score"), literal(0)])?)?,
            Value::Integer(0)
        );
        assert_eq!(
            eval(function("max", vec![column("id"), literal(3), literal(9)])?)?,
            Value::Integer(9)
        );
        assert_eq!(eval(function("typeof", vec![column("name")])?)?, Value::Text("text".into()));

        let unknown = eval(function("soundex", vec![column("name")])?).unwrap_err();
        assert_eq!(unknown.code(), Some(ErrorCode::Error));
        let misuse = eval(count_all()).unwrap_err();
        assert_eq!(misuse.code(), Some(ErrorCode::Error));
        Ok(())
    }

    #[test]
    fn test_columns() -> Result<()> {
        assert_eq!(eval(column("users.id"))?, Value::Integer(7));
        let missing = eval(column("age")).unwrap_err();
        assert_eq!(missing.code(), Some(ErrorCode::Error));
        Ok(())
    }
}
