use std::collections::BTreeMap;

use crate::{
    error::{Error, ErrorCode, Result},
    sql::{
        engine::Transaction,
        expr::{Expression, Scope, evaluate},
        types::{Row, Value},
    },
};

use super::{Executor, ResultSet};

/// Aggregate executor - groups rows and computes aggregate functions
/// (COUNT, SUM, TOTAL, MIN, MAX, AVG)
///
/// Each output row is the last source row of its group followed by the
/// aggregate values, so grouped columns and expressions over them still
/// resolve after grouping.
pub struct Aggregate<T: Transaction> {
    source: Box<dyn Executor<T>>,
    group_by: Vec<Expression>,
    aggregates: Vec<Expression>,
}

impl<T: Transaction> Aggregate<T> {
    pub fn new(
        source: Box<dyn Executor<T>>,
        group_by: Vec<Expression>,
        aggregates: Vec<Expression>,
    ) -> Box<Self> {
        Box::new(Self {
            source,
            group_by,
            aggregates,
        })
    }
}

/// Rows of one group: a representative row plus the aggregate inputs
struct Group {
    last: Row,
    inputs: Vec<Vec<Value>>,
}

impl<T: Transaction + 'static> Executor<T> for Aggregate<T> {
    fn execute(self: Box<Self>, txn: &mut T) -> Result<ResultSet> {
        let ResultSet::Scan { columns, rows } = self.source.execute(txn)? else {
            return Err(Error::engine(ErrorCode::Internal, "unexpected result set"));
        };

        let mut calculators = Vec::with_capacity(self.aggregates.len());
        for expr in &self.aggregates {
            match expr {
                Expression::Function(name, args) => {
                    calculators.push((<dyn Calculator>::build(name, args.is_empty())?, args.first()))
                }
                other => {
                    return Err(Error::engine(
                        ErrorCode::Internal,
                        format!("{} is not an aggregate", other),
                    ));
                }
            }
        }

        // groups keyed by the encoded GROUP BY values, so output follows key order
        let mut groups: BTreeMap<Vec<u8>, Group> = BTreeMap::new();
        for row in rows {
            let scope = Scope::new(&columns, &row);
            let mut key = Vec::new();
            for expr in &self.group_by {
                evaluate(expr, &scope, txn)?.encode_key(&mut key);
            }
            let mut inputs = Vec::with_capacity(calculators.len());
            for (_, arg) in &calculators {
                inputs.push(match arg {
                    Some(arg) => evaluate(arg, &scope, txn)?,
                    // count(*) counts rows
                    None => Value::Integer(1),
                });
            }

            let group = groups.entry(key).or_insert_with(|| Group {
                last: Vec::new(),
                inputs: vec![Vec::new(); calculators.len()],
            });
            for (values, input) in group.inputs.iter_mut().zip(inputs) {
                values.push(input);
            }
            group.last = row;
        }

        // without GROUP BY an empty input still yields one row
        if groups.is_empty() && self.group_by.is_empty() {
            groups.insert(
                Vec::new(),
                Group {
                    last: vec![Value::Null; columns.len()],
                    inputs: vec![Vec::new(); calculators.len()],
                },
            );
        }

        let mut new_rows = Vec::with_capacity(groups.len());
        for (_, group) in groups {
            let mut row = group.last;
            for ((calculator, _), values) in calculators.iter().zip(&group.inputs) {
                row.push(calculator.calc(values)?);
            }
            new_rows.push(row);
        }

        let mut new_columns = columns;
        new_columns.extend(self.aggregates.iter().map(|e| e.to_string()));
        Ok(ResultSet::Scan {
            columns: new_columns,
            rows: new_rows,
        })
    }
}

/// Trait for aggregate function calculations
pub trait Calculator {
    /// Folds the argument values of one group
    fn calc(&self, values: &[Value]) -> Result<Value>;
}

impl dyn Calculator {
    /// Runtime dispatch to appropriate calculator based on function name
    pub fn build(func_name: &str, count_rows: bool) -> Result<Box<dyn Calculator>> {
        Ok(match func_name.to_lowercase().as_str() {
            "count" if count_rows => Box::new(CountRows),
            "count" => Box::new(Count),
            "sum" => Box::new(Sum),
            "total" => Box::new(Total),
            "min" => Box::new(Min),
            "max" => Box::new(Max),
            "avg" => Box::new(Avg),
            _ => {
                return Err(Error::engine(
                    ErrorCode::Error,
                    format!("unknown aggregate function {}", func_name),
                ));
            }
        })
    }
}

/// COUNT(*) - counts rows
pub struct CountRows;

impl Calculator for CountRows {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        Ok(Value::Integer(values.len() as i64))
    }
}

/// COUNT - counts non-null values
pub struct Count;

impl Calculator for Count {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        Ok(Value::Integer(values.iter().filter(|v| !v.is_null()).count() as i64))
    }
}

/// MIN - smallest non-null value
pub struct Min;

impl Calculator for Min {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        Ok(values
            .iter()
            .filter(|v| !v.is_null())
            .min_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// MAX - largest non-null value
pub struct Max;

impl Calculator for Max {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        Ok(values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// SUM - integer while every input is an integer and no overflow occurs,
/// NULL when there are no non-null inputs
pub struct Sum;

impl Calculator for Sum {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        let mut sum: Option<Value> = None;
        for value in values {
            sum = Some(match (sum.take(), value) {
                (sum, Value::Null) => match sum {
                    Some(sum) => sum,
                    None => continue,
                },
                (None, Value::Integer(v)) => Value::Integer(*v),
                (None, Value::Float(v)) => Value::Float(*v),
                (Some(Value::Integer(s)), Value::Integer(v)) => match s.checked_add(*v) {
                    Some(s) => Value::Integer(s),
                    None => Value::Float(s as f64 + *v as f64),
                },
                (Some(Value::Integer(s)), Value::Float(v)) => Value::Float(s as f64 + v),
                (Some(Value::Float(s)), Value::Integer(v)) => Value::Float(s + *v as f64),
                (Some(Value::Float(s)), Value::Float(v)) => Value::Float(s + v),
                (_, v) => {
                    return Err(Error::TypeMismatch(format!(
                        "cannot sum {} value {}",
                        v.column_type(),
                        v
                    )));
                }
            });
        }
        Ok(sum.unwrap_or(Value::Null))
    }
}

/// TOTAL - floating point sum, 0.0 for no inputs
pub struct Total;

impl Calculator for Total {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        Ok(match Sum.calc(values)? {
            Value::Integer(i) => Value::Float(i as f64),
            Value::Null => Value::Float(0.0),
            v => v,
        })
    }
}

/// AVG - calculates average of the non-null values
pub struct Avg;

impl Calculator for Avg {
    fn calc(&self, values: &[Value]) -> Result<Value> {
        // AVG = SUM / COUNT
        let sum = Total.calc(values)?;
        let count = Count.calc(values)?;
        Ok(match (sum, count) {
            (_, Value::Integer(0)) => Value::Null,
            (Value::Float(s), Value::Integer(c)) => Value::Float(s / c as f64),
            _ => Value::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Calculator;
    use crate::{
        error::{Error, Result},
        sql::types::Value,
    };

    fn calc(name: &str, values: &[Value]) -> Result<Value> {
        <dyn Calculator>::build(name, false)?.calc(values)
    }

    #[test]
    fn test_calculators() -> Result<()> {
        let values = [Value::Integer(3), Value::Null, Value::Integer(1), Value::Integer(5)];
        assert_eq!(calc("count", &values)?, Value::Integer(3));
        assert_eq!(<dyn Calculator>::build("count", true)?.calc(&values)?, Value::Integer(4));
        assert_eq!(calc("sum", &values)?, Value::Integer(9));
        assert_eq!(calc("total", &values)?, Value::Float(9.0));
        assert_eq!(calc("avg", &values)?, Value::Float(3.0));
        assert_eq!(calc("min", &values)?, Value::Integer(1));
        assert_eq!(calc("max", &values)?, Value::Integer(5));

        assert_eq!(calc("sum", &[Value::Integer(1), Value::Float(0.5)])?, Value::Float(1.5));
        assert_eq!(calc("sum", &[Value::Integer(i64::MAX), Value::Integer(1)])?, Value::Float(i64::MAX as f64 + 1.0));
        assert_eq!(calc("sum", &[Value::Null])?, Value::Null);
        assert_eq!(calc("sum", &[Value::Null, Value::Integer(2)])?, Value::Integer(2));
        assert_eq!(calc("sum", &[Value::Integer(2), Value::Null])?, Value::Integer(2));
        assert_eq!(calc("total", &[])?, Value::Float(0.0));
        assert_eq!(calc("avg", &[])?, Value::Null);
        assert!(matches!(calc("sum", &[Value::Text("a".into())]), Err(Error::TypeMismatch(_))));
        Ok(())
    }
}
