//! Default aggregate functions: count, sum, product, mean.
//!
//! Each receives the full post-filter column of values (one per surviving row) and folds it
//! into a single result.

use super::FunctionRegistry;
use crate::{ast::Value, error::QueryError};

fn numeric(values: &[Value]) -> Result<Vec<f64>, QueryError> {
    values
        .iter()
        .map(|v| match v {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            Value::Null => Ok(0.0),
            other => Err(QueryError::Evaluation { message: format!("{other} is not numeric") }),
        })
        .collect()
}

fn all_integral(values: &[Value]) -> bool {
    values.iter().all(|v| matches!(v, Value::Int(_) | Value::Null))
}

pub fn register_defaults(registry: &mut FunctionRegistry) {
    registry.register_aggregate("count", Box::new(|values| Ok(Value::Int(values.len() as i64))));

    registry.register_aggregate(
        "sum",
        Box::new(|values| {
            let nums = numeric(values)?;
            let total: f64 = nums.iter().sum();
            Ok(if all_integral(values) { Value::Int(total as i64) } else { Value::Float(total) })
        }),
    );

    registry.register_aggregate(
        "product",
        Box::new(|values| {
            let nums = numeric(values)?;
            let total: f64 = nums.iter().product();
            Ok(if all_integral(values) { Value::Int(total as i64) } else { Value::Float(total) })
        }),
    );

    registry.register_aggregate(
        "mean",
        Box::new(|values| {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let nums = numeric(values)?;
            let mean = nums.iter().sum::<f64>() / nums.len() as f64;
            Ok(Value::Float(mean))
        }),
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::functions::FunctionRegistry;

    #[test]
    fn sum_of_integers_stays_integral() {
        let registry = FunctionRegistry::default();
        let values = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        assert_eq!(registry.call_aggregate("sum", &values).unwrap(), Value::Int(6));
    }

    #[test]
    fn mean_of_empty_collection_is_null() {
        let registry = FunctionRegistry::default();
        assert_eq!(registry.call_aggregate("mean", &[]).unwrap(), Value::Null);
    }
}
