//! Default scalar functions: math, string, date, collection, object helpers.

use chrono::NaiveDate;

use super::FunctionRegistry;
use crate::{ast::Value, error::QueryError};

fn as_f64(v: &Value) -> Result<f64, QueryError> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(QueryError::Evaluation { message: format!("{other} is not numeric") }),
    }
}

fn as_str(v: &Value) -> Result<&str, QueryError> {
    match v {
        Value::String(s) => Ok(s.as_str()),
        other => Err(QueryError::Evaluation { message: format!("{other} is not a string") }),
    }
}

pub fn register_defaults(registry: &mut FunctionRegistry) {
    // --- math ---
    registry.register_scalar(
        "mathEval",
        Box::new(|args| {
            // args: [left, op, right] where op is encoded as a single-character string literal
            let [left, op, right] = args else {
                return Err(QueryError::Evaluation { message: "mathEval takes exactly 3 arguments".into() });
            };
            let l = as_f64(left)?;
            let r = as_f64(right)?;
            let op = as_str(op)?;
            let result = match op {
                "+" => l + r,
                "-" => l - r,
                "*" => l * r,
                "/" => {
                    if r == 0.0 {
                        return Err(QueryError::Evaluation { message: "division by zero".into() });
                    }
                    l / r
                }
                other => return Err(QueryError::Evaluation { message: format!("unknown math operator {other}") }),
            };
            if result.fract() == 0.0 && matches!(left, Value::Int(_)) && matches!(right, Value::Int(_)) && op != "/" {
                Ok(Value::Int(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }),
    );

    // --- string ---
    registry.register_scalar("upper", Box::new(|args| Ok(Value::String(as_str(one(args)?)?.to_uppercase()))));
    registry.register_scalar("lower", Box::new(|args| Ok(Value::String(as_str(one(args)?)?.to_lowercase()))));
    registry.register_scalar(
        "concat",
        Box::new(|args| {
            let mut out = String::new();
            for a in args {
                out.push_str(&value_to_display(a));
            }
            Ok(Value::String(out))
        }),
    );
    registry.register_scalar(
        "substr",
        Box::new(|args| {
            let [s, start, len] = args else {
                return Err(QueryError::Evaluation { message: "substr takes exactly 3 arguments".into() });
            };
            let s = as_str(s)?;
            let start = as_f64(start)? as usize;
            let len = as_f64(len)? as usize;
            let taken: String = s.chars().skip(start).take(len).collect();
            Ok(Value::String(taken))
        }),
    );

    // --- date ---
    registry.register_scalar(
        "dateFormat",
        Box::new(|args| {
            let [d, fmt] = args else {
                return Err(QueryError::Evaluation { message: "dateFormat takes exactly 2 arguments".into() });
            };
            let Value::Date(date) = d else {
                return Err(QueryError::Evaluation { message: format!("{d} is not a date") });
            };
            Ok(Value::String(date.format(as_str(fmt)?).to_string()))
        }),
    );
    registry.register_scalar(
        "dateParse",
        Box::new(|args| {
            let [s, fmt] = args else {
                return Err(QueryError::Evaluation { message: "dateParse takes exactly 2 arguments".into() });
            };
            let parsed = NaiveDate::parse_from_str(as_str(s)?, as_str(fmt)?)
                .map_err(|e| QueryError::Evaluation { message: format!("invalid date: {e}") })?;
            Ok(Value::Date(parsed))
        }),
    );

    // --- collection ---
    registry.register_scalar(
        "size",
        Box::new(|args| match one(args)? {
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            other => Err(QueryError::Evaluation { message: format!("{other} has no size") }),
        }),
    );
    registry.register_scalar(
        "contains",
        Box::new(|args| {
            let [collection, needle] = args else {
                return Err(QueryError::Evaluation { message: "contains takes exactly 2 arguments".into() });
            };
            match collection {
                Value::List(items) => Ok(Value::Bool(items.contains(needle))),
                Value::String(s) => Ok(Value::Bool(s.contains(&value_to_display(needle)))),
                other => Err(QueryError::Evaluation { message: format!("{other} is not a collection") }),
            }
        }),
    );

    // --- object ---
    registry.register_scalar(
        "coalesce",
        Box::new(|args| Ok(args.iter().find(|v| !matches!(v, Value::Null)).cloned().unwrap_or(Value::Null))),
    );
    registry.register_scalar(
        "isNull",
        Box::new(|args| Ok(Value::Bool(matches!(one(args)?, Value::Null)))),
    );
}

fn one(args: &[Value]) -> Result<&Value, QueryError> {
    args.first().ok_or_else(|| QueryError::Evaluation { message: "expected exactly 1 argument".into() })
}

fn value_to_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
