//! Predicate evaluation, grouping, ordering, projection.

pub mod join;

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use tracing::warn;

use crate::{
    ast::{FieldOperator, JoinType, Operand, OrderDirection, Predicate, Query, Value},
    error::QueryError,
    functions::FunctionRegistry,
};

/// A row flowing through evaluation: a flat, joinable bag of resource-qualified fields
/// (`"people.age"`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a row with every field qualified under `resource`.
    pub fn from_fields(resource: &str, fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut row = Row::new();
        for (name, value) in fields {
            row.fields.insert(format!("{resource}.{name}"), value);
        }
        row
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Resolves a (possibly unqualified) field reference against this row's qualified keys.
    pub fn get(&self, resource: Option<&str>, name: &str) -> Value {
        if let Some(resource) = resource {
            if let Some(v) = self.fields.get(&format!("{resource}.{name}")) {
                return v.clone();
            }
        }
        self.fields
            .iter()
            .find(|(k, _)| k.ends_with(&format!(".{name}")) || k.as_str() == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)
    }

    /// Joinable: merges two rows' field sets into one (their qualified keys never clash since
    /// they come from different resources).
    pub fn join(&self, other: &Row) -> Row {
        let mut merged = self.clone();
        merged.fields.extend(other.fields.clone());
        merged
    }

    /// Iterates this row's qualified-key/value pairs, e.g. for rendering a result set.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// Predicates referencing only a single resource, plus an optional pushdown hint, handed to a
/// [`DataSource`] so it may (but need not) apply them itself.
pub struct FetchHint<'a> {
    pub predicate: &'a Predicate,
    pub limit: Option<usize>,
}

/// Fetches raw rows for one resource. Implementations are free to ignore `hint` entirely and
/// let the evaluator do all filtering/pagination in memory.
pub trait DataSource: Send + Sync {
    fn fetch(&self, resource: &str, hint: &FetchHint) -> Result<Vec<Row>, QueryError>;
}

/// Marks predicate subtrees already known to hold (e.g. the `IN` pushdown added to a join's
/// seed side), so they are not re-evaluated per row.
#[derive(Default)]
pub struct PredicateCache {
    satisfied: HashSet<usize>,
}

impl PredicateCache {
    pub fn mark_satisfied(&mut self, predicate: &Predicate) {
        self.satisfied.insert(predicate as *const _ as usize);
    }

    fn is_satisfied(&self, predicate: &Predicate) -> bool {
        self.satisfied.contains(&(predicate as *const _ as usize))
    }
}

struct Group {
    representative: Row,
    members: Vec<Row>,
}

/// Evaluates a [`Query`] against a [`DataSource`], threading through the configured function
/// registry and a positional parameter list for `?` placeholders.
pub struct Evaluator<'a> {
    functions: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn evaluate(&self, query: &Query, source: &dyn DataSource, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        self.evaluate_inner(query, source, params).inspect_err(|err| {
            warn!(resource = %query.resource, %err, "query evaluation failed");
        })
    }

    fn evaluate_inner(&self, query: &Query, source: &dyn DataSource, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let rows = if query.joins.is_empty() {
            self.fetch_single(query, source)?
        } else {
            join::evaluate_join(self, query, source, params)?
        };
        self.filter_group_order_project(query, rows, params)
    }

    fn fetch_single(&self, query: &Query, source: &dyn DataSource) -> Result<Vec<Row>, QueryError> {
        let pushed_limit = query.limit.map(|limit| query.start.unwrap_or(0) + limit);
        let hint = FetchHint { predicate: &query.predicate, limit: pushed_limit };
        source.fetch(&query.resource, &hint)
    }

    fn filter_group_order_project(&self, query: &Query, rows: Vec<Row>, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let cache = PredicateCache::default();
        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            if self.eval_predicate(&query.predicate, &row, params, &cache)? {
                filtered.push(row);
            }
        }

        let groups = self.apply_grouping(query, filtered, params)?;
        let ordered = self.apply_ordering(query, groups, params)?;
        let paginated = apply_pagination(query, ordered);
        self.apply_projection(query, paginated, params)
    }

    /// Predicate evaluation with `AND`/`OR` short-circuit.
    pub fn eval_predicate(&self, predicate: &Predicate, row: &Row, params: &[Value], cache: &PredicateCache) -> Result<bool, QueryError> {
        if cache.is_satisfied(predicate) {
            return Ok(true);
        }
        match predicate {
            Predicate::And(items) => {
                for item in items {
                    if !self.eval_predicate(item, row, params, cache)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(items) => {
                for item in items {
                    if self.eval_predicate(item, row, params, cache)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::BooleanEvaluator(b) => Ok(*b),
            Predicate::FieldEvaluator { op, left, right, negated } => {
                let l = self.eval_operand(left, row, params)?;
                let r = self.eval_operand(right, row, params)?;
                let result = self.compare(*op, &l, &r)?;
                Ok(result ^ negated)
            }
        }
    }

    pub fn eval_operand(&self, operand: &Operand, row: &Row, params: &[Value]) -> Result<Value, QueryError> {
        match operand {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::ReplaceableValue(idx) => params
                .get(*idx)
                .cloned()
                .ok_or_else(|| QueryError::Evaluation { message: format!("missing parameter at index {idx}") }),
            Operand::QueryField { resource, name, index } => {
                let value = row.get(resource.as_deref(), name);
                match (index, &value) {
                    (Some(i), Value::List(items)) => Ok(items.get(*i).cloned().unwrap_or(Value::Null)),
                    _ => Ok(value),
                }
            }
            Operand::QueryFunction { name, args } => {
                let values = args.iter().map(|a| self.eval_operand(a, row, params)).collect::<Result<Vec<_>, _>>()?;
                self.functions.call_scalar(name, &values)
            }
            Operand::SubQuery(_) => Err(QueryError::Evaluation { message: "subqueries are not evaluable as a scalar operand".into() }),
        }
    }

    fn compare(&self, op: FieldOperator, left: &Value, right: &Value) -> Result<bool, QueryError> {
        match op {
            FieldOperator::Equals => Ok(left == right),
            FieldOperator::Distinct => Ok(left != right),
            FieldOperator::GreaterThan => Ok(compare_values(left, right)? == Ordering::Greater),
            FieldOperator::GreaterThanOrEqual => Ok(compare_values(left, right)? != Ordering::Less),
            FieldOperator::SmallerThan => Ok(compare_values(left, right)? == Ordering::Less),
            FieldOperator::SmallerThanOrEqual => Ok(compare_values(left, right)? != Ordering::Greater),
            FieldOperator::In => Ok(as_list(right)?.contains(left)),
            FieldOperator::NotIn => Ok(!as_list(right)?.contains(left)),
            FieldOperator::Like => like_match(left, right),
        }
    }

    /// `Value` carries an `f64` arm so group keys can't be hashed; grouping instead does a
    /// linear scan against the keys seen so far, which is fine at the row volumes this engine
    /// targets.
    fn apply_grouping(&self, query: &Query, rows: Vec<Row>, params: &[Value]) -> Result<Vec<Group>, QueryError> {
        if query.group_list.is_empty() {
            return Ok(rows.into_iter().map(|row| Group { representative: row.clone(), members: vec![row] }).collect());
        }

        let mut groups: Vec<(Vec<Value>, Group)> = Vec::new();
        for row in rows {
            let key = query.group_list.iter().map(|expr| self.eval_operand(expr, &row, params)).collect::<Result<Vec<_>, _>>()?;
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.members.push(row),
                None => groups.push((key, Group { representative: row.clone(), members: vec![row] })),
            }
        }
        Ok(groups.into_iter().map(|(_, group)| group).collect())
    }

    fn apply_ordering(&self, query: &Query, mut groups: Vec<Group>, params: &[Value]) -> Result<Vec<Group>, QueryError> {
        if query.order_list.is_empty() {
            return Ok(groups);
        }
        let mut err = None;
        groups.sort_by(|a, b| {
            if err.is_some() {
                return Ordering::Equal;
            }
            for item in &query.order_list {
                let direction = item.direction;
                let av = match self.eval_operand(&item.expr, &a.representative, params) {
                    Ok(v) => v,
                    Err(e) => {
                        err = Some(e);
                        return Ordering::Equal;
                    }
                };
                let bv = match self.eval_operand(&item.expr, &b.representative, params) {
                    Ok(v) => v,
                    Err(e) => {
                        err = Some(e);
                        return Ordering::Equal;
                    }
                };
                let ord = match cmp_for_order(&av, &bv, direction) {
                    Ok(o) => o,
                    Err(e) => {
                        err = Some(e);
                        return Ordering::Equal;
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if let Some(e) = err {
            return Err(e);
        }
        Ok(groups)
    }

    fn apply_projection(&self, query: &Query, groups: Vec<Group>, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let has_aggregate = query.return_list.iter().any(|item| matches!(&item.expr, Operand::QueryFunction { name, .. } if self.functions.is_aggregate(name)));

        groups
            .into_iter()
            .map(|group| {
                if query.return_all && !has_aggregate {
                    return Ok(group.representative);
                }
                let mut projected = Row::new();
                for item in &query.return_list {
                    let label = item.alias.clone().unwrap_or_else(|| item.expr.to_string());
                    let value = match &item.expr {
                        Operand::QueryFunction { name, args } if self.functions.is_aggregate(name) => {
                            let column = match args.first() {
                                Some(arg) => group.members.iter().map(|row| self.eval_operand(arg, row, params)).collect::<Result<Vec<_>, _>>()?,
                                // bare `count()` / `count(*)`: one placeholder value per member row.
                                None => group.members.iter().map(|_| Value::Null).collect(),
                            };
                            self.functions.call_aggregate(name, &column)?
                        }
                        other => self.eval_operand(other, &group.representative, params)?,
                    };
                    projected.set(label, value);
                }
                Ok(projected)
            })
            .collect()
    }
}

fn apply_pagination(query: &Query, groups: Vec<Group>) -> Vec<Group> {
    let start = query.start.unwrap_or(0);
    let iter = groups.into_iter().skip(start);
    match query.limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

fn as_list(value: &Value) -> Result<&[Value], QueryError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(QueryError::Evaluation { message: format!("{other} is not a list") }),
    }
}

/// LIKE is a case-insensitive substring/prefix/suffix match depending on `%` placement
///.
fn like_match(left: &Value, right: &Value) -> Result<bool, QueryError> {
    let Value::String(haystack) = left else {
        return Err(QueryError::Evaluation { message: format!("LIKE against non-string operand {left}") });
    };
    let Value::String(pattern) = right else {
        return Err(QueryError::Evaluation { message: format!("LIKE pattern must be a string, got {right}") });
    };
    let haystack = haystack.to_lowercase();
    let pattern = pattern.to_lowercase();
    let starts = pattern.starts_with('%');
    let ends = pattern.ends_with('%');
    let core = pattern.trim_matches('%');
    Ok(match (starts, ends) {
        (true, true) => haystack.contains(core),
        (false, true) => haystack.starts_with(core),
        (true, false) => haystack.ends_with(core),
        (false, false) => haystack.contains(core),
    })
}

fn compare_values(a: &Value, b: &Value) -> Result<Ordering, QueryError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).ok_or_else(nan_error),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).ok_or_else(nan_error),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).ok_or_else(nan_error),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Null, Value::Null) => Ok(Ordering::Equal),
        _ => Err(QueryError::Evaluation { message: format!("{a} and {b} are not comparable") }),
    }
}

fn nan_error() -> QueryError {
    QueryError::Evaluation { message: "cannot compare NaN".into() }
}

/// Orders with nulls first regardless of direction.
fn cmp_for_order(a: &Value, b: &Value, direction: OrderDirection) -> Result<Ordering, QueryError> {
    match (a, b) {
        (Value::Null, Value::Null) => Ok(Ordering::Equal),
        (Value::Null, _) => Ok(Ordering::Less),
        (_, Value::Null) => Ok(Ordering::Greater),
        _ => {
            let ord = compare_values(a, b)?;
            Ok(if direction == OrderDirection::Desc { ord.reverse() } else { ord })
        }
    }
}

/// INNER is the default semantics for a bare `JOIN`.
pub(crate) fn effective_join_type(join_type: JoinType) -> JoinType {
    match join_type {
        JoinType::Join => JoinType::Inner,
        other => other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::{FieldOperator, Predicate};

    fn people_rows() -> Vec<Row> {
        vec![
            Row::from_fields("people", [("name".into(), Value::String("alice".into())), ("age".into(), Value::Int(30))]),
            Row::from_fields("people", [("name".into(), Value::String("bob".into())), ("age".into(), Value::Int(17))]),
            Row::from_fields("people", [("name".into(), Value::String("anna".into())), ("age".into(), Value::Int(22))]),
        ]
    }

    struct StaticSource(Vec<Row>);
    impl DataSource for StaticSource {
        fn fetch(&self, _resource: &str, _hint: &FetchHint) -> Result<Vec<Row>, QueryError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn like_wildcards_match_expected_positions() {
        let v = Value::String("alice".into());
        assert!(like_match(&v, &Value::String("a%".into())).unwrap());
        assert!(!like_match(&v, &Value::String("b%".into())).unwrap());
        assert!(like_match(&v, &Value::String("%ice".into())).unwrap());
        assert!(like_match(&v, &Value::String("%lic%".into())).unwrap());
    }

    #[test]
    fn filter_order_limit_matches_scenario_five() {
        let functions = FunctionRegistry::default();
        let evaluator = Evaluator::new(&functions);

        let mut query = Query::over("people");
        query.predicate = Predicate::And(vec![
            Predicate::compare(
                FieldOperator::GreaterThanOrEqual,
                Operand::QueryField { resource: Some("people".into()), name: "age".into(), index: None },
                Operand::Literal(Value::Int(18)),
            ),
            Predicate::compare(
                FieldOperator::Like,
                Operand::QueryField { resource: Some("people".into()), name: "name".into(), index: None },
                Operand::Literal(Value::String("a%".into())),
            ),
        ]);
        query.order_list =
            vec![crate::ast::OrderItem { expr: Operand::QueryField { resource: Some("people".into()), name: "age".into(), index: None }, direction: OrderDirection::Desc }];
        query.limit = Some(2);

        let rows = evaluator.evaluate(&query, &StaticSource(people_rows()), &[]).unwrap();
        let names: Vec<String> = rows.iter().map(|r| format!("{}", r.get(Some("people"), "name"))).collect();
        assert_eq!(names, vec!["'alice'".to_string(), "'anna'".to_string()]);
    }

    #[test]
    fn limit_zero_yields_empty_result() {
        let functions = FunctionRegistry::default();
        let evaluator = Evaluator::new(&functions);
        let mut query = Query::over("people");
        query.limit = Some(0);
        let rows = evaluator.evaluate(&query, &StaticSource(people_rows()), &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn start_beyond_size_yields_empty_result() {
        let functions = FunctionRegistry::default();
        let evaluator = Evaluator::new(&functions);
        let mut query = Query::over("people");
        query.start = Some(100);
        let rows = evaluator.evaluate(&query, &StaticSource(people_rows()), &[]).unwrap();
        assert!(rows.is_empty());
    }
}
