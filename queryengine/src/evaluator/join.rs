//! Join evaluation: walks a query's join list left to right, merging rows on each join's
//! equality condition plus any extra `ON`-clause predicate.

use super::{effective_join_type, DataSource, Evaluator, FetchHint, PredicateCache, Row};
use crate::{
    ast::{JoinType, Query, Value},
    error::QueryError,
};

pub(crate) fn evaluate_join(evaluator: &Evaluator, query: &Query, source: &dyn DataSource, params: &[Value]) -> Result<Vec<Row>, QueryError> {
    let base_hint = FetchHint { predicate: &query.predicate, limit: None };
    let mut rows = source.fetch(&query.resource, &base_hint)?;

    for join in &query.joins {
        let join_type = effective_join_type(join.join_type);
        let hint = FetchHint { predicate: &join.extra, limit: None };
        let other_rows = source.fetch(&join.resource, &hint)?;
        let cache = PredicateCache::default();

        let mut merged = Vec::new();
        let mut right_matched = vec![false; other_rows.len()];

        for left_row in &rows {
            let left_key = evaluator.eval_operand(&join.left_field, left_row, params)?;
            let mut any_match = false;
            for (i, right_row) in other_rows.iter().enumerate() {
                let right_key = evaluator.eval_operand(&join.right_field, right_row, params)?;
                if matches!(left_key, Value::Null) || matches!(right_key, Value::Null) || left_key != right_key {
                    continue;
                }
                let candidate = left_row.join(right_row);
                if !evaluator.eval_predicate(&join.extra, &candidate, params, &cache)? {
                    continue;
                }
                any_match = true;
                right_matched[i] = true;
                merged.push(candidate);
            }
            if !any_match && join_type == JoinType::Left {
                merged.push(left_row.clone());
            }
        }

        if join_type == JoinType::Right {
            for (i, right_row) in other_rows.iter().enumerate() {
                if !right_matched[i] {
                    merged.push(right_row.clone());
                }
            }
        }

        rows = merged;
    }

    Ok(rows)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ast::{FieldOperator, Join, Operand, Predicate},
        functions::FunctionRegistry,
    };

    fn people() -> Vec<Row> {
        vec![
            Row::from_fields("people", [("id".into(), Value::Int(1)), ("name".into(), Value::String("alice".into()))]),
            Row::from_fields("people", [("id".into(), Value::Int(2)), ("name".into(), Value::String("bob".into()))]),
        ]
    }

    fn orders() -> Vec<Row> {
        vec![
            Row::from_fields("orders", [("person_id".into(), Value::Int(1)), ("total".into(), Value::Int(40))]),
            Row::from_fields("orders", [("person_id".into(), Value::Int(1)), ("total".into(), Value::Int(10))]),
        ]
    }

    struct TwoTables;
    impl DataSource for TwoTables {
        fn fetch(&self, resource: &str, _hint: &FetchHint) -> Result<Vec<Row>, QueryError> {
            match resource {
                "people" => Ok(people()),
                "orders" => Ok(orders()),
                other => Err(QueryError::UnknownResource(other.to_string())),
            }
        }
    }

    fn people_orders_query(join_type: JoinType) -> Query {
        let mut query = Query::over("people");
        query.joins.push(Join {
            resource: "orders".into(),
            join_type,
            left_field: Operand::QueryField { resource: Some("people".into()), name: "id".into(), index: None },
            right_field: Operand::QueryField { resource: Some("orders".into()), name: "person_id".into(), index: None },
            extra: Predicate::always_true(),
        });
        query
    }

    #[test]
    fn inner_join_drops_people_with_no_orders() {
        let functions = FunctionRegistry::default();
        let evaluator = Evaluator::new(&functions);
        let query = people_orders_query(JoinType::Inner);

        let rows = evaluator.evaluate(&query, &TwoTables, &[]).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.get(Some("people"), "name"), Value::String("alice".into()));
        }
    }

    #[test]
    fn left_join_keeps_people_with_no_orders() {
        let functions = FunctionRegistry::default();
        let evaluator = Evaluator::new(&functions);
        let query = people_orders_query(JoinType::Left);

        let rows = evaluator.evaluate(&query, &TwoTables, &[]).unwrap();
        assert_eq!(rows.len(), 3);
        let bob_rows: Vec<_> = rows.iter().filter(|r| r.get(Some("people"), "name") == Value::String("bob".into())).collect();
        assert_eq!(bob_rows.len(), 1);
        assert_eq!(bob_rows[0].get(Some("orders"), "total"), Value::Null);
    }

    #[test]
    fn extra_on_clause_predicate_narrows_matches() {
        let functions = FunctionRegistry::default();
        let evaluator = Evaluator::new(&functions);
        let mut query = people_orders_query(JoinType::Inner);
        query.joins[0].extra = Predicate::compare(
            FieldOperator::GreaterThan,
            Operand::QueryField { resource: Some("orders".into()), name: "total".into(), index: None },
            Operand::Literal(Value::Int(20)),
        );

        let rows = evaluator.evaluate(&query, &TwoTables, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(Some("orders"), "total"), Value::Int(40));
    }
}
