//! Parses query text and evaluates it against an in-memory `DataSource`, end to end.

use queryengine::{config::QueryConfig, parser, DataSource, Evaluator, FetchHint, FunctionRegistry, Query, QueryError, Row, Value};

struct InMemory {
    people: Vec<Row>,
    orders: Vec<Row>,
}

impl DataSource for InMemory {
    fn fetch(&self, resource: &str, _hint: &FetchHint) -> Result<Vec<Row>, QueryError> {
        match resource {
            "people" => Ok(self.people.clone()),
            "orders" => Ok(self.orders.clone()),
            other => Err(QueryError::UnknownResource(other.to_string())),
        }
    }
}

fn fixture() -> InMemory {
    InMemory {
        people: vec![
            Row::from_fields("people", [("id".into(), Value::Int(1)), ("name".into(), Value::String("alice".into())), ("age".into(), Value::Int(30))]),
            Row::from_fields("people", [("id".into(), Value::Int(2)), ("name".into(), Value::String("bob".into())), ("age".into(), Value::Int(17))]),
            Row::from_fields("people", [("id".into(), Value::Int(3)), ("name".into(), Value::String("anna".into())), ("age".into(), Value::Int(22))]),
        ],
        orders: vec![
            Row::from_fields("orders", [("id".into(), Value::Int(1)), ("pid".into(), Value::Int(1)), ("total".into(), Value::Int(40))]),
            Row::from_fields("orders", [("id".into(), Value::Int(2)), ("pid".into(), Value::Int(1)), ("total".into(), Value::Int(10))]),
        ],
    }
}

#[test]
fn filter_order_limit_end_to_end() {
    let config = QueryConfig::default();
    let query = parser::parse("SELECT * FROM people WHERE age >= 18 AND name LIKE 'a%' ORDER BY age DESC LIMIT 2", &config).expect("parse");

    let functions = FunctionRegistry::default();
    let evaluator = Evaluator::new(&functions);
    let rows = evaluator.evaluate(&query, &fixture(), &[]).expect("evaluate");

    let names: Vec<Value> = rows.iter().map(|r| r.get(Some("people"), "name")).collect();
    assert_eq!(names, vec![Value::String("alice".into()), Value::String("anna".into())]);
}

#[test]
fn inner_join_with_aliases_end_to_end() {
    let config = QueryConfig::default();
    let query = parser::parse("SELECT o.total FROM people p INNER JOIN orders o ON p.id = o.pid WHERE o.total > 20", &config).expect("parse");

    let functions = FunctionRegistry::default();
    let evaluator = Evaluator::new(&functions);
    let rows = evaluator.evaluate(&query, &fixture(), &[]).expect("evaluate");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(None, "total"), Value::Int(40));
}

#[test]
fn parse_then_display_then_parse_round_trips() {
    let config = QueryConfig::default();
    let text = "SELECT name, age FROM people WHERE age > 18 ORDER BY age ASC LIMIT 5";
    let first = parser::parse(text, &config).expect("first parse");
    let rendered = first.to_string();
    let second = parser::parse(&rendered, &config).expect("second parse");
    assert_eq!(first, second);
}

#[test]
fn unknown_resource_surfaces_as_an_evaluation_error() {
    let config = QueryConfig::default();
    let query: Query = parser::parse("SELECT * FROM ghosts", &config).expect("parse");

    let functions = FunctionRegistry::default();
    let evaluator = Evaluator::new(&functions);
    let err = evaluator.evaluate(&query, &fixture(), &[]).unwrap_err();
    assert!(matches!(err, QueryError::UnknownResource(resource) if resource == "ghosts"));
}
