//! A toy in-memory `DataSource`: two fixed resources, `people` and `orders`, standing in for
//! whatever storage a real deployment would plug in.

use queryengine::{DataSource, FetchHint, QueryError, Row, Value};

pub struct MemoryStore {
    people: Vec<Row>,
    orders: Vec<Row>,
}

impl MemoryStore {
    pub fn seeded() -> Self {
        Self {
            people: vec![
                Row::from_fields("people", [("id".into(), Value::Int(1)), ("name".into(), Value::String("alice".into())), ("age".into(), Value::Int(30))]),
                Row::from_fields("people", [("id".into(), Value::Int(2)), ("name".into(), Value::String("bob".into())), ("age".into(), Value::Int(17))]),
                Row::from_fields("people", [("id".into(), Value::Int(3)), ("name".into(), Value::String("anna".into())), ("age".into(), Value::Int(22))]),
            ],
            orders: vec![
                Row::from_fields("orders", [("id".into(), Value::Int(1)), ("pid".into(), Value::Int(1)), ("total".into(), Value::Int(40))]),
                Row::from_fields("orders", [("id".into(), Value::Int(2)), ("pid".into(), Value::Int(1)), ("total".into(), Value::Int(10))]),
                Row::from_fields("orders", [("id".into(), Value::Int(3)), ("pid".into(), Value::Int(3)), ("total".into(), Value::Int(75))]),
            ],
        }
    }
}

impl DataSource for MemoryStore {
    fn fetch(&self, resource: &str, _hint: &FetchHint) -> Result<Vec<Row>, QueryError> {
        match resource {
            "people" => Ok(self.people.clone()),
            "orders" => Ok(self.orders.clone()),
            other => Err(QueryError::UnknownResource(other.to_string())),
        }
    }
}
