//! Named scalar/aggregate function registry.
//!
//! `bson`/distributed-cache-backed helpers are external collaborators whose implementation is
//! explicitly out of scope (see DESIGN.md); only math, string, date, and collection/object
//! helpers are registered by default here.

pub mod aggregate;
pub mod scalar;

use std::collections::HashMap;

use crate::{ast::Value, error::QueryError};

pub type ScalarFn = Box<dyn Fn(&[Value]) -> Result<Value, QueryError> + Send + Sync>;
pub type AggregateFn = Box<dyn Fn(&[Value]) -> Result<Value, QueryError> + Send + Sync>;

/// Maps a function name to its implementation. Callers can register additional scalar/aggregate
/// functions before evaluating a query.
pub struct FunctionRegistry {
    scalars: HashMap<&'static str, ScalarFn>,
    aggregates: HashMap<&'static str, AggregateFn>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self { scalars: HashMap::new(), aggregates: HashMap::new() }
    }

    pub fn register_scalar(&mut self, name: &'static str, f: ScalarFn) {
        self.scalars.insert(name, f);
    }

    pub fn register_aggregate(&mut self, name: &'static str, f: AggregateFn) {
        self.aggregates.insert(name, f);
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains_key(name)
    }

    pub fn call_scalar(&self, name: &str, args: &[Value]) -> Result<Value, QueryError> {
        self.scalars.get(name).ok_or_else(|| QueryError::UnknownFunction(name.to_string()))?(args)
    }

    pub fn call_aggregate(&self, name: &str, values: &[Value]) -> Result<Value, QueryError> {
        self.aggregates.get(name).ok_or_else(|| QueryError::UnknownFunction(name.to_string()))?(values)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        scalar::register_defaults(&mut registry);
        aggregate::register_defaults(&mut registry);
        registry
    }
}
