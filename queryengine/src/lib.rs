//! SQL-like query engine: parses query text into an AST, then evaluates it against a pluggable
//! row source.
//!
//! [`parser::parse`] turns query text into a [`ast::Query`]; [`evaluator::Evaluator`] runs that
//! AST against anything implementing [`evaluator::DataSource`]; [`functions::FunctionRegistry`]
//! supplies the scalar/aggregate functions `QueryFunction` operands call into.

pub mod ast;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;

pub use ast::{FieldOperator, Join, JoinType, Operand, OrderDirection, OrderItem, Predicate, Query, ReturnItem, Value};
pub use config::QueryConfig;
pub use error::{QueryError, QueryResult};
pub use evaluator::{DataSource, Evaluator, FetchHint, PredicateCache, Row};
pub use functions::FunctionRegistry;
pub use parser::parse;
