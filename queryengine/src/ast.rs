//! Query AST.
//!
//! Immutable once parsed, except resource-resolution of unqualified field names, which the
//! evaluator fills in on attach (see [`Query::resolve_unqualified`]).

use std::fmt;

use chrono::NaiveDate;

/// A literal value carried by an [`Operand::Literal`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(true) => write!(f, "TRUE"),
            Value::Bool(false) => write!(f, "FALSE"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::Date(d) => write!(f, "'{d}'"),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// An operand on either side of a [`FieldOperator`], or inside a return/group/order item.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// A `?` placeholder, resolved at execution time from a positional parameter list.
    ReplaceableValue(usize),
    SubQuery(Box<Query>),
    /// A field reference; `resource` is `None` until resolution fills in the owning resource
    /// for an unqualified name, and `index` is `Some` for an array-indexed field (`tags[0]`).
    QueryField { resource: Option<String>, name: String, index: Option<usize> },
    QueryFunction { name: String, args: Vec<Operand> },
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::ReplaceableValue(_) => write!(f, "?"),
            Operand::SubQuery(q) => write!(f, "({q})"),
            Operand::QueryField { resource, name, index } => {
                if let Some(r) = resource {
                    write!(f, "{r}.")?;
                }
                write!(f, "{name}")?;
                if let Some(i) = index {
                    write!(f, "[{i}]")?;
                }
                Ok(())
            }
            Operand::QueryFunction { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A return-list or group-list item with its optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Operand,
    pub alias: Option<String>,
}

impl fmt::Display for ReturnItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Operand,
    pub direction: OrderDirection,
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.direction == OrderDirection::Desc {
            write!(f, " DESC")?;
        }
        Ok(())
    }
}

/// Comparison operator of a [`Predicate::FieldEvaluator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperator {
    Equals,
    Distinct,
    GreaterThan,
    GreaterThanOrEqual,
    SmallerThan,
    SmallerThanOrEqual,
    In,
    NotIn,
    Like,
}

impl fmt::Display for FieldOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldOperator::Equals => "=",
            FieldOperator::Distinct => "!=",
            FieldOperator::GreaterThan => ">",
            FieldOperator::GreaterThanOrEqual => ">=",
            FieldOperator::SmallerThan => "<",
            FieldOperator::SmallerThanOrEqual => "<=",
            FieldOperator::In => "IN",
            FieldOperator::NotIn => "NOT IN",
            FieldOperator::Like => "LIKE",
        };
        f.write_str(s)
    }
}

/// A predicate-collection node.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// `negated` carries a unary `NOT` applied directly to this comparison, rather than the AST
    /// growing a separate `Not` variant.
    FieldEvaluator { op: FieldOperator, left: Operand, right: Operand, negated: bool },
    /// A constant `TRUE`/`FALSE`, including the result of folding a satisfied sub-predicate
    ///.
    BooleanEvaluator(bool),
}

impl Predicate {
    /// An always-true predicate, the identity element for `AND` and the default for a query
    /// with no WHERE clause.
    pub fn always_true() -> Self {
        Predicate::BooleanEvaluator(true)
    }

    pub fn compare(op: FieldOperator, left: Operand, right: Operand) -> Self {
        Predicate::FieldEvaluator { op, left, right, negated: false }
    }

    /// Negates this predicate, pushing the negation down via De Morgan's laws for `AND`/`OR` so
    /// only leaf comparisons and booleans ever carry the negation.
    pub fn negate(self) -> Predicate {
        match self {
            Predicate::And(items) => Predicate::Or(items.into_iter().map(Predicate::negate).collect()),
            Predicate::Or(items) => Predicate::And(items.into_iter().map(Predicate::negate).collect()),
            Predicate::BooleanEvaluator(b) => Predicate::BooleanEvaluator(!b),
            Predicate::FieldEvaluator { op, left, right, negated } => {
                Predicate::FieldEvaluator { op, left, right, negated: !negated }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(items) => join_predicates(f, items, "AND"),
            Predicate::Or(items) => join_predicates(f, items, "OR"),
            Predicate::FieldEvaluator { op, left, right, negated } => {
                if *negated {
                    write!(f, "NOT ")?;
                }
                write!(f, "{left} {op} {right}")
            }
            Predicate::BooleanEvaluator(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

fn join_predicates(f: &mut fmt::Formatter<'_>, items: &[Predicate], sep: &str) -> fmt::Result {
    for (i, p) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        match p {
            Predicate::And(_) | Predicate::Or(_) => write!(f, "({p})")?,
            _ => write!(f, "{p}")?,
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    /// Bare `JOIN`, equivalent to `INNER`.
    Join,
}

impl JoinType {
    /// `LEFT`/`RIGHT` emit unmatched rows from the outer side; `INNER`/`JOIN` drop them.
    pub fn is_outer(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Right)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Join => "JOIN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub resource: String,
    pub join_type: JoinType,
    pub left_field: Operand,
    pub right_field: Operand,
    /// Extra `AND`-ed predicates appearing in the `ON` clause beyond the join equality.
    pub extra: Predicate,
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ON {} = {}", self.join_type, self.resource, self.left_field, self.right_field)?;
        if self.extra != Predicate::always_true() {
            write!(f, " AND {}", self.extra)?;
        }
        Ok(())
    }
}

/// The root AST node for one `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub resource: String,
    pub return_list: Vec<ReturnItem>,
    pub group_list: Vec<Operand>,
    pub order_list: Vec<OrderItem>,
    pub joins: Vec<Join>,
    pub predicate: Predicate,
    pub limit: Option<usize>,
    pub start: Option<usize>,
    pub return_all: bool,
}

impl Query {
    /// A query over `resource` with no projection, joins, predicates, or pagination.
    pub fn over(resource: impl Into<String>) -> Self {
        Query {
            resource: resource.into(),
            return_list: Vec::new(),
            group_list: Vec::new(),
            order_list: Vec::new(),
            joins: Vec::new(),
            predicate: Predicate::always_true(),
            limit: None,
            start: None,
            return_all: true,
        }
    }

    /// Every resource name this query (including its joins) can reference.
    pub fn resource_names(&self) -> Vec<&str> {
        let mut names = vec![self.resource.as_str()];
        names.extend(self.joins.iter().map(|j| j.resource.as_str()));
        names
    }

    /// Fills in `resource` on every unqualified [`Operand::QueryField`] that names a field
    /// belonging to this query's base resource, per the §3 lifecycle note. Join fields are left
    /// alone; the evaluator resolves those against each join's own resource.
    pub fn resolve_unqualified(&mut self) {
        let base = self.resource.clone();
        resolve_predicate(&mut self.predicate, &base);
        for item in &mut self.return_list {
            resolve_operand(&mut item.expr, &base);
        }
        for item in &mut self.group_list {
            resolve_operand(item, &base);
        }
        for item in &mut self.order_list {
            resolve_operand(&mut item.expr, &base);
        }
    }
}

fn resolve_predicate(predicate: &mut Predicate, base: &str) {
    match predicate {
        Predicate::And(items) | Predicate::Or(items) => {
            for item in items {
                resolve_predicate(item, base);
            }
        }
        Predicate::FieldEvaluator { left, right, .. } => {
            resolve_operand(left, base);
            resolve_operand(right, base);
        }
        Predicate::BooleanEvaluator(_) => {}
    }
}

fn resolve_operand(operand: &mut Operand, base: &str) {
    match operand {
        Operand::QueryField { resource, .. } if resource.is_none() => {
            *resource = Some(base.to_string());
        }
        Operand::QueryFunction { args, .. } => {
            for arg in args {
                resolve_operand(arg, base);
            }
        }
        Operand::SubQuery(q) => q.resolve_unqualified(),
        _ => {}
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.return_all {
            write!(f, "*")?;
        } else {
            for (i, item) in self.return_list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
        }
        write!(f, " FROM {}", self.resource)?;
        for join in &self.joins {
            write!(f, " {join}")?;
        }
        if self.predicate != Predicate::always_true() {
            write!(f, " WHERE {}", self.predicate)?;
        }
        if !self.group_list.is_empty() {
            write!(f, " GROUP BY ")?;
            for (i, g) in self.group_list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{g}")?;
            }
        }
        if !self.order_list.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, o) in self.order_list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{o}")?;
            }
        }
        if let Some(start) = self.start {
            write!(f, " START {start}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}
