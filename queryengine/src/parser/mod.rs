//! Textual query parser: SELECT statement text → [`Query`] AST.

pub mod cursor;

use std::{collections::HashMap, sync::OnceLock};

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::{
    ast::{FieldOperator, Join, JoinType, Operand, OrderDirection, OrderItem, Predicate, Query, ReturnItem, Value},
    config::QueryConfig,
    error::QueryError,
    parser::cursor::Cursor,
};

/// Parses one `SELECT` statement.
pub fn parse(input: &str, config: &QueryConfig) -> Result<Query, QueryError> {
    let mut texts = Vec::new();
    let rich_text_masked = mask_rich_text(input, &mut texts);
    let mut groups = Vec::new();
    let masked = mask_groups(&rich_text_masked, &mut groups);

    let mut ctx = ParseContext { texts, groups, config, aliases: HashMap::new(), param_index: 0 };
    let query = ctx.parse_select(masked.trim())?;
    debug!(resource = %query.resource, predicates = count_predicates(&query.predicate), "parsed query");
    Ok(query)
}

/// Counts leaf comparisons in a predicate tree, for logging query shape without the whole AST.
fn count_predicates(predicate: &Predicate) -> usize {
    match predicate {
        Predicate::And(items) | Predicate::Or(items) => items.iter().map(count_predicates).sum(),
        Predicate::FieldEvaluator { .. } => 1,
        Predicate::BooleanEvaluator(_) => 0,
    }
}

struct ParseContext<'a> {
    texts: Vec<String>,
    groups: Vec<String>,
    config: &'a QueryConfig,
    aliases: HashMap<String, String>,
    param_index: usize,
}

fn parse_err(fragment: &str) -> QueryError {
    QueryError::Parse { fragment: fragment.to_string() }
}

/// Consumes and returns the cursor's next character, shrinking its buffer so later calls to
/// [`Cursor::take_until`]/[`Cursor::slice`] see only what remains.
fn consume_char(cursor: &mut Cursor) -> Option<char> {
    let c = cursor.next()?;
    cursor.slice();
    Some(c)
}

/// Step 1: pull single-quoted regions out into `$RT<n>$` tokens, honoring `\'` as a literal
/// quote character inside the region.
fn mask_rich_text(input: &str, texts: &mut Vec<String>) -> String {
    let mut cursor = Cursor::new(input);
    let mut output = String::new();
    loop {
        if let Some(chunk) = cursor.take_until(|c| c == '\'') {
            output.push_str(chunk);
        }
        if consume_char(&mut cursor) != Some('\'') {
            break;
        }
        let mut content = String::new();
        loop {
            match consume_char(&mut cursor) {
                None => break,
                Some('\\') if cursor.peek() == Some('\'') => {
                    consume_char(&mut cursor);
                    content.push('\'');
                }
                Some('\'') => break,
                Some(c) => content.push(c),
            }
        }
        let idx = texts.len();
        texts.push(content);
        output.push_str(&format!("$RT{idx}$"));
    }
    output
}

/// Step 2: replace every parenthesized group with a `$G<n>$` token, innermost first, by
/// tracking paren depth as the cursor walks each top-level group's contents.
fn mask_groups(input: &str, groups: &mut Vec<String>) -> String {
    let mut cursor = Cursor::new(input);
    let mut output = String::new();
    loop {
        if let Some(chunk) = cursor.take_until(|c| c == '(') {
            output.push_str(chunk);
        }
        if consume_char(&mut cursor) != Some('(') {
            break;
        }
        let mut depth = 1;
        let mut inner = String::new();
        loop {
            match consume_char(&mut cursor) {
                None => break,
                Some('(') => {
                    depth += 1;
                    inner.push('(');
                }
                Some(')') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    inner.push(')');
                }
                Some(c) => inner.push(c),
            }
        }
        let masked_inner = mask_groups(&inner, groups);
        let idx = groups.len();
        groups.push(masked_inner);
        output.push_str(&format!("$G{idx}$"));
    }
    output
}

fn select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^SELECT\s+(.+?)\s+FROM\s+(.+)$").unwrap())
}

const TAIL_KEYWORDS: [&str; 6] = ["INNER", "LEFT", "RIGHT", "JOIN", "WHERE", "LIMIT"];

fn is_tail_keyword(word: &str) -> bool {
    TAIL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word)) || word.eq_ignore_ascii_case("GROUP") || word.eq_ignore_ascii_case("ORDER") || word.eq_ignore_ascii_case("START")
}

/// Splits `resource [alias] <rest>` into its parts; `alias` is absent if the next word is
/// itself a tail keyword.
fn split_resource_alias(rest: &str) -> (String, Option<String>, String) {
    let rest = rest.trim_start();
    let resource_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let resource = rest[..resource_end].to_string();
    let remainder = rest[resource_end..].trim_start();
    if remainder.is_empty() {
        return (resource, None, String::new());
    }
    let next_end = remainder.find(char::is_whitespace).unwrap_or(remainder.len());
    let next_word = &remainder[..next_end];
    if is_tail_keyword(next_word) {
        (resource, None, remainder.to_string())
    } else {
        (resource, Some(next_word.to_string()), remainder[next_end..].trim_start().to_string())
    }
}

fn parse_resource_alias(text: &str) -> (String, Option<String>) {
    let text = text.trim();
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    let resource = text[..end].to_string();
    let alias = text[end..].trim();
    if alias.is_empty() {
        (resource, None)
    } else {
        (resource, Some(alias.to_string()))
    }
}

fn tail_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(INNER\s+JOIN|LEFT\s+JOIN|RIGHT\s+JOIN|JOIN|WHERE|GROUP\s+BY|ORDER\s+BY|LIMIT|START)\b").unwrap())
}

/// Step 4: splits the conditional tail into `(keyword, segment)` pairs, preserving order.
fn split_tail(tail: &str) -> Vec<(String, String)> {
    let re = tail_keyword_regex();
    let matches: Vec<_> = re.find_iter(tail).collect();
    let mut segments = Vec::new();
    for (i, m) in matches.iter().enumerate() {
        let seg_start = m.end();
        let seg_end = matches.get(i + 1).map(|n| n.start()).unwrap_or(tail.len());
        let keyword = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        segments.push((keyword, tail[seg_start..seg_end].trim().to_string()));
    }
    segments
}

fn split_on_keyword<'t>(segment: &'t str, re: &Regex) -> Result<(&'t str, &'t str), QueryError> {
    let m = re.find(segment).ok_or_else(|| parse_err(segment))?;
    Ok((segment[..m.start()].trim(), segment[m.end()..].trim()))
}

fn on_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bON\b").unwrap())
}

fn and_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bAND\b").unwrap())
}

fn or_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bOR\b").unwrap())
}

fn as_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bAS\b").unwrap())
}

fn desc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bDESC\b\s*$").unwrap())
}

fn asc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bASC\b\s*$").unwrap())
}

fn operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(!=|<>|>=|<=|\bNOT\s+IN\b|\bLIKE\b|\bIN\b|=|>|<)").unwrap())
}

fn rich_text_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$RT(\d+)\$$").unwrap())
}

fn group_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$G(\d+)\$$").unwrap())
}

fn function_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\$G(\d+)\$$").unwrap())
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:([A-Za-z_][A-Za-z0-9_]*)\.)?([A-Za-z_][A-Za-z0-9_]*)(?:\[(\d+)\])?$").unwrap())
}

fn integer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+$").unwrap())
}

fn decimal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+\.\d+$").unwrap())
}

fn scientific_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+(?:\.\d+)?[eE][+-]?\d+$").unwrap())
}

fn normalize_operator(raw: &str) -> FieldOperator {
    let collapsed = raw.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.as_str() {
        "!=" | "<>" => FieldOperator::Distinct,
        ">=" => FieldOperator::GreaterThanOrEqual,
        "<=" => FieldOperator::SmallerThanOrEqual,
        "NOT IN" => FieldOperator::NotIn,
        "LIKE" => FieldOperator::Like,
        "IN" => FieldOperator::In,
        "=" => FieldOperator::Equals,
        ">" => FieldOperator::GreaterThan,
        "<" => FieldOperator::SmallerThan,
        other => unreachable!("operator_regex produced unexpected token {other}"),
    }
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(',').map(|s| s.trim()).collect()
}

fn split_as_alias(text: &str) -> (&str, Option<String>) {
    match as_regex().find(text) {
        Some(m) => (text[..m.start()].trim(), Some(text[m.end()..].trim().to_string())),
        None => (text.trim(), None),
    }
}

fn split_trailing_direction(text: &str, default_desc: bool) -> (&str, OrderDirection) {
    if let Some(m) = desc_regex().find(text) {
        return (text[..m.start()].trim(), OrderDirection::Desc);
    }
    if let Some(m) = asc_regex().find(text) {
        return (text[..m.start()].trim(), OrderDirection::Asc);
    }
    (text.trim(), if default_desc { OrderDirection::Desc } else { OrderDirection::Asc })
}

/// A binary `+ - * /` expression's operator position, or `None`. Only the first top-level
/// operator is recognized (no operator precedence/chaining beyond one application), matching
/// the simple arithmetic forms this query language's examples use.
fn find_math_operator(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if i == 0 {
            continue;
        }
        if matches!(*b as char, '+' | '-' | '*' | '/') {
            return Some(i);
        }
    }
    None
}

impl<'a> ParseContext<'a> {
    fn parse_select(&mut self, masked: &str) -> Result<Query, QueryError> {
        let caps = select_regex().captures(masked.trim()).ok_or_else(|| parse_err(masked))?;
        let select_list = caps.get(1).unwrap().as_str().to_string();
        let rest = caps.get(2).unwrap().as_str().to_string();

        let (resource, alias, tail) = split_resource_alias(&rest);
        if let Some(alias) = &alias {
            self.aliases.insert(alias.clone(), resource.clone());
        }
        // The return list can reference a join's alias before that join's own clause is reached
        // textually (`SELECT o.total FROM person p JOIN orders o ON ...`), so every join alias is
        // registered up front rather than as parse_tail walks into each JOIN segment.
        self.preregister_join_aliases(&tail)?;

        let mut query = Query::over(resource);
        self.parse_select_list(&select_list, &mut query)?;
        self.parse_tail(&tail, &mut query)?;
        query.resolve_unqualified();
        Ok(query)
    }

    fn preregister_join_aliases(&mut self, tail: &str) -> Result<(), QueryError> {
        for (keyword, segment) in split_tail(tail) {
            if matches!(keyword.as_str(), "JOIN" | "INNER JOIN" | "LEFT JOIN" | "RIGHT JOIN") {
                let (before, _) = split_on_keyword(&segment, on_regex())?;
                let (resource, alias) = parse_resource_alias(before);
                if let Some(alias) = alias {
                    self.aliases.insert(alias, resource);
                }
            }
        }
        Ok(())
    }

    fn parse_select_list(&mut self, text: &str, query: &mut Query) -> Result<(), QueryError> {
        let items = split_top_level_commas(text);
        if items.len() == 1 && items[0] == "*" {
            query.return_all = true;
            return Ok(());
        }
        query.return_all = false;
        for item in items {
            let (expr_text, alias) = split_as_alias(item);
            let expr = self.parse_operand(expr_text)?;
            query.return_list.push(ReturnItem { expr, alias });
        }
        Ok(())
    }

    fn parse_tail(&mut self, tail: &str, query: &mut Query) -> Result<(), QueryError> {
        for (keyword, segment) in split_tail(tail) {
            match keyword.as_str() {
                "WHERE" => query.predicate = self.parse_predicate(&segment)?,
                "GROUP BY" => self.parse_group_list(&segment, query)?,
                "ORDER BY" => self.parse_order_list(&segment, query)?,
                "LIMIT" => query.limit = Some(segment.trim().parse().map_err(|_| parse_err(&segment))?),
                "START" => query.start = Some(segment.trim().parse().map_err(|_| parse_err(&segment))?),
                "JOIN" | "INNER JOIN" | "LEFT JOIN" | "RIGHT JOIN" => {
                    let join_type = match keyword.as_str() {
                        "INNER JOIN" => JoinType::Inner,
                        "LEFT JOIN" => JoinType::Left,
                        "RIGHT JOIN" => JoinType::Right,
                        _ => JoinType::Join,
                    };
                    self.parse_join(join_type, &segment, query)?;
                }
                other => return Err(parse_err(other)),
            }
        }
        Ok(())
    }

    fn parse_join(&mut self, join_type: JoinType, segment: &str, query: &mut Query) -> Result<(), QueryError> {
        let (before, after) = split_on_keyword(segment, on_regex())?;
        let (resource, alias) = parse_resource_alias(before);
        if let Some(alias) = &alias {
            self.aliases.insert(alias.clone(), resource.clone());
        }
        let (left_field, right_field, extra) = self.parse_join_condition(after)?;
        query.joins.push(Join { resource, join_type, left_field, right_field, extra });
        Ok(())
    }

    fn parse_join_condition(&mut self, text: &str) -> Result<(Operand, Operand, Predicate), QueryError> {
        let parts: Vec<&str> = and_regex().split(text).map(|s| s.trim()).collect();
        let (first, rest) = parts.split_first().ok_or_else(|| parse_err(text))?;
        let eq = first.find('=').ok_or_else(|| parse_err(first))?;
        let left = self.parse_operand(first[..eq].trim())?;
        let right = self.parse_operand(first[eq + 1..].trim())?;
        let extra = if rest.is_empty() { Predicate::always_true() } else { self.parse_and_chain(&rest.join(" AND "))? };
        Ok((left, right, extra))
    }

    fn parse_group_list(&mut self, text: &str, query: &mut Query) -> Result<(), QueryError> {
        for item in split_top_level_commas(text) {
            query.group_list.push(self.parse_operand(item)?);
        }
        Ok(())
    }

    fn parse_order_list(&mut self, text: &str, query: &mut Query) -> Result<(), QueryError> {
        for item in split_top_level_commas(text) {
            let (expr_text, direction) = split_trailing_direction(item, self.config.default_desc_order);
            let expr = self.parse_operand(expr_text)?;
            query.order_list.push(OrderItem { expr, direction });
        }
        Ok(())
    }

    fn parse_predicate(&mut self, text: &str) -> Result<Predicate, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Predicate::always_true());
        }
        let or_parts: Vec<&str> = or_regex().split(text).map(|s| s.trim()).collect();
        if or_parts.len() > 1 {
            let preds = or_parts.iter().map(|p| self.parse_and_chain(p)).collect::<Result<Vec<_>, _>>()?;
            return Ok(Predicate::Or(preds));
        }
        self.parse_and_chain(text)
    }

    fn parse_and_chain(&mut self, text: &str) -> Result<Predicate, QueryError> {
        let and_parts: Vec<&str> = and_regex().split(text).map(|s| s.trim()).collect();
        if and_parts.len() > 1 {
            let preds = and_parts.iter().map(|p| self.parse_comparison(p)).collect::<Result<Vec<_>, _>>()?;
            return Ok(Predicate::And(preds));
        }
        self.parse_comparison(text)
    }

    fn parse_comparison(&mut self, text: &str) -> Result<Predicate, QueryError> {
        let mut text = text.trim();
        let mut negated = false;
        // A leading unary NOT, distinct from the two-word "NOT IN" operator the regex below
        // already recognizes as a single token.
        if text.len() > 4 && text[..4].eq_ignore_ascii_case("NOT ") {
            let after = text[4..].trim_start();
            let starts_with_in = after.len() >= 2 && after[..2].eq_ignore_ascii_case("IN");
            if !starts_with_in {
                negated = true;
                text = after;
            }
        }
        let m = operator_regex().find(text).ok_or_else(|| parse_err(text))?;
        let op = normalize_operator(m.as_str());
        let left = self.parse_operand(text[..m.start()].trim())?;
        let right = self.parse_operand(text[m.end()..].trim())?;
        Ok(Predicate::FieldEvaluator { op, left, right, negated })
    }

    fn parse_operand(&mut self, raw: &str) -> Result<Operand, QueryError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(parse_err(raw));
        }
        if text == "?" {
            let idx = self.param_index;
            self.param_index += 1;
            return Ok(Operand::ReplaceableValue(idx));
        }
        if text.eq_ignore_ascii_case("NULL") {
            return Ok(Operand::Literal(Value::Null));
        }
        if text.eq_ignore_ascii_case("TRUE") {
            return Ok(Operand::Literal(Value::Bool(true)));
        }
        if text.eq_ignore_ascii_case("FALSE") {
            return Ok(Operand::Literal(Value::Bool(false)));
        }
        if let Some(caps) = rich_text_token_regex().captures(text) {
            let idx: usize = caps[1].parse().unwrap();
            let raw_str = self.texts.get(idx).cloned().ok_or_else(|| parse_err(text))?;
            if let Ok(date) = NaiveDate::parse_from_str(&raw_str, &self.config.date_format) {
                return Ok(Operand::Literal(Value::Date(date)));
            }
            return Ok(Operand::Literal(Value::String(raw_str)));
        }
        if let Some(caps) = group_token_regex().captures(text) {
            let idx: usize = caps[1].parse().unwrap();
            let inner = self.groups.get(idx).cloned().ok_or_else(|| parse_err(text))?;
            if inner.trim_start().to_uppercase().starts_with("SELECT") {
                let saved_aliases = std::mem::take(&mut self.aliases);
                let result = self.parse_select(&inner);
                self.aliases = saved_aliases;
                return Ok(Operand::SubQuery(Box::new(result?)));
            }
            let values = split_top_level_commas(&inner)
                .iter()
                .map(|item| match self.parse_operand(item)? {
                    Operand::Literal(v) => Ok(v),
                    other => Err(parse_err(&other.to_string())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Operand::Literal(Value::List(values)));
        }
        if uuid::Uuid::parse_str(text).is_ok() {
            return Ok(Operand::Literal(Value::String(text.to_string())));
        }
        if integer_regex().is_match(text) {
            return Ok(Operand::Literal(Value::Int(text.parse().map_err(|_| parse_err(text))?)));
        }
        if decimal_regex().is_match(text) || scientific_regex().is_match(text) {
            return Ok(Operand::Literal(Value::Float(text.parse().map_err(|_| parse_err(text))?)));
        }
        if let Some(pos) = find_math_operator(text) {
            let op = &text[pos..pos + 1];
            let left = self.parse_operand(&text[..pos])?;
            let right = self.parse_operand(&text[pos + 1..])?;
            return Ok(Operand::QueryFunction { name: "mathEval".to_string(), args: vec![left, Operand::Literal(Value::String(op.to_string())), right] });
        }
        if let Some(caps) = function_call_regex().captures(text) {
            let name = caps[1].to_string();
            let idx: usize = caps[2].parse().unwrap();
            let inner = self.groups.get(idx).cloned().ok_or_else(|| parse_err(text))?;
            let args = split_top_level_commas(&inner).iter().map(|a| self.parse_operand(a)).collect::<Result<Vec<_>, _>>()?;
            return Ok(Operand::QueryFunction { name, args });
        }
        self.parse_field(text)
    }

    fn parse_field(&self, text: &str) -> Result<Operand, QueryError> {
        let caps = field_regex().captures(text).ok_or_else(|| parse_err(text))?;
        let resource = caps.get(1).map(|m| {
            let alias = m.as_str();
            self.aliases.get(alias).cloned().unwrap_or_else(|| alias.to_string())
        });
        let name = caps[2].to_string();
        let index = caps.get(3).map(|m| m.as_str().parse().unwrap());
        Ok(Operand::QueryField { resource, name, index })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg() -> QueryConfig {
        QueryConfig::default()
    }

    #[test]
    fn parses_scenario_five_into_the_expected_shape() {
        let q = parse("SELECT name, age*2 AS d FROM people WHERE age >= 18 AND name LIKE 'a%' ORDER BY age DESC LIMIT 2", &cfg()).unwrap();
        assert_eq!(q.resource, "people");
        assert!(!q.return_all);
        assert_eq!(q.return_list.len(), 2);
        assert_eq!(q.return_list[1].alias.as_deref(), Some("d"));
        assert_eq!(q.limit, Some(2));
        assert_eq!(q.order_list[0].direction, OrderDirection::Desc);
        match &q.predicate {
            Predicate::And(items) => assert_eq!(items.len(), 2),
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn parses_scenario_six_join_with_aliases() {
        let q = parse("SELECT p.name, o.total FROM person p INNER JOIN orders o ON p.id=o.pid WHERE o.total > 100", &cfg()).unwrap();
        assert_eq!(q.resource, "person");
        assert_eq!(q.joins.len(), 1);
        assert_eq!(q.joins[0].resource, "orders");
        assert_eq!(q.joins[0].join_type, JoinType::Inner);
        match &q.joins[0].left_field {
            Operand::QueryField { resource, name, .. } => {
                assert_eq!(resource.as_deref(), Some("person"));
                assert_eq!(name, "id");
            }
            other => panic!("expected QueryField, got {other:?}"),
        }
    }

    #[test]
    fn star_select_sets_return_all() {
        let q = parse("SELECT * FROM people", &cfg()).unwrap();
        assert!(q.return_all);
    }

    #[test]
    fn literal_collection_and_in_operator_round_trip() {
        let q = parse("SELECT * FROM people WHERE age IN (18, 21, 30)", &cfg()).unwrap();
        match &q.predicate {
            Predicate::FieldEvaluator { op: FieldOperator::In, right: Operand::Literal(Value::List(items)), .. } => {
                assert_eq!(items.len(), 3);
            }
            other => panic!("expected IN over a literal list, got {other:?}"),
        }
    }

    #[test]
    fn not_in_is_recognized_as_its_own_operator() {
        let q = parse("SELECT * FROM people WHERE age NOT IN (1, 2)", &cfg()).unwrap();
        match &q.predicate {
            Predicate::FieldEvaluator { op: FieldOperator::NotIn, negated: false, .. } => {}
            other => panic!("expected un-negated NotIn, got {other:?}"),
        }
    }

    #[test]
    fn unary_not_negates_the_leaf_comparison() {
        let q = parse("SELECT * FROM people WHERE NOT age = 18", &cfg()).unwrap();
        match &q.predicate {
            Predicate::FieldEvaluator { op: FieldOperator::Equals, negated: true, .. } => {}
            other => panic!("expected negated Equals, got {other:?}"),
        }
    }

    #[test]
    fn subquery_group_token_parses_recursively() {
        let q = parse("SELECT * FROM people WHERE id IN (SELECT id FROM banned)", &cfg()).unwrap();
        match &q.predicate {
            Predicate::FieldEvaluator { right: Operand::SubQuery(sub), .. } => {
                assert_eq!(sub.resource, "banned");
            }
            other => panic!("expected a subquery operand, got {other:?}"),
        }
    }

    #[test]
    fn query_round_trips_through_display_and_parse() {
        let original = parse("SELECT name FROM people WHERE age > 10 ORDER BY name LIMIT 5", &cfg()).unwrap();
        let rendered = original.to_string();
        let reparsed = parse(&rendered, &cfg()).unwrap();
        assert_eq!(original, reparsed);
    }
}
