//! Rule conditions for the JSON policy language
//!
//! A condition is `{"and": [..]}`, `{"or": [..]}`, `{"not": {..}}` or a map of
//! field paths to operator tests:
//!
//! ```json
//! { "request.amount": { "gte": 100, "lt": 1000 }, "tags": { "contains": "pii" } }
//! ```
//!
//! Paths are dotted; a segment may index an array as `items[0]` or `0`.

use crate::error::{PolicyError, PolicyResult};
use serde_json::Value;

/// Field operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

/// Parsed condition tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Matches everything
    Always,
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    /// Every test on every listed field must pass
    Fields(Vec<FieldTest>),
}

/// Operator test on one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTest {
    pub path: String,
    pub op: Op,
    pub rhs: Value,
}

impl Condition {
    /// Parse a `when` clause; `null` matches everything
    pub fn parse(value: &Value) -> PolicyResult<Self> {
        let map = match value {
            Value::Null => return Ok(Condition::Always),
            Value::Object(map) => map,
            other => {
                return Err(PolicyError::invalid(format!(
                    "condition must be an object, got {}",
                    other
                )))
            }
        };

        if let Some(items) = map.get("and") {
            return Ok(Condition::All(parse_list("and", items)?));
        }
        if let Some(items) = map.get("or") {
            return Ok(Condition::Any(parse_list("or", items)?));
        }
        if let Some(inner) = map.get("not") {
            if !inner.is_object() {
                return Err(PolicyError::invalid("'not' expects an object"));
            }
            return Ok(Condition::Not(Box::new(Condition::parse(inner)?)));
        }

        let mut tests = Vec::new();
        for (path, ops) in map {
            let ops = ops.as_object().ok_or_else(|| {
                PolicyError::invalid(format!("tests for field '{}' must be an object", path))
            })?;
            for (op, rhs) in ops {
                let op: Op = op.parse().map_err(|_| {
                    PolicyError::invalid(format!("unknown operator '{}' on field '{}'", op, path))
                })?;
                tests.push(FieldTest {
                    path: path.clone(),
                    op,
                    rhs: rhs.clone(),
                });
            }
        }
        Ok(Condition::Fields(tests))
    }

    /// Evaluate against an input document
    pub fn matches(&self, input: &Value) -> bool {
        match self {
            Condition::Always => true,
            Condition::All(items) => items.iter().all(|c| c.matches(input)),
            Condition::Any(items) => items.iter().any(|c| c.matches(input)),
            Condition::Not(inner) => !inner.matches(input),
            Condition::Fields(tests) => tests.iter().all(|t| t.matches(input)),
        }
    }
}

fn parse_list(key: &str, items: &Value) -> PolicyResult<Vec<Condition>> {
    items
        .as_array()
        .ok_or_else(|| PolicyError::invalid(format!("'{}' expects an array", key)))?
        .iter()
        .map(Condition::parse)
        .collect()
}

impl FieldTest {
    /// A missing field fails every operator, including `neq`
    pub fn matches(&self, input: &Value) -> bool {
        let Some(value) = pluck(input, &self.path) else {
            return false;
        };

        match self.op {
            Op::Eq => loose_string(value) == loose_string(&self.rhs),
            Op::Neq => loose_string(value) != loose_string(&self.rhs),
            Op::Gt => compare(value, &self.rhs).is_some_and(|o| o.is_gt()),
            Op::Gte => compare(value, &self.rhs).is_some_and(|o| o.is_ge()),
            Op::Lt => compare(value, &self.rhs).is_some_and(|o| o.is_lt()),
            Op::Lte => compare(value, &self.rhs).is_some_and(|o| o.is_le()),
            Op::In => match &self.rhs {
                Value::Array(items) => {
                    let needle = loose_string(value);
                    items.iter().any(|item| loose_string(item) == needle)
                }
                _ => false,
            },
            Op::Contains => match value {
                Value::Array(items) => {
                    let needle = loose_string(&self.rhs);
                    items.iter().any(|item| loose_string(item) == needle)
                }
                _ => loose_string(value).contains(&loose_string(&self.rhs)),
            },
        }
    }
}

/// Resolve a dotted path
pub fn pluck<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = input;

    for segment in path.split('.') {
        let (name, index) = parse_segment(segment);

        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        } else if index.is_none() {
            return None;
        }

        if let Some(index) = index {
            current = current.as_array()?.get(index)?;
        }
    }

    Some(current)
}

/// Split `name[3]` or `3` into name and index
///
/// An unparsable bracket keeps the name and drops the index.
fn parse_segment(segment: &str) -> (&str, Option<usize>) {
    if let Some(open) = segment.find('[') {
        if let Some(inner) = segment[open + 1..].strip_suffix(']') {
            return (&segment[..open], inner.trim().parse().ok());
        }
    }

    match segment.parse::<usize>() {
        Ok(index) => ("", Some(index)),
        Err(_) => (segment, None),
    }
}

/// String form used for equality and membership, so `1`, `1.0` and `"1"` agree
pub fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "<nil>".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    as_number(lhs)?.partial_cmp(&as_number(rhs)?)
}
