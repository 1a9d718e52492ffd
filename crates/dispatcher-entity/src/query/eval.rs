//! Rule evaluation against JSON entities.

use std::cmp::Ordering;

use serde_json::Value;

use super::rules::{FieldOperator, FieldRule, LogicOperator, Rule};

static NULL: Value = Value::Null;

/// Whether `entity` satisfies every rule. An empty list matches everything.
pub fn matches(entity: &Value, rules: &[Rule]) -> bool {
    rules.iter().all(|rule| rule.eval(entity))
}

impl Rule {
    /// Evaluate against one entity.
    pub fn eval(&self, entity: &Value) -> bool {
        match self {
            Self::Field(rule) => rule.eval(entity),
            Self::Logic { op, rules } => match op {
                LogicOperator::And => rules.iter().all(|r| r.eval(entity)),
                LogicOperator::Or => rules.iter().any(|r| r.eval(entity)),
                LogicOperator::Nor => !rules.iter().any(|r| r.eval(entity)),
            },
        }
    }
}

impl FieldRule {
    /// Evaluate against one entity.
    pub fn eval(&self, entity: &Value) -> bool {
        let actual = field_value(entity, &self.field);
        let expected = &self.value;
        match &self.op {
            FieldOperator::Eq => loose_eq(actual, expected),
            FieldOperator::Ne => !loose_eq(actual, expected),
            FieldOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
            FieldOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
            FieldOperator::Ge => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FieldOperator::Le => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FieldOperator::Match(regex) => actual.as_str().is_some_and(|s| regex.is_match(s)),
            FieldOperator::In => contains(expected, actual),
            FieldOperator::Nin => !contains(expected, actual),
        }
    }
}

/// Value of `field` in `entity`, or `null` when absent.
///
/// An exact key wins; otherwise a dotted name walks nested objects (and
/// array indices).
pub fn field_value<'a>(entity: &'a Value, field: &str) -> &'a Value {
    if let Some(v) = entity.get(field) {
        return v;
    }
    if !field.contains('.') {
        return &NULL;
    }
    let mut current = entity;
    for segment in field.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return &NULL,
        }
    }
    current
}

/// Equality with numbers compared by value, so `1` equals `1.0`.
#[allow(clippy::float_cmp)]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        _ => a == b,
    }
}

/// Ordering for `<`, `>`, `<=`, `>=`. `None` for incomparable types.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn contains(list: &Value, item: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|v| loose_eq(v, item)))
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting: by type (null < bool < number < string <
/// array < object), then by value within a type. Objects tie.
pub fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| sort_cmp(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| xs.len().cmp(&ys.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
