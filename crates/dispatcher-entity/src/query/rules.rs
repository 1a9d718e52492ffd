//! Query rule parsing.
//!
//! Rules arrive as JSON tuples:
//!
//! - field rule: `[field, operator, literal]` or
//!   `[field, operator, literal, conversion]`
//! - logic rule: `[and|or|nor, [rule, ...]]`
//!
//! Parsing validates operators, compiles `~` patterns and applies literal
//! conversions once, so evaluation never fails.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Value, json};

use crate::errors::{QueryError, Result};

/// Comparison applied by a field rule.
#[derive(Clone, Debug)]
pub enum FieldOperator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `~`: string field matches the pattern anywhere.
    Match(Regex),
    /// `in`: field equals one of the listed values.
    In,
    /// `nin`: field equals none of the listed values.
    Nin,
}

impl FieldOperator {
    /// Operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Match(_) => "~",
            Self::In => "in",
            Self::Nin => "nin",
        }
    }
}

/// Combinator applied by a logic rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicOperator {
    /// All sub-rules hold.
    And,
    /// At least one sub-rule holds.
    Or,
    /// No sub-rule holds.
    Nor,
}

impl LogicOperator {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "nor" => Some(Self::Nor),
            _ => None,
        }
    }
}

/// Transformation applied to a literal before comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conversion {
    /// Date/time string to seconds since the epoch.
    Timestamp,
}

impl Conversion {
    /// Parse a conversion name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "timestamp" => Ok(Self::Timestamp),
            other => Err(QueryError::UnknownConversion(other.to_owned())),
        }
    }

    /// Conversion name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
        }
    }

    /// Convert a literal. Arrays convert element-wise.
    pub fn apply(self, value: &Value) -> Result<Value> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|v| self.apply(v))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => match self {
                Self::Timestamp => parse_timestamp(s).ok_or_else(|| self.failed(value)),
            },
            _ => Err(self.failed(value)),
        }
    }

    fn failed(self, value: &Value) -> QueryError {
        QueryError::Conversion {
            value: value.to_string(),
            conversion: self.as_str(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn parse_timestamp(s: &str) -> Option<Value> {
    let millis = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.timestamp_millis()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        dt.and_utc().timestamp_millis()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        dt.and_utc().timestamp_millis()
    } else {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?
            .and_utc()
            .timestamp_millis()
    };
    if millis % 1000 == 0 {
        Some(json!(millis / 1000))
    } else {
        Some(json!(millis as f64 / 1000.0))
    }
}

/// A field comparison.
#[derive(Clone, Debug)]
pub struct FieldRule {
    /// Field name; dotted names reach into nested objects.
    pub field: String,
    /// Comparison.
    pub op: FieldOperator,
    /// Literal, already converted.
    pub value: Value,
}

/// A parsed predicate.
#[derive(Clone, Debug)]
pub enum Rule {
    /// Compare one field.
    Field(FieldRule),
    /// Combine sub-rules.
    Logic {
        /// Combinator.
        op: LogicOperator,
        /// Sub-rules.
        rules: Vec<Rule>,
    },
}

impl Rule {
    /// Field rule with an already-converted literal.
    pub fn field(field: impl Into<String>, op: FieldOperator, value: Value) -> Self {
        Self::Field(FieldRule {
            field: field.into(),
            op,
            value,
        })
    }

    /// Parse one rule tuple.
    pub fn parse(raw: &Value) -> Result<Self> {
        let Some(tuple) = raw.as_array() else {
            return Err(malformed(raw, "expected an array"));
        };
        match tuple.as_slice() {
            [op, rules] => parse_logic(raw, op, rules),
            [field, op, literal] => parse_field(raw, field, op, literal, None),
            [field, op, literal, conversion] => {
                parse_field(raw, field, op, literal, Some(conversion))
            }
            _ => Err(malformed(raw, "expected 2, 3 or 4 elements")),
        }
    }
}

/// Parse a top-level rule list. `null` means no rules.
///
/// A bare logic tuple such as `["or", [...]]` is accepted in place of a
/// list and read as a single rule.
pub fn parse_rules(raw: &Value) -> Result<Vec<Rule>> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) if is_logic_tuple(items) => Ok(vec![Rule::parse(raw)?]),
        Value::Array(items) => items.iter().map(Rule::parse).collect(),
        _ => Err(malformed(raw, "rules must be an array")),
    }
}

// Rule lists only hold arrays, so a leading operator name cannot be a list.
fn is_logic_tuple(items: &[Value]) -> bool {
    matches!(items, [Value::String(op), Value::Array(_)] if LogicOperator::parse(op).is_some())
}

fn parse_logic(raw: &Value, op: &Value, rules: &Value) -> Result<Rule> {
    let name = op
        .as_str()
        .ok_or_else(|| malformed(raw, "logic operator must be a string"))?;
    let op = LogicOperator::parse(name).ok_or_else(|| QueryError::UnknownOperator(name.to_owned()))?;
    let Value::Array(items) = rules else {
        return Err(malformed(raw, "logic operands must be an array"));
    };
    let rules = items.iter().map(Rule::parse).collect::<Result<Vec<_>>>()?;
    Ok(Rule::Logic { op, rules })
}

fn parse_field(
    raw: &Value,
    field: &Value,
    op: &Value,
    literal: &Value,
    conversion: Option<&Value>,
) -> Result<Rule> {
    let field = field
        .as_str()
        .ok_or_else(|| malformed(raw, "field name must be a string"))?;
    let op_name = op
        .as_str()
        .ok_or_else(|| malformed(raw, "operator must be a string"))?;

    let value = match conversion {
        Some(Value::String(name)) => Conversion::parse(name)?.apply(literal)?,
        Some(_) => return Err(malformed(raw, "conversion must be a string")),
        None => literal.clone(),
    };

    let op = match op_name {
        "=" => FieldOperator::Eq,
        "!=" => FieldOperator::Ne,
        ">" => FieldOperator::Gt,
        "<" => FieldOperator::Lt,
        ">=" => FieldOperator::Ge,
        "<=" => FieldOperator::Le,
        "~" => {
            let pattern = value
                .as_str()
                .ok_or_else(|| malformed(raw, "pattern must be a string"))?;
            let regex = Regex::new(pattern).map_err(|source| QueryError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?;
            FieldOperator::Match(regex)
        }
        "in" | "nin" => {
            if !value.is_array() {
                return Err(malformed(raw, "in/nin operand must be an array"));
            }
            if op_name == "in" {
                FieldOperator::In
            } else {
                FieldOperator::Nin
            }
        }
        other => return Err(QueryError::UnknownOperator(other.to_owned())),
    };

    Ok(Rule::field(field, op, value))
}

fn malformed(raw: &Value, reason: &str) -> QueryError {
    QueryError::MalformedRule {
        rule: raw.to_string(),
        reason: reason.to_owned(),
    }
}
