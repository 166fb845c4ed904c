//! Typed boolean condition trees for `conditional` and `while` nodes.
//!
//! Conditions are written as data:
//! ```yaml
//! condition:
//!   and:
//!     - greater: ["$score", 90]
//!     - exists: user_data
//! ```
//! A bare string is treated as an expression and a bare boolean as a literal.
//! The tree is parsed once at load time; operands stay as raw JSON values and
//! are resolved against the variable context at evaluation time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DefinitionError;

/// Binary comparison operators available as condition leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    /// Left operand is an element of (or substring of) the right operand.
    In,
    /// Left operand contains the right operand.
    Contains,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Equals => "equals",
            Comparator::NotEquals => "not_equals",
            Comparator::Greater => "greater",
            Comparator::GreaterOrEqual => "greater_or_equal",
            Comparator::Less => "less",
            Comparator::LessOrEqual => "less_or_equal",
            Comparator::In => "in",
            Comparator::Contains => "contains",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "equals" | "eq" => Comparator::Equals,
            "not_equals" | "ne" => Comparator::NotEquals,
            "greater" | "gt" => Comparator::Greater,
            "greater_or_equal" | "gte" => Comparator::GreaterOrEqual,
            "less" | "lt" => Comparator::Less,
            "less_or_equal" | "lte" => Comparator::LessOrEqual,
            "in" => Comparator::In,
            "contains" => Comparator::Contains,
            _ => return None,
        })
    }
}

/// A parsed boolean condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Condition {
    /// Literal `true` / `false`.
    Literal(bool),
    /// Free-form expression (comparisons, arithmetic, property access).
    Expression(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        op: Comparator,
        left: Value,
        right: Value,
    },
    /// True when the dotted variable path resolves to a value.
    Exists(String),
}

impl TryFrom<Value> for Condition {
    type Error = DefinitionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(Condition::Literal(b)),
            Value::String(s) => Ok(Condition::Expression(s)),
            Value::Object(map) => parse_operator(map),
            other => Err(DefinitionError::InvalidCondition(format!(
                "expected a string, boolean or operator object, got {other}"
            ))),
        }
    }
}

fn parse_operator(map: Map<String, Value>) -> Result<Condition, DefinitionError> {
    if map.len() != 1 {
        let keys: Vec<&String> = map.keys().collect();
        return Err(DefinitionError::InvalidCondition(format!(
            "operator object must have exactly one key, got {keys:?}"
        )));
    }
    let Some((key, operand)) = map.into_iter().next() else {
        return Err(DefinitionError::InvalidCondition(
            "empty operator object".to_string(),
        ));
    };

    match key.as_str() {
        "and" | "or" => {
            let Value::Array(items) = operand else {
                return Err(DefinitionError::InvalidCondition(format!(
                    "'{key}' expects a list of conditions"
                )));
            };
            let children = items
                .into_iter()
                .map(Condition::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if key == "and" {
                Condition::And(children)
            } else {
                Condition::Or(children)
            })
        }
        "not" => Ok(Condition::Not(Box::new(Condition::try_from(operand)?))),
        "exists" => match operand {
            Value::String(path) => Ok(Condition::Exists(
                path.trim_start_matches('$').to_string(),
            )),
            _ => Err(DefinitionError::InvalidCondition(
                "'exists' expects a variable path string".to_string(),
            )),
        },
        other => {
            let Some(op) = Comparator::from_key(other) else {
                return Err(DefinitionError::InvalidCondition(format!(
                    "unknown operator '{other}'"
                )));
            };
            match operand {
                Value::Array(mut pair) if pair.len() == 2 => {
                    let right = pair.pop().unwrap_or(Value::Null);
                    let left = pair.pop().unwrap_or(Value::Null);
                    Ok(Condition::Compare { op, left, right })
                }
                _ => Err(DefinitionError::InvalidCondition(format!(
                    "'{other}' expects exactly two operands"
                ))),
            }
        }
    }
}

impl From<Condition> for Value {
    fn from(condition: Condition) -> Self {
        let single = |key: &str, value: Value| {
            let mut map = Map::new();
            map.insert(key.to_string(), value);
            Value::Object(map)
        };
        match condition {
            Condition::Literal(b) => Value::Bool(b),
            Condition::Expression(s) => Value::String(s),
            Condition::And(children) => single(
                "and",
                Value::Array(children.into_iter().map(Value::from).collect()),
            ),
            Condition::Or(children) => single(
                "or",
                Value::Array(children.into_iter().map(Value::from).collect()),
            ),
            Condition::Not(inner) => single("not", Value::from(*inner)),
            Condition::Compare { op, left, right } => {
                single(op.as_str(), Value::Array(vec![left, right]))
            }
            Condition::Exists(path) => single("exists", Value::String(path)),
        }
    }
}
