//! Evaluation of `Condition` trees against a variable context.
//!
//! Comparison operands go through the template resolver, so `"$score"` and
//! `"${user.tier}"` read variables while plain literals compare as written.
//! An operand naming a variable that does not exist compares as `null`
//! rather than failing the condition; use `exists` to test presence.

use serde_json::Value;
use tesflow_types::condition::{Comparator, Condition};

use super::context::VariableContext;
use super::definition::WorkflowError;
use super::expression;
use super::template;

/// Evaluate a condition to a boolean.
pub fn evaluate(condition: &Condition, ctx: &VariableContext) -> Result<bool, WorkflowError> {
    match condition {
        Condition::Literal(b) => Ok(*b),
        Condition::Expression(expr) => {
            // A whole `${...}` or `$path` string is unwrapped to its inner form.
            let inner = match template::whole_reference(expr) {
                Some(template::Reference::Expression(e)) => e,
                Some(template::Reference::Path(p)) => p,
                None => expr.as_str(),
            };
            expression::evaluate_bool(inner, &ctx.to_expression_context())
                .map_err(|e| WorkflowError::ExpressionError(e.to_string()))
        }
        Condition::And(children) => {
            for child in children {
                if !evaluate(child, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(children) => {
            for child in children {
                if evaluate(child, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(inner) => Ok(!evaluate(inner, ctx)?),
        Condition::Exists(path) => Ok(ctx.contains(path)),
        Condition::Compare { op, left, right } => {
            let left = operand(left, ctx)?;
            let right = operand(right, ctx)?;
            compare(*op, &left, &right)
        }
    }
}

fn operand(value: &Value, ctx: &VariableContext) -> Result<Value, WorkflowError> {
    match template::resolve_value(value, ctx) {
        Ok(resolved) => Ok(resolved),
        Err(WorkflowError::UnresolvedVariable(_)) => Ok(Value::Null),
        Err(other) => Err(other),
    }
}

/// Apply a comparator. Numbers compare numerically regardless of integer or
/// float representation; strings compare lexicographically.
pub fn compare(op: Comparator, left: &Value, right: &Value) -> Result<bool, WorkflowError> {
    let result = match op {
        Comparator::Equals => loose_eq(left, right),
        Comparator::NotEquals => !loose_eq(left, right),
        Comparator::Greater | Comparator::GreaterOrEqual | Comparator::Less | Comparator::LessOrEqual => {
            let Some(ordering) = order(left, right) else {
                return Err(WorkflowError::ExpressionError(format!(
                    "cannot compare {left} and {right} with '{}'",
                    op.as_str()
                )));
            };
            match op {
                Comparator::Greater => ordering.is_gt(),
                Comparator::GreaterOrEqual => ordering.is_ge(),
                Comparator::Less => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }
        Comparator::In => contains(right, left),
        Comparator::Contains => contains(left, right),
    };
    Ok(result)
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => a == b,
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}
