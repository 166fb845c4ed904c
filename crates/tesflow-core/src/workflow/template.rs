//! Template resolution for task parameters and mapping targets.
//!
//! Three reference forms are recognised inside strings:
//! - `$name`, `$user.name`, `$items[0]` -- variable paths
//! - `${a.b.c}` -- the same, delimited so it can sit inside text
//! - `${score > 90}` -- a JEXL expression over the context
//!
//! A string that is exactly one reference resolves to the referenced value
//! with its native JSON type, and a missing variable is an error. References
//! embedded in longer text are interpolated as strings; those that do not
//! resolve are left verbatim so unrelated text (prices, shell snippets)
//! survives untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::context::VariableContext;
use super::definition::WorkflowError;
use super::expression::{self, value_to_string};

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^{}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+|\[\d+\])*)")
        .expect("reference regex is valid")
});

static PLAIN_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$?[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+|\[\d+\])*$")
        .expect("path regex is valid")
});

/// A parsed reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    /// Dotted variable path.
    Path(&'a str),
    /// JEXL expression.
    Expression(&'a str),
}

impl<'a> Reference<'a> {
    fn from_captures(caps: &Captures<'a>) -> Option<Self> {
        if let Some(braced) = caps.get(1) {
            let inner = braced.as_str().trim();
            return Some(if PLAIN_PATH.is_match(inner) {
                Reference::Path(inner.trim_start_matches('$'))
            } else {
                Reference::Expression(inner)
            });
        }
        caps.get(2).map(|bare| Reference::Path(bare.as_str()))
    }
}

/// The reference `s` consists of, if it is exactly one reference.
pub fn whole_reference(s: &str) -> Option<Reference<'_>> {
    let caps = REFERENCE.captures(s)?;
    let full = caps.get(0)?;
    if full.start() != 0 || full.end() != s.len() {
        return None;
    }
    Reference::from_captures(&caps)
}

/// Resolve a reference. `Ok(None)` means a path that does not exist.
pub fn resolve_reference(
    reference: Reference<'_>,
    ctx: &VariableContext,
) -> Result<Option<Value>, WorkflowError> {
    match reference {
        Reference::Path(path) => Ok(ctx.get(path)),
        Reference::Expression(expr) => expression::evaluate_value(expr, &ctx.to_expression_context())
            .map(Some)
            .map_err(|e| WorkflowError::ExpressionError(e.to_string())),
    }
}

/// Resolve every string inside `value`, recursing into arrays and objects.
pub fn resolve_value(value: &Value, ctx: &VariableContext) -> Result<Value, WorkflowError> {
    match value {
        Value::String(s) => resolve_str(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_map(map, ctx).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve a parameter map.
pub fn resolve_map(
    map: &Map<String, Value>,
    ctx: &VariableContext,
) -> Result<Map<String, Value>, WorkflowError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, ctx)?)))
        .collect()
}

/// Resolve a single string: native value for a whole reference, interpolated
/// string otherwise.
pub fn resolve_str(s: &str, ctx: &VariableContext) -> Result<Value, WorkflowError> {
    if let Some(reference) = whole_reference(s) {
        return resolve_reference(reference, ctx)?
            .ok_or_else(|| WorkflowError::UnresolvedVariable(s.to_string()));
    }
    if !s.contains('$') {
        return Ok(Value::String(s.to_string()));
    }
    Ok(Value::String(interpolate(s, ctx, false)?))
}

/// Interpolate every reference in `s`, failing on any that does not resolve.
/// Used for mapping targets such as `results.${item.id}`.
pub fn interpolate_strict(s: &str, ctx: &VariableContext) -> Result<String, WorkflowError> {
    interpolate(s, ctx, true)
}

fn interpolate(s: &str, ctx: &VariableContext, strict: bool) -> Result<String, WorkflowError> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in REFERENCE.captures_iter(s) {
        let Some(full) = caps.get(0) else { continue };
        out.push_str(&s[last..full.start()]);
        last = full.end();

        let resolved = match Reference::from_captures(&caps) {
            Some(reference) => match resolve_reference(reference, ctx) {
                Ok(value) => value,
                Err(e) if strict => return Err(e),
                Err(_) => None,
            },
            None => None,
        };
        match resolved {
            Some(value) => out.push_str(&value_to_string(&value)),
            None if strict => {
                return Err(WorkflowError::UnresolvedVariable(full.as_str().to_string()));
            }
            None => out.push_str(full.as_str()),
        }
    }
    out.push_str(&s[last..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> VariableContext {
        let Value::Object(map) = json!({
            "name": "Ada",
            "score": 95,
            "user": {"email": "ada@example.test", "tags": ["x", "y"]},
            "items": [{"id": 1}, {"id": 2}],
        }) else {
            unreachable!()
        };
        VariableContext::new(map)
    }

    #[test]
    fn test_whole_reference_keeps_native_type() {
        let c = ctx();
        assert_eq!(resolve_str("$score", &c).unwrap(), json!(95));
        assert_eq!(resolve_str("${user.tags}", &c).unwrap(), json!(["x", "y"]));
        assert_eq!(resolve_str("$items[1].id", &c).unwrap(), json!(2));
        assert_eq!(resolve_str("${ user.email }", &c).unwrap(), json!("ada@example.test"));
    }

    #[test]
    fn test_expression_placeholder() {
        let c = ctx();
        assert_eq!(resolve_str("${score > 90}", &c).unwrap(), json!(true));
        assert_eq!(resolve_str("${$score - 5}", &c).unwrap(), json!(90.0));
    }

    #[test]
    fn test_embedded_references_interpolate() {
        let c = ctx();
        assert_eq!(
            resolve_str("Hello $name, score ${score}!", &c).unwrap(),
            json!("Hello Ada, score 95!")
        );
        assert_eq!(
            resolve_str("tags=${user.tags}", &c).unwrap(),
            json!(r#"tags=["x","y"]"#)
        );
    }

    #[test]
    fn test_missing_whole_reference_is_error() {
        let err = resolve_str("$missing", &ctx()).unwrap_err();
        assert!(matches!(err, WorkflowError::UnresolvedVariable(ref r) if r == "$missing"));
        assert!(resolve_str("${nope.deeper}", &ctx()).is_err());
    }

    #[test]
    fn test_missing_embedded_reference_left_verbatim() {
        let c = ctx();
        assert_eq!(
            resolve_str("cost is $price for $name", &c).unwrap(),
            json!("cost is $price for Ada")
        );
        assert_eq!(resolve_str("echo ${HOME}", &c).unwrap(), json!("echo ${HOME}"));
        assert_eq!(resolve_str("US$ 5", &c).unwrap(), json!("US$ 5"));
    }

    #[test]
    fn test_resolve_value_recurses() {
        let params = json!({
            "to": "$user.email",
            "subject": "Hi $name",
            "cc": ["$name", 3, {"deep": "${score}"}],
            "flag": true
        });
        let resolved = resolve_value(&params, &ctx()).unwrap();
        assert_eq!(
            resolved,
            json!({
                "to": "ada@example.test",
                "subject": "Hi Ada",
                "cc": ["Ada", 3, {"deep": 95}],
                "flag": true
            })
        );
    }

    #[test]
    fn test_interpolate_strict_for_targets() {
        let mut c = ctx();
        c.bind_local("item", json!({"id": 7}));
        assert_eq!(interpolate_strict("results.${item.id}", &c).unwrap(), "results.7");
        assert!(interpolate_strict("results.${other.id}", &c).is_err());
        assert_eq!(interpolate_strict("plain.path", &c).unwrap(), "plain.path");
    }

    #[test]
    fn test_locals_resolve() {
        let mut c = ctx();
        c.bind_local("item", json!({"id": 1, "name": "first"}));
        assert_eq!(resolve_str("$item.name", &c).unwrap(), json!("first"));
    }
}
