//! JEXL expression evaluator for conditions, `${expr}` templates, and
//! transform stages.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms and
//! provides convenience methods for boolean evaluation against a variable
//! context. Workflow authors write variables as `$name`; the sigil is
//! stripped before evaluation since JEXL identifiers are bare.
//!
//! **Security note:** values are always passed as context objects, never
//! interpolated into expression strings.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use super::context::VariableContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression '{expression}' failed: {message}")]
    EvalFailed { expression: String, message: String },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Used for:
/// - `condition` strings on conditional nodes and while loops
/// - `${score > 90}` style template placeholders
/// - `filter:`, `map:`, and custom `reduce:` transform stages
/// - JSONPath `[?(...)]` filter predicates
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

thread_local! {
    static EVALUATOR: WorkflowEvaluator = WorkflowEvaluator::new();
}

/// Evaluate with the calling thread's shared evaluator instance.
pub fn evaluate_value(expression: &str, context: &Value) -> Result<Value, ExpressionError> {
    EVALUATOR.with(|e| e.evaluate_value(expression, context))
}

/// Boolean form of [`evaluate_value`].
pub fn evaluate_bool(expression: &str, context: &Value) -> Result<bool, ExpressionError> {
    EVALUATOR.with(|e| e.evaluate_bool(expression, context))
}

fn first_str(args: &[Value]) -> &str {
    args.first().and_then(|v| v.as_str()).unwrap_or("")
}

fn second_str(args: &[Value]) -> &str {
    args.get(1).and_then(|v| v.as_str()).unwrap_or("")
}

impl WorkflowEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| Ok(json!(first_str(args).to_lowercase())))
            .with_transform("upper", |args: &[Value]| Ok(json!(first_str(args).to_uppercase())))
            .with_transform("trim", |args: &[Value]| Ok(json!(first_str(args).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = first_str(args).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("string", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(value_to_string(&val)))
            })
            // Boolean transforms
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            })
            // Search transforms (strings and arrays)
            .with_transform("contains", |args: &[Value]| {
                let needle = args.get(1).cloned().unwrap_or(Value::Null);
                let found = match args.first() {
                    Some(Value::String(s)) => needle.as_str().is_some_and(|n| s.contains(n)),
                    Some(Value::Array(items)) => items.contains(&needle),
                    Some(Value::Object(map)) => needle.as_str().is_some_and(|k| map.contains_key(k)),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                Ok(json!(first_str(args).starts_with(second_str(args))))
            })
            .with_transform("endsWith", |args: &[Value]| {
                Ok(json!(first_str(args).ends_with(second_str(args))))
            })
            .with_transform("match", |args: &[Value]| {
                let matched = Regex::new(second_str(args))
                    .map(|re| re.is_match(first_str(args)))
                    .unwrap_or(false);
                Ok(json!(matched))
            })
            // Collection transforms
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("keys", |args: &[Value]| {
                let keys: Vec<String> = match args.first() {
                    Some(Value::Object(o)) => o.keys().cloned().collect(),
                    _ => Vec::new(),
                };
                Ok(json!(keys))
            })
            .with_transform("values", |args: &[Value]| {
                let values: Vec<Value> = match args.first() {
                    Some(Value::Object(o)) => o.values().cloned().collect(),
                    Some(Value::Array(a)) => a.clone(),
                    _ => Vec::new(),
                };
                Ok(Value::Array(values))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean result.
    ///
    /// The `context` must be a JSON object. Expression results are coerced
    /// to boolean using JavaScript-like truthiness rules.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(value_to_bool(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let normalized = strip_variable_sigils(expression);
        self.evaluator
            .eval_in_context(&normalized, context)
            .map_err(|e| ExpressionError::EvalFailed {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }

    /// Evaluate against a variable context (shared variables plus locals).
    pub fn evaluate_in_context(
        &self,
        expression: &str,
        ctx: &VariableContext,
    ) -> Result<Value, ExpressionError> {
        self.evaluate_value(expression, &ctx.to_expression_context())
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static SIGIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|\$([A-Za-z_])"#)
        .expect("sigil regex is valid")
});

/// Drop the `$` in front of identifiers, leaving string literals untouched.
pub fn strip_variable_sigils(expression: &str) -> String {
    SIGIL
        .replace_all(expression, |caps: &regex::Captures<'_>| match caps.get(1) {
            Some(first) => first.as_str().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form used for interpolation: raw strings, compact JSON otherwise.
/// Whole floats print without a fractional part.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// JSON type name for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
