//! Transform pipelines applied to extracted output values.
//!
//! A pipeline is a `|`-separated list of stages applied left to right.
//! Separators inside quotes or brackets do not split, so `split:'|'` and
//! `filter:item.tags == ['a']` stay single stages.
//!
//! Stages:
//! - casts: `string`, `number`, `boolean`, `array`, `object`
//! - collections: `filter:<expr>`, `map:<expr>`, `reduce:<op>[,<initial>]`,
//!   `keys`, `values`, `length`
//! - strings: `split:<delim>`, `join:<delim>`, `regex:<pattern>`, `lower`,
//!   `upper`, `trim`
//! - anything else containing an operator is a JEXL expression over `value`

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value, json};

use super::definition::WorkflowError;
use super::expression::{self, type_name, value_to_bool, value_to_string};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cast {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReduceOp {
    Sum,
    Product,
    Min,
    Max,
    Count,
    Concat,
    Avg,
}

impl ReduceOp {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "product" => Some(Self::Product),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "concat" => Some(Self::Concat),
            "avg" | "average" => Some(Self::Avg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Reducer {
    Builtin(ReduceOp),
    /// Expression over `acc` and `item`.
    Custom(String),
}

#[derive(Debug, Clone)]
enum Stage {
    Cast(Cast),
    Filter(String),
    Map(String),
    Reduce {
        reducer: Reducer,
        initial: Option<Value>,
    },
    Split(String),
    Join(String),
    Regex(Regex),
    Keys,
    Values,
    Length,
    Lower,
    Upper,
    Trim,
    Expression(String),
}

#[derive(Debug, Clone)]
struct StageSpec {
    raw: String,
    stage: Stage,
}

/// A compiled transform pipeline.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<StageSpec>,
}

impl Pipeline {
    /// Compile a pipeline string. Empty segments are ignored, so `""` is the
    /// identity pipeline.
    pub fn parse(spec: &str) -> Result<Self, WorkflowError> {
        let stages = split_top_level(spec, '|')
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|raw| {
                parse_stage(raw).map(|stage| StageSpec {
                    raw: raw.to_string(),
                    stage,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stages })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage in order.
    pub fn apply(&self, value: Value) -> Result<Value, WorkflowError> {
        self.stages.iter().try_fold(value, |acc, spec| {
            run_stage(&spec.stage, &acc).map_err(|message| WorkflowError::TransformError {
                stage: spec.raw.clone(),
                input: preview(&acc),
                message,
            })
        })
    }
}

/// Compile and apply in one step.
pub fn transform(value: Value, spec: &str) -> Result<Value, WorkflowError> {
    Pipeline::parse(spec)?.apply(value)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_stage(raw: &str) -> Result<Stage, WorkflowError> {
    let invalid = |message: String| WorkflowError::TransformError {
        stage: raw.to_string(),
        input: "<pipeline>".to_string(),
        message,
    };

    if let Some((name, arg)) = raw.split_once(':') {
        let arg = arg.trim();
        match name.trim() {
            "filter" | "map" if arg.is_empty() => {
                return Err(invalid("expression must not be empty".to_string()));
            }
            "filter" => return Ok(Stage::Filter(arg.to_string())),
            "map" => return Ok(Stage::Map(arg.to_string())),
            "reduce" => return parse_reduce(arg).map_err(invalid),
            "split" => return Ok(Stage::Split(unquote(arg))),
            "join" => return Ok(Stage::Join(unquote(arg))),
            "regex" => {
                let pattern = unquote(arg);
                return Regex::new(&pattern)
                    .map(Stage::Regex)
                    .map_err(|e| invalid(format!("invalid regex: {e}")));
            }
            _ => {}
        }
    }

    let stage = match raw {
        "string" | "str" => Stage::Cast(Cast::String),
        "number" | "int" | "float" => Stage::Cast(Cast::Number),
        "boolean" | "bool" => Stage::Cast(Cast::Boolean),
        "array" | "list" => Stage::Cast(Cast::Array),
        "object" => Stage::Cast(Cast::Object),
        "keys" => Stage::Keys,
        "values" => Stage::Values,
        "length" | "len" | "count" => Stage::Length,
        "lower" => Stage::Lower,
        "upper" => Stage::Upper,
        "trim" => Stage::Trim,
        other if IDENTIFIER.is_match(other) => {
            return Err(invalid(format!("unknown transform '{other}'")));
        }
        other => Stage::Expression(other.to_string()),
    };
    Ok(stage)
}

fn parse_reduce(arg: &str) -> Result<Stage, String> {
    if arg.is_empty() {
        return Err("reduce requires an operation".to_string());
    }

    let (head, initial) = match arg.split_once(',') {
        Some((op, init)) if ReduceOp::from_name(op.trim()).is_some() => {
            (op.trim(), Some(parse_literal(init.trim())))
        }
        _ => (arg, None),
    };
    if let Some(op) = ReduceOp::from_name(head) {
        return Ok(Stage::Reduce {
            reducer: Reducer::Builtin(op),
            initial,
        });
    }

    // Custom reducer: `acc + item.price, 0`. The tail after the last top-level
    // comma is the initial value when it parses as a JSON literal.
    let parts = split_top_level(arg, ',');
    if parts.len() > 1 {
        let tail = parts[parts.len() - 1].trim();
        if let Ok(initial) = serde_json::from_str::<Value>(&tail.replace('\'', "\"")) {
            let expr_len = arg.len() - parts[parts.len() - 1].len() - 1;
            return Ok(Stage::Reduce {
                reducer: Reducer::Custom(arg[..expr_len].trim().to_string()),
                initial: Some(initial),
            });
        }
    }
    Ok(Stage::Reduce {
        reducer: Reducer::Custom(arg.to_string()),
        initial: None,
    })
}

fn parse_literal(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(unquote(text)))
}

fn unquote(arg: &str) -> String {
    let bytes = arg.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        arg[1..arg.len() - 1].to_string()
    } else {
        arg.to_string()
    }
}

/// Split on `sep` where it is not inside quotes or brackets.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn run_stage(stage: &Stage, value: &Value) -> Result<Value, String> {
    match stage {
        Stage::Cast(cast) => cast_value(*cast, value),
        Stage::Filter(expr) => {
            let items = expect_array(value)?;
            let mut kept = Vec::new();
            for (index, item) in items.iter().enumerate() {
                let ctx = json!({ "item": item, "index": index });
                if expression::evaluate_bool(expr, &ctx).map_err(|e| e.to_string())? {
                    kept.push(item.clone());
                }
            }
            Ok(Value::Array(kept))
        }
        Stage::Map(expr) => {
            let items = expect_array(value)?;
            items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let ctx = json!({ "item": item, "index": index });
                    expression::evaluate_value(expr, &ctx)
                        .map(normalize_number)
                        .map_err(|e| e.to_string())
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Stage::Reduce { reducer, initial } => reduce(reducer, initial.as_ref(), expect_array(value)?),
        Stage::Split(delim) => {
            let s = expect_str(value)?;
            let parts: Vec<Value> = if delim.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(delim.as_str()).map(|p| Value::String(p.to_string())).collect()
            };
            Ok(Value::Array(parts))
        }
        Stage::Join(delim) => {
            let items = expect_array(value)?;
            let joined: Vec<String> = items.iter().map(value_to_string).collect();
            Ok(Value::String(joined.join(delim)))
        }
        Stage::Regex(re) => {
            let s = expect_str(value)?;
            Ok(match re.captures(s) {
                Some(caps) => {
                    let m = caps.get(1).or_else(|| caps.get(0));
                    m.map(|m| Value::String(m.as_str().to_string())).unwrap_or(Value::Null)
                }
                None => Value::Null,
            })
        }
        Stage::Keys => match value {
            Value::Object(map) => Ok(json!(map.keys().collect::<Vec<_>>())),
            other => Err(format!("expected object, got {}", type_name(other))),
        },
        Stage::Values => match value {
            Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
            Value::Array(items) => Ok(Value::Array(items.clone())),
            other => Err(format!("expected object, got {}", type_name(other))),
        },
        Stage::Length => match value {
            Value::Array(items) => Ok(json!(items.len())),
            Value::Object(map) => Ok(json!(map.len())),
            Value::String(s) => Ok(json!(s.chars().count())),
            Value::Null => Ok(json!(0)),
            other => Err(format!("{} has no length", type_name(other))),
        },
        Stage::Lower => Ok(Value::String(expect_str(value)?.to_lowercase())),
        Stage::Upper => Ok(Value::String(expect_str(value)?.to_uppercase())),
        Stage::Trim => Ok(Value::String(expect_str(value)?.trim().to_string())),
        Stage::Expression(expr) => {
            let ctx = json!({ "value": value });
            expression::evaluate_value(expr, &ctx)
                .map(normalize_number)
                .map_err(|e| e.to_string())
        }
    }
}

fn cast_value(cast: Cast, value: &Value) -> Result<Value, String> {
    match cast {
        Cast::String => Ok(Value::String(value_to_string(value))),
        Cast::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::Bool(b) => Ok(json!(u8::from(*b))),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(json!(i));
                }
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("cannot convert '{s}' to a number"))
            }
            other => Err(format!("cannot convert {} to a number", type_name(other))),
        },
        Cast::Boolean => Ok(Value::Bool(match value {
            Value::String(s) => !matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "" | "false" | "0" | "no" | "off"
            ),
            other => value_to_bool(other),
        })),
        Cast::Array => Ok(match value {
            Value::Array(_) => value.clone(),
            Value::Null => Value::Array(Vec::new()),
            other => Value::Array(vec![other.clone()]),
        }),
        Cast::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            Value::Null => Ok(Value::Object(Map::new())),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_)) => Ok(parsed),
                _ => Err("string is not a JSON object".to_string()),
            },
            Value::Array(items) => items
                .iter()
                .map(|pair| match pair {
                    Value::Array(kv) if kv.len() == 2 => match &kv[0] {
                        Value::String(k) => Ok((k.clone(), kv[1].clone())),
                        _ => Err("object keys must be strings".to_string()),
                    },
                    _ => Err("array elements must be [key, value] pairs".to_string()),
                })
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            other => Err(format!("cannot convert {} to an object", type_name(other))),
        },
    }
}

fn reduce(reducer: &Reducer, initial: Option<&Value>, items: &[Value]) -> Result<Value, String> {
    let op = match reducer {
        Reducer::Builtin(op) => *op,
        Reducer::Custom(expr) => {
            let mut iter = items.iter();
            let mut acc = match initial {
                Some(init) => init.clone(),
                None => match iter.next() {
                    Some(first) => first.clone(),
                    None => return Ok(Value::Null),
                },
            };
            for item in iter {
                let ctx = json!({ "acc": acc, "item": item });
                acc = expression::evaluate_value(expr, &ctx)
                    .map(normalize_number)
                    .map_err(|e| e.to_string())?;
            }
            return Ok(acc);
        }
    };

    let numbers = || -> Result<Vec<f64>, String> {
        items
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| format!("reduce expects numbers, got {}", type_name(v)))
            })
            .collect()
    };
    let seed = initial.and_then(Value::as_f64);

    let result = match op {
        ReduceOp::Count => json!(items.len()),
        ReduceOp::Sum => json!(numbers()?.iter().sum::<f64>() + seed.unwrap_or(0.0)),
        ReduceOp::Product => json!(numbers()?.iter().product::<f64>() * seed.unwrap_or(1.0)),
        ReduceOp::Min => numbers()?
            .into_iter()
            .chain(seed)
            .reduce(f64::min)
            .map_or(Value::Null, |n| json!(n)),
        ReduceOp::Max => numbers()?
            .into_iter()
            .chain(seed)
            .reduce(f64::max)
            .map_or(Value::Null, |n| json!(n)),
        ReduceOp::Avg => {
            let nums = numbers()?;
            if nums.is_empty() {
                Value::Null
            } else {
                json!(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        ReduceOp::Concat => {
            if items.iter().all(Value::is_array) {
                let mut out = match initial {
                    Some(Value::Array(seed)) => seed.clone(),
                    _ => Vec::new(),
                };
                items
                    .iter()
                    .filter_map(Value::as_array)
                    .for_each(|a| out.extend(a.iter().cloned()));
                Value::Array(out)
            } else {
                let mut out = initial.map(value_to_string).unwrap_or_default();
                items.iter().for_each(|v| out.push_str(&value_to_string(v)));
                Value::String(out)
            }
        }
    };
    Ok(normalize_number(result))
}

/// JEXL arithmetic yields floats; whole results become integers again.
fn normalize_number(value: Value) -> Value {
    match &value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => json!(f as i64),
            _ => value,
        },
        _ => value,
    }
}

fn expect_array(value: &Value) -> Result<&[Value], String> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| format!("expected array, got {}", type_name(value)))
}

fn expect_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected string, got {}", type_name(value)))
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 120 {
        let cut: String = text.chars().take(117).collect();
        format!("{cut}...")
    } else {
        text
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn run(value: Value, spec: &str) -> Value {
        transform(value, spec).unwrap()
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let v = json!({"a": [1, 2]});
        assert_eq!(run(v.clone(), ""), v);
        assert_eq!(run(v.clone(), "  "), v);
        assert!(Pipeline::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_casts() {
        assert_eq!(run(json!(42), "string"), json!("42"));
        assert_eq!(run(json!(" 17 "), "number"), json!(17));
        assert_eq!(run(json!("2.5"), "number"), json!(2.5));
        assert_eq!(run(json!("false"), "boolean"), json!(false));
        assert_eq!(run(json!("yes"), "boolean"), json!(true));
        assert_eq!(run(json!(0), "boolean"), json!(false));
        assert_eq!(run(json!("x"), "array"), json!(["x"]));
        assert_eq!(run(Value::Null, "array"), json!([]));
        assert_eq!(run(json!(r#"{"k":1}"#), "object"), json!({"k": 1}));
        assert_eq!(run(json!([["a", 1], ["b", 2]]), "object"), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_filter_map_reduce_chain() {
        let users = json!([
            {"name": "Ann", "age": 34, "score": 10},
            {"name": "Bob", "age": 17, "score": 20},
            {"name": "Cyd", "age": 52, "score": 5}
        ]);
        assert_eq!(
            run(users.clone(), "filter:item.age > 18|map:item.name"),
            json!(["Ann", "Cyd"])
        );
        assert_eq!(run(users.clone(), "map:item.score|reduce:sum"), json!(35));
        assert_eq!(run(users.clone(), "map:item.score * 2"), json!([20, 40, 10]));
        assert_eq!(run(users, "reduce:acc + item.score, 0"), json!(35));
    }

    #[test]
    fn test_reduce_builtins() {
        let nums = json!([3, 1, 4, 1, 5]);
        assert_eq!(run(nums.clone(), "reduce:product"), json!(60));
        assert_eq!(run(nums.clone(), "reduce:min"), json!(1));
        assert_eq!(run(nums.clone(), "reduce:max"), json!(5));
        assert_eq!(run(nums.clone(), "reduce:count"), json!(5));
        assert_eq!(run(nums.clone(), "reduce:sum,10"), json!(24));
        assert_eq!(run(json!([1, 2]), "reduce:avg"), json!(1.5));
        assert_eq!(run(json!([]), "reduce:sum"), json!(0));
        assert_eq!(run(json!([]), "reduce:max"), Value::Null);
        assert_eq!(run(json!(["a", "b"]), "reduce:concat"), json!("ab"));
        assert_eq!(run(json!([[1], [2, 3]]), "reduce:concat"), json!([1, 2, 3]));
    }

    #[test]
    fn test_string_stages() {
        assert_eq!(run(json!("a,b,c"), "split:,"), json!(["a", "b", "c"]));
        assert_eq!(run(json!("a|b"), "split:'|'"), json!(["a", "b"]));
        assert_eq!(run(json!(["x", 1, true]), "join:-"), json!("x-1-true"));
        assert_eq!(run(json!("order #1234 shipped"), r"regex:#(\d+)"), json!("1234"));
        assert_eq!(run(json!("abc123"), r"regex:\d+"), json!("123"));
        assert_eq!(run(json!("none"), r"regex:\d+"), Value::Null);
        assert_eq!(run(json!("  MiXed "), "trim|lower"), json!("mixed"));
    }

    #[test]
    fn test_collection_helpers() {
        let obj = json!({"b": 2, "a": 1});
        assert_eq!(run(obj.clone(), "keys"), json!(["b", "a"]));
        assert_eq!(run(obj.clone(), "values"), json!([2, 1]));
        assert_eq!(run(obj, "length"), json!(2));
        assert_eq!(run(json!("héllo"), "length"), json!(5));
    }

    #[test]
    fn test_expression_stage_over_value() {
        assert_eq!(run(json!(21), "value * 2"), json!(42));
        assert_eq!(run(json!(95), "value > 90"), json!(true));
    }

    #[test]
    fn test_composition_is_left_to_right() {
        let v = json!("a,b");
        let step_by_step = run(run(run(v.clone(), "split:,"), "join:-"), "upper");
        assert_eq!(run(v, "split:,|join:-|upper"), step_by_step);
        assert_eq!(step_by_step, json!("A-B"));
    }

    #[test]
    fn test_stage_failure_names_stage_and_input() {
        let err = transform(json!(5), "split:,").unwrap_err();
        assert!(matches!(err, WorkflowError::TransformError { .. }));

        let err = transform(json!({"k": 1}), "filter:item > 1").unwrap_err();
        match err {
            WorkflowError::TransformError { stage, input, .. } => {
                assert_eq!(stage, "filter:item > 1");
                assert_eq!(input, r#"{"k":1}"#);
            }
            other => panic!("expected transform error, got {other:?}"),
        }

        assert!(transform(json!("abc"), "number").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_names_and_bad_regex() {
        assert!(Pipeline::parse("frobnicate").is_err());
        assert!(Pipeline::parse("regex:(unclosed").is_err());
        assert!(Pipeline::parse("filter:").is_err());
        assert_eq!(Pipeline::parse("array|length").unwrap().len(), 2);
    }

    #[test]
    fn test_split_top_level_respects_quotes_and_brackets() {
        assert_eq!(
            split_top_level("filter:item in ['a|b']|join:'|'", '|'),
            vec!["filter:item in ['a|b']", "join:'|'"]
        );
    }
}
