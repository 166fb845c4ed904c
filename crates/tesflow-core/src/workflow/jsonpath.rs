//! JSONPath extraction over task results.
//!
//! Supported syntax:
//! - `$` root, `.name` and `['name']` children, `.*` / `[*]` wildcards
//! - `[0]`, `[-1]` indexes, `[1:3]`, `[::2]` slices, `[0,2]` / `['a','b']` unions
//! - `..name`, `..*`, `..[0]` recursive descent
//! - `[?(@.age > 18 && @.active)]` filter predicates, evaluated as JEXL with
//!   `@` bound to the candidate element
//!
//! Matches are returned in document order. A path built only from names and
//! indexes is *definite*: it can match at most one value.

use serde_json::{Value, json};

use super::definition::WorkflowError;
use super::expression;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Name(String),
    Index(i64),
    Wildcard,
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Union(Vec<UnionItem>),
    /// JEXL predicate with `@` already rewritten to `item`.
    Filter(String),
}

#[derive(Debug, Clone, PartialEq)]
enum UnionItem {
    Name(String),
    Index(i64),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(Selector),
    Descendant(Selector),
}

/// A compiled JSONPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compile a path. It must start with `$`.
    pub fn parse(path: &str) -> Result<Self, WorkflowError> {
        let segments = Parser::new(path).parse()?;
        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// Compile a mapping source: JSONPath when it starts with `$`, plain dot
    /// notation (`data.items[0]`) otherwise.
    pub fn from_source(source: &str) -> Result<Self, WorkflowError> {
        let trimmed = source.trim();
        if trimmed.starts_with('$') {
            Self::parse(trimmed)
        } else if trimmed.starts_with('[') {
            Self::parse(&format!("${trimmed}"))
        } else {
            Self::parse(&format!("$.{trimmed}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the path can match at most one value.
    pub fn is_definite(&self) -> bool {
        self.segments.iter().all(|segment| {
            matches!(
                segment,
                Segment::Child(Selector::Name(_)) | Segment::Child(Selector::Index(_))
            )
        })
    }

    /// All matches in document order.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in current {
                match segment {
                    Segment::Child(selector) => apply(selector, node, &mut next),
                    Segment::Descendant(selector) => {
                        let mut stack = Vec::new();
                        descendants(node, &mut stack);
                        for d in stack {
                            apply(selector, d, &mut next);
                        }
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Extraction as used by output mappings: `None` when nothing matched,
    /// the value itself for a definite path, an array of matches otherwise.
    pub fn extract(&self, root: &Value) -> Option<Value> {
        let matches = self.select(root);
        if matches.is_empty() {
            return None;
        }
        if self.is_definite() {
            return matches.first().map(|v| (*v).clone());
        }
        Some(Value::Array(matches.into_iter().cloned().collect()))
    }
}

/// Convenience wrapper: compile and select in one step.
pub fn extract_all(root: &Value, path: &str) -> Result<Vec<Value>, WorkflowError> {
    let compiled = JsonPath::parse(path)?;
    Ok(compiled.select(root).into_iter().cloned().collect())
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Pre-order walk: the node itself, then each child subtree in order.
fn descendants<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(node);
    match node {
        Value::Array(items) => items.iter().for_each(|child| descendants(child, out)),
        Value::Object(map) => map.values().for_each(|child| descendants(child, out)),
        _ => {}
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

fn apply<'a>(selector: &Selector, node: &'a Value, out: &mut Vec<&'a Value>) {
    match selector {
        Selector::Name(name) => {
            if let Some(v) = node.as_object().and_then(|m| m.get(name)) {
                out.push(v);
            }
        }
        Selector::Index(index) => {
            if let Some(items) = node.as_array() {
                if let Some(i) = normalize_index(*index, items.len()) {
                    out.push(&items[i]);
                }
            }
        }
        Selector::Wildcard => match node {
            Value::Array(items) => out.extend(items.iter()),
            Value::Object(map) => out.extend(map.values()),
            _ => {}
        },
        Selector::Slice { start, end, step } => {
            if let Some(items) = node.as_array() {
                slice_indices(items.len(), *start, *end, *step)
                    .into_iter()
                    .for_each(|i| out.push(&items[i]));
            }
        }
        Selector::Union(members) => {
            for member in members {
                match member {
                    UnionItem::Name(name) => apply(&Selector::Name(name.clone()), node, out),
                    UnionItem::Index(i) => apply(&Selector::Index(*i), node, out),
                }
            }
        }
        Selector::Filter(predicate) => {
            let candidates: Vec<&Value> = match node {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => Vec::new(),
            };
            for candidate in candidates {
                let ctx = json!({ "item": candidate });
                // Predicates over missing fields are errors in JEXL; those
                // elements simply do not match.
                if expression::evaluate_bool(predicate, &ctx).unwrap_or(false) {
                    out.push(candidate);
                }
            }
        }
    }
}

fn slice_indices(len: usize, start: Option<i64>, end: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let absolute = |v: i64| if v < 0 { len + v } else { v };

    let mut out = Vec::new();
    if step > 0 {
        let lo = start.map(absolute).unwrap_or(0).clamp(0, len);
        let hi = end.map(absolute).unwrap_or(len).clamp(0, len);
        let mut i = lo;
        while i < hi {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        // Negative step walks from `start` down to (excluding) `end`.
        let hi = start.map(absolute).unwrap_or(len - 1).clamp(-1, len - 1);
        let lo = end.map(absolute).unwrap_or(-1).clamp(-1, len - 1);
        let mut i = hi;
        while i > lo {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    raw: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            chars: raw.trim().chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> WorkflowError {
        WorkflowError::JsonPath {
            path: self.raw.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, WorkflowError> {
        if !self.eat('$') {
            return Err(self.error("path must start with '$'"));
        }

        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    if self.eat('.') {
                        let selector = if self.peek() == Some('[') {
                            self.pos += 1;
                            self.bracket()?
                        } else {
                            self.dot_member()?
                        };
                        segments.push(Segment::Descendant(selector));
                    } else {
                        segments.push(Segment::Child(self.dot_member()?));
                    }
                }
                '[' => {
                    self.pos += 1;
                    segments.push(Segment::Child(self.bracket()?));
                }
                other => return Err(self.error(format!("unexpected '{other}' at {}", self.pos))),
            }
        }
        Ok(segments)
    }

    fn dot_member(&mut self) -> Result<Selector, WorkflowError> {
        if self.eat('*') {
            return Ok(Selector::Wildcard);
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '.' || c == '[' || c == ']' || c.is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error(format!("expected member name at {start}")));
        }
        Ok(Selector::Name(self.chars[start..self.pos].iter().collect()))
    }

    /// Parse the inside of `[...]`; the opening bracket is already consumed.
    fn bracket(&mut self) -> Result<Selector, WorkflowError> {
        self.skip_ws();
        let selector = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Selector::Wildcard
            }
            Some('?') => {
                self.pos += 1;
                self.filter()?
            }
            Some('\'') | Some('"') => {
                let mut names = vec![UnionItem::Name(self.quoted()?)];
                while self.union_separator() {
                    names.push(UnionItem::Name(self.quoted()?));
                }
                if names.len() == 1 {
                    match names.pop() {
                        Some(UnionItem::Name(name)) => Selector::Name(name),
                        _ => return Err(self.error("empty name")),
                    }
                } else {
                    Selector::Union(names)
                }
            }
            Some(_) => self.index_or_slice()?,
            None => return Err(self.error("unterminated '['")),
        };
        self.skip_ws();
        if !self.eat(']') {
            return Err(self.error(format!("expected ']' at {}", self.pos)));
        }
        Ok(selector)
    }

    fn union_separator(&mut self) -> bool {
        self.skip_ws();
        let found = self.eat(',');
        self.skip_ws();
        found
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn quoted(&mut self) -> Result<String, WorkflowError> {
        let Some(quote) = self.peek().filter(|c| *c == '\'' || *c == '"') else {
            return Err(self.error(format!("expected quoted name at {}", self.pos)));
        };
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(escaped) = self.peek() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(self.error("unterminated quoted name"))
    }

    fn integer(&mut self) -> Result<Option<i64>, WorkflowError> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| self.error(format!("invalid integer '{text}'")))
    }

    fn index_or_slice(&mut self) -> Result<Selector, WorkflowError> {
        let first = self.integer()?;
        self.skip_ws();
        match self.peek() {
            Some(':') => {
                self.pos += 1;
                let end = self.integer()?;
                self.skip_ws();
                let step = if self.eat(':') {
                    self.integer()?.unwrap_or(1)
                } else {
                    1
                };
                if step == 0 {
                    return Err(self.error("slice step must not be 0"));
                }
                Ok(Selector::Slice {
                    start: first,
                    end,
                    step,
                })
            }
            Some(',') => {
                let first = first.ok_or_else(|| self.error("expected index before ','"))?;
                let mut items = vec![UnionItem::Index(first)];
                while self.union_separator() {
                    let next = self
                        .integer()?
                        .ok_or_else(|| self.error("expected index after ','"))?;
                    items.push(UnionItem::Index(next));
                }
                Ok(Selector::Union(items))
            }
            _ => first
                .map(Selector::Index)
                .ok_or_else(|| self.error(format!("unexpected token at {}", self.pos))),
        }
    }

    /// `?(...)` filter; `?` already consumed.
    fn filter(&mut self) -> Result<Selector, WorkflowError> {
        if !self.eat('(') {
            return Err(self.error("expected '(' after '?'"));
        }
        let start = self.pos;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match (quote, c) {
                (Some(_), '\\') => self.pos += 1,
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '(') => depth += 1,
                (None, ')') => {
                    depth -= 1;
                    if depth == 0 {
                        let body: String = self.chars[start..self.pos - 1].iter().collect();
                        return Ok(Selector::Filter(rewrite_current_node(&body)));
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unterminated filter expression"))
    }
}

/// Replace `@` outside string literals with `item`.
fn rewrite_current_node(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 8);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in body.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '@' => out.push_str("item"),
                '\'' | '"' => {
                    quote = Some(c);
                    out.push(c);
                }
                other => out.push(other),
            },
        }
    }
    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Value {
        json!({
            "data": {
                "value": 42,
                "items": ["a", "b", "c", "d"]
            },
            "users": [
                {"id": 1, "name": "Ann", "age": 34, "active": true},
                {"id": 2, "name": "Bob", "age": 17, "active": true},
                {"id": 3, "name": "Cyd", "age": 52, "active": false},
                {"id": 4, "name": "Dee"}
            ],
            "response": {
                "id": "r-1",
                "meta": {"id": "m-1"},
                "parts": [{"id": "p-1"}, {"id": "p-2"}]
            }
        })
    }

    fn select(path: &str) -> Vec<Value> {
        extract_all(&doc(), path).unwrap()
    }

    #[test]
    fn test_exact_path() {
        assert_eq!(select("$.data.value"), vec![json!(42)]);
        assert_eq!(select("$['data']['value']"), vec![json!(42)]);
        assert!(select("$.data.missing").is_empty());
    }

    #[test]
    fn test_wildcard_preserves_document_order() {
        assert_eq!(
            select("$.users[*].name"),
            vec![json!("Ann"), json!("Bob"), json!("Cyd"), json!("Dee")]
        );
        assert_eq!(select("$.data.*").len(), 2);
    }

    #[test]
    fn test_filter_predicate() {
        let adults = select("$.users[?(@.age > 18)].name");
        assert_eq!(adults, vec![json!("Ann"), json!("Cyd")]);

        let active_adults = select("$.users[?(@.age > 18 && @.active == true)].id");
        assert_eq!(active_adults, vec![json!(1)]);

        let named = select("$.users[?(@.name == 'Bob')].id");
        assert_eq!(named, vec![json!(2)]);
    }

    #[test]
    fn test_indexes_and_slices() {
        assert_eq!(select("$.data.items[0]"), vec![json!("a")]);
        assert_eq!(select("$.data.items[-1]"), vec![json!("d")]);
        assert!(select("$.data.items[10]").is_empty());
        assert_eq!(select("$.data.items[1:3]"), vec![json!("b"), json!("c")]);
        assert_eq!(select("$.data.items[::2]"), vec![json!("a"), json!("c")]);
        assert_eq!(select("$.data.items[-2:]"), vec![json!("c"), json!("d")]);
        assert_eq!(
            select("$.data.items[::-1]"),
            vec![json!("d"), json!("c"), json!("b"), json!("a")]
        );
        assert_eq!(select("$.data.items[0,2]"), vec![json!("a"), json!("c")]);
    }

    #[test]
    fn test_recursive_descent() {
        assert_eq!(
            select("$.response..id"),
            vec![json!("r-1"), json!("m-1"), json!("p-1"), json!("p-2")]
        );
    }

    #[test]
    fn test_object_members_follow_document_order() {
        let root = json!({
            "data": {"zeta": 1, "alpha": 2},
            "response": {"z": {"id": "first"}, "a": {"id": "second"}}
        });
        assert_eq!(extract_all(&root, "$.data.*").unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(
            extract_all(&root, "$.response..id").unwrap(),
            vec![json!("first"), json!("second")]
        );
        assert_eq!(
            extract_all(&root, "$.data[?(@ > 0)]").unwrap(),
            vec![json!(1), json!(2)]
        );

        let parsed: Value = serde_json::from_str(r#"{"m": {"b": 1, "a": 2}}"#).unwrap();
        assert_eq!(extract_all(&parsed, "$.m.*").unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_huge_slice_steps_stop_at_the_bounds() {
        let root = json!({"a": [1, 2, 3, 4, 5]});
        assert_eq!(
            extract_all(&root, "$.a[1:5:9223372036854775807]").unwrap(),
            vec![json!(2)]
        );
        assert_eq!(
            extract_all(&root, "$.a[3::-9223372036854775808]").unwrap(),
            vec![json!(4)]
        );
    }

    #[test]
    fn test_bracket_union_of_names() {
        assert_eq!(select("$.users[0]['name','age']"), vec![json!("Ann"), json!(34)]);
    }

    #[test]
    fn test_extract_definite_vs_indefinite() {
        let root = doc();
        let definite = JsonPath::parse("$.data.value").unwrap();
        assert!(definite.is_definite());
        assert_eq!(definite.extract(&root), Some(json!(42)));

        let many = JsonPath::parse("$.users[*].id").unwrap();
        assert!(!many.is_definite());
        assert_eq!(many.extract(&root), Some(json!([1, 2, 3, 4])));

        let single_filter = JsonPath::parse("$.users[?(@.id == 3)].name").unwrap();
        assert_eq!(single_filter.extract(&root), Some(json!(["Cyd"])));

        assert_eq!(JsonPath::parse("$.nope").unwrap().extract(&root), None);
    }

    #[test]
    fn test_dot_notation_source() {
        let path = JsonPath::from_source("data.items[1]").unwrap();
        assert_eq!(path.extract(&doc()), Some(json!("b")));
        assert_eq!(JsonPath::from_source("$").unwrap().extract(&json!(5)), Some(json!(5)));
    }

    #[test]
    fn test_root_only_matches_document() {
        assert_eq!(select("$"), vec![doc()]);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["data.value", "$.items[", "$.a[?(@.x > 1]", "$.a[1:2:0]", "$.", "$['x"] {
            let err = JsonPath::parse(bad).unwrap_err();
            assert_eq!(err.kind(), "jsonpath_error", "path {bad} should fail");
        }
    }

    #[test]
    fn test_rewrite_current_node_skips_literals() {
        assert_eq!(rewrite_current_node("@.mail == 'a@b'"), "item.mail == 'a@b'");
    }
}
