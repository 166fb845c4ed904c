//! Variable context shared by every task of a workflow run.
//!
//! The root store is a single JSON object behind an `RwLock`: concurrent
//! reads, serialized writes. A forked scope shares the same store, so writes
//! to target paths are visible to the parent immediately, while its private
//! bindings (a loop variable, `_piped_input`) live only in the fork. `merge`
//! folds a child's record of assigned paths back into the parent so nested
//! scopes keep an accurate write journal.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use super::definition::WorkflowError;
use super::expression::type_name;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step of a variable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse `a.b[0].c` into segments. A leading `$` is ignored.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, WorkflowError> {
    let invalid = |reason: &str| WorkflowError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = path.trim().trim_start_matches('$');
    if trimmed.is_empty() {
        return Err(invalid("path is empty"));
    }

    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if key.is_empty() && (rest.is_empty() || segments.is_empty()) {
            return Err(invalid("empty path segment"));
        }
        if !key.is_empty() {
            segments.push(PathSegment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let Some(close) = rest.find(']') else {
                return Err(invalid("unclosed '['"));
            };
            let index = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid("index must be a non-negative integer"))?;
            segments.push(PathSegment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid("unexpected characters after ']'"));
            }
        }
    }
    Ok(segments)
}

/// Look up a parsed path inside a JSON value.
pub fn lookup<'a>(root: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Key(key) => match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        },
        PathSegment::Index(i) => current.as_array().and_then(|items| items.get(*i)),
    })
}

/// Write `value` at a parsed path, creating missing intermediate segments.
fn assign(root: &mut Value, segments: &[PathSegment], value: Value, path: &str) -> Result<(), WorkflowError> {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for (segment, next) in parents.iter().zip(segments.iter().skip(1)) {
        let empty = match next {
            PathSegment::Key(_) => Value::Object(Map::new()),
            PathSegment::Index(_) => Value::Array(Vec::new()),
        };
        current = child_slot(current, segment, empty, path)?;
    }

    match (last, current) {
        (PathSegment::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (PathSegment::Index(i), Value::Array(items)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            items[*i] = value;
            Ok(())
        }
        (_, other) => Err(WorkflowError::InvalidPath {
            path: path.to_string(),
            reason: format!("cannot assign into a value of type {}", type_name(other)),
        }),
    }
}

fn child_slot<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    empty: Value,
    path: &str,
) -> Result<&'a mut Value, WorkflowError> {
    match (segment, current) {
        (PathSegment::Key(key), Value::Object(map)) => {
            let slot = map.entry(key.clone()).or_insert(Value::Null);
            if slot.is_null() {
                *slot = empty;
            }
            Ok(slot)
        }
        (PathSegment::Index(i), Value::Array(items)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            let slot = &mut items[*i];
            if slot.is_null() {
                *slot = empty;
            }
            Ok(slot)
        }
        (_, other) => Err(WorkflowError::InvalidPath {
            path: path.to_string(),
            reason: format!("intermediate segment has type {}", type_name(other)),
        }),
    }
}

// ---------------------------------------------------------------------------
// VariableContext
// ---------------------------------------------------------------------------

/// A scope over the run's shared variable store.
#[derive(Debug, Clone)]
pub struct VariableContext {
    store: Arc<RwLock<Value>>,
    locals: Map<String, Value>,
    assigned: Vec<String>,
}

impl Default for VariableContext {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl VariableContext {
    /// Create a root context seeded with `variables`.
    pub fn new(variables: Map<String, Value>) -> Self {
        Self {
            store: Arc::new(RwLock::new(Value::Object(variables))),
            locals: Map::new(),
            assigned: Vec::new(),
        }
    }

    /// Read the value at a dotted path. Private bindings shadow shared ones.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = parse_path(path).ok()?;
        self.get_segments(&segments)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn get_segments(&self, segments: &[PathSegment]) -> Option<Value> {
        let (head, tail) = segments.split_first()?;
        if let PathSegment::Key(root) = head {
            if let Some(local) = self.locals.get(root) {
                return lookup(local, tail).cloned();
            }
        }
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&store, segments).cloned()
    }

    /// Write a value at a dotted path, creating intermediate objects/arrays.
    ///
    /// Paths rooted at a private binding update that binding; everything else
    /// is written through to the shared store and recorded as an assignment.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), WorkflowError> {
        let segments = parse_path(path)?;
        if let Some(PathSegment::Key(root)) = segments.first() {
            if let Some(local) = self.locals.get_mut(root) {
                return assign(local, &segments[1..], value, path);
            }
        }

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        assign(&mut store, &segments, value, path)?;
        drop(store);
        self.assigned.push(path.to_string());
        Ok(())
    }

    /// Apply several writes as one unit: either all land or none do, and no
    /// other writer interleaves with them.
    pub fn set_many(&mut self, entries: Vec<(String, Value)>) -> Result<(), WorkflowError> {
        if entries.is_empty() {
            return Ok(());
        }

        let parsed = entries
            .into_iter()
            .map(|(path, value)| Ok((parse_path(&path)?, path, value)))
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let mut staged = store.clone();
        let mut staged_locals = self.locals.clone();
        let mut written = Vec::new();
        for (segments, path, value) in parsed {
            let local_root = match segments.first() {
                Some(PathSegment::Key(root)) if staged_locals.contains_key(root) => {
                    Some(root.clone())
                }
                _ => None,
            };
            match local_root.and_then(|root| staged_locals.get_mut(&root)) {
                Some(local) => assign(local, &segments[1..], value, &path)?,
                None => {
                    assign(&mut staged, &segments, value, &path)?;
                    written.push(path);
                }
            }
        }
        *store = staged;
        drop(store);

        self.locals = staged_locals;
        self.assigned.extend(written);
        Ok(())
    }

    /// Bind a private variable visible only to this scope and its forks.
    pub fn bind_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    /// Create a child scope sharing the store and inheriting private bindings.
    pub fn fork(&self) -> VariableContext {
        VariableContext {
            store: Arc::clone(&self.store),
            locals: self.locals.clone(),
            assigned: Vec::new(),
        }
    }

    /// Fold a child's explicit assignments back into this scope.
    ///
    /// Values already live in the shared store; the child's paths join this
    /// scope's journal. Private bindings of the child are discarded. A child
    /// from a different store has its assigned values copied over.
    pub fn merge(&mut self, child: VariableContext) -> Result<(), WorkflowError> {
        if !Arc::ptr_eq(&self.store, &child.store) {
            let entries = child
                .assigned
                .iter()
                .filter_map(|path| {
                    let segments = parse_path(path).ok()?;
                    let store = child.store.read().unwrap_or_else(PoisonError::into_inner);
                    lookup(&store, &segments).cloned().map(|v| (path.clone(), v))
                })
                .collect();
            return self.set_many(entries);
        }
        self.assigned.extend(child.assigned);
        Ok(())
    }

    /// Paths written through this scope (and merged children), in order.
    pub fn assigned_paths(&self) -> &[String] {
        &self.assigned
    }

    /// Copy of the shared store, without private bindings.
    pub fn snapshot(&self) -> Map<String, Value> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        match &*store {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }

    /// The object expressions evaluate against: shared variables overlaid
    /// with this scope's private bindings.
    pub fn to_expression_context(&self) -> Value {
        let mut view = self.snapshot();
        for (name, value) in &self.locals {
            view.insert(name.clone(), value.clone());
        }
        Value::Object(view)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
