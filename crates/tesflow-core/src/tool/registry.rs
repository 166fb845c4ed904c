//! Tool registry: maps the `tool` field of task nodes to callables.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::box_tool::BoxTool;
use super::callable::{Tool, ToolError};

/// Registered tools, keyed by name. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<BoxTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(BoxTool::new(tool))).is_some() {
            tracing::debug!(tool = %name, "replaced registered tool");
        }
        self
    }

    /// Register an async closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(FnTool {
            name: name.into(),
            f,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxTool> {
        self.tools.values().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

struct FnTool<F> {
    name: String,
    f: F,
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, params: Value) -> impl Future<Output = Result<Value, ToolError>> + Send {
        (self.f)(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_fn_and_call() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("upper", |params: Value| async move {
            let text = params["text"].as_str().unwrap_or_default().to_uppercase();
            Ok::<_, ToolError>(json!({ "text": text }))
        });

        let tool = registry.get("upper").unwrap();
        let out = tool.call(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!({"text": "HI"}));
    }

    #[test]
    fn names_are_sorted_and_lookup_misses_are_none() {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn("zeta", |_| async { Ok::<_, ToolError>(Value::Null) })
            .register_fn("alpha", |_| async { Ok::<_, ToolError>(Value::Null) });
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("missing").is_none());
        assert!(registry.contains("alpha"));
    }

    #[test]
    fn re_registering_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("t", |_| async { Ok::<_, ToolError>(json!(1)) });
        registry.register_fn("t", |_| async { Ok::<_, ToolError>(json!(2)) });
        assert_eq!(registry.len(), 1);
    }
}
