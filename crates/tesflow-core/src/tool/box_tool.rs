//! BoxTool -- object-safe dynamic dispatch wrapper for `Tool`.
//!
//! 1. `ToolDyn` is an object-safe mirror of `Tool` with a boxed future
//! 2. every `T: Tool` gets `ToolDyn` through a blanket impl
//! 3. `BoxTool` wraps `Box<dyn ToolDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::callable::{Tool, ToolError};

/// Object-safe version of [`Tool`] with a boxed future.
pub trait ToolDyn: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn call_boxed<'a>(
        &'a self,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;
}

impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> &str {
        Tool::description(self)
    }

    fn call_boxed<'a>(
        &'a self,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        Box::pin(self.call(params))
    }
}

/// Type-erased tool, so tools of different concrete types can share a
/// registry.
pub struct BoxTool {
    inner: Box<dyn ToolDyn>,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        Self {
            inner: Box::new(tool),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn description(&self) -> &str {
        self.inner.description()
    }

    pub async fn call(&self, params: Value) -> Result<Value, ToolError> {
        self.inner.call_boxed(params).await
    }
}

impl std::fmt::Debug for BoxTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTool").field("name", &self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler;

    impl Tool for Doubler {
        fn name(&self) -> &str {
            "double"
        }

        async fn call(&self, params: Value) -> Result<Value, ToolError> {
            let n = params["n"]
                .as_i64()
                .ok_or_else(|| ToolError::InvalidParameters("'n' must be an integer".into()))?;
            Ok(json!({ "result": n * 2 }))
        }
    }

    #[tokio::test]
    async fn box_tool_delegates_to_inner() {
        let tool = BoxTool::new(Doubler);
        assert_eq!(tool.name(), "double");
        assert_eq!(tool.description(), "");
        assert_eq!(tool.call(json!({"n": 21})).await.unwrap(), json!({"result": 42}));
    }

    #[tokio::test]
    async fn box_tool_propagates_errors() {
        let err = BoxTool::new(Doubler).call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
