//! The `Tool` trait.

use serde_json::Value;

/// Failure reported by a tool call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The parameters did not have the shape the tool expects.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The tool ran and reported failure.
    #[error("{0}")]
    Failed(String),

    /// The tool could not be started at all.
    #[error("tool unavailable: {0}")]
    Unavailable(String),
}

/// An externally registered callable.
///
/// Receives the node's resolved parameters as a JSON object and returns a
/// JSON result. The engine treats the call as opaque: it may be retried,
/// abandoned on timeout, or invoked concurrently with other calls.
///
/// Uses native async fn in traits (RPITIT); see [`super::BoxTool`] for
/// dynamic dispatch.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn call(
        &self,
        params: Value,
    ) -> impl std::future::Future<Output = Result<Value, ToolError>> + Send;
}
