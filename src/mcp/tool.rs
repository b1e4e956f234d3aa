//! Tool descriptors and handlers for in-process tool servers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Content item in a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Base64 image
    Image {
        /// Base64-encoded bytes
        data: String,
        /// MIME type, e.g. `image/png`
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Result of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result content
    pub content: Vec<ToolContent>,
    /// Tool-level failure the model should see
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Text result flagged as a tool error
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Error returned by a tool handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl From<String> for ToolError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for ToolError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Implementation of a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the arguments the model supplied
    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError>;
}

struct FnToolHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        (self.func)(arguments).await
    }
}

/// A tool exposed to the agent
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Tool name, unique per server
    pub name: String,
    /// Description shown to the model
    pub description: String,
    /// JSON schema of the arguments
    pub input_schema: Value,
    /// The implementation
    pub handler: Arc<dyn ToolHandler>,
    /// Per-call timeout; the server default applies when unset
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Describe a tool backed by a [`ToolHandler`]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
            timeout: None,
        }
    }

    /// Describe a tool backed by an async closure
    ///
    /// ```no_run
    /// use agent_control_client::mcp::{ToolDescriptor, ToolOutput};
    /// use serde_json::json;
    ///
    /// let add = ToolDescriptor::from_fn(
    ///     "add",
    ///     "Add two numbers",
    ///     json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}),
    ///     |args| async move {
    ///         let a = args["a"].as_f64().ok_or("a must be a number")?;
    ///         let b = args["b"].as_f64().ok_or("b must be a number")?;
    ///         Ok(ToolOutput::text(format!("{}", a + b)))
    ///     },
    /// );
    /// ```
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        func: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self::new(name, description, input_schema, FnToolHandler { func })
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wire form used in `tools/list`
    #[must_use]
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_wire_shape() {
        assert_eq!(
            serde_json::to_value(ToolOutput::text("4")).unwrap(),
            json!({"content": [{"type": "text", "text": "4"}], "isError": false})
        );
    }

    #[tokio::test]
    async fn test_from_fn_handler() {
        let tool = ToolDescriptor::from_fn("echo", "Echo input", json!({"type": "object"}), |args| async move {
            Ok(ToolOutput::text(args["msg"].as_str().unwrap_or_default()))
        });
        let output = tool.handler.call(json!({"msg": "hi"})).await.unwrap();
        assert_eq!(output, ToolOutput::text("hi"));
        assert_eq!(tool.to_wire()["inputSchema"], json!({"type": "object"}));
    }
}
