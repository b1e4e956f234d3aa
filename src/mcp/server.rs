//! In-process tool server speaking the JSON-RPC subset the agent uses

use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::tool::ToolDescriptor;
use crate::dispatch::{DEFAULT_CALLBACK_TIMEOUT, isolate};
use crate::error::{AgentError, Result};

/// Protocol version reported in the `initialize` answer
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Unknown method or server
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Unknown tool or malformed call parameters
pub const INVALID_PARAMS: i64 = -32602;
/// Handler panicked or timed out
pub const INTERNAL_ERROR: i64 = -32603;
/// Handler returned an error
pub const TOOL_ERROR: i64 = -32000;

/// JSON-RPC success envelope
#[must_use]
pub fn rpc_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// JSON-RPC error envelope
#[must_use]
pub fn rpc_error(id: &Value, code: i64, message: impl AsRef<str>) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message.as_ref()}})
}

/// Tool server living inside the client process
///
/// Tools are listed in registration order. Names are unique.
#[derive(Debug, Clone)]
pub struct SdkMcpServer {
    name: String,
    version: String,
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    default_timeout: Duration,
}

impl SdkMcpServer {
    /// Create an empty server
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: Vec::new(),
            index: HashMap::new(),
            default_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Register a tool, consuming and returning the server
    ///
    /// # Errors
    /// Returns `Mcp` if a tool with the same name exists
    pub fn with_tool(mut self, tool: ToolDescriptor) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Register a tool
    ///
    /// # Errors
    /// Returns `Mcp` if a tool with the same name exists
    pub fn register(&mut self, tool: ToolDescriptor) -> Result<()> {
        if self.index.contains_key(&tool.name) {
            return Err(AgentError::mcp(format!(
                "Duplicate tool '{}' on server '{}'",
                tool.name, self.name
            )));
        }
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Set the timeout for tools without their own
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Server name, as advertised in `initialize`
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server version
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a tool
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// All tools, in registration order
    #[must_use]
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Answer one JSON-RPC message
    ///
    /// Always produces a response envelope; failures are reported as
    /// JSON-RPC errors, never as a Rust error.
    pub async fn handle_message(&self, message: Value, cancel: &CancellationToken) -> Value {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));

        tracing::debug!(server = %self.name, method, "Tool server message");

        match method {
            "initialize" => rpc_result(
                &id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": self.name, "version": self.version},
                }),
            ),
            "notifications/initialized" | "ping" => rpc_result(&id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self.tools.iter().map(ToolDescriptor::to_wire).collect();
                rpc_result(&id, json!({"tools": tools}))
            }
            "tools/call" => self.call_tool(&id, &params, cancel).await,
            "resources/list" => rpc_result(&id, json!({"resources": []})),
            "resources/templates/list" => rpc_result(&id, json!({"resourceTemplates": []})),
            "prompts/list" => rpc_result(&id, json!({"prompts": []})),
            other => rpc_error(&id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        }
    }

    async fn call_tool(&self, id: &Value, params: &Value, cancel: &CancellationToken) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return rpc_error(id, INVALID_PARAMS, "Missing tool name");
        };
        let Some(tool) = self.get(name) else {
            return rpc_error(id, INVALID_PARAMS, format!("Tool not found: {name}"));
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let handler = tool.handler.clone();
        let timeout = tool.timeout.unwrap_or(self.default_timeout);
        let correlation = format!("{}/{}", self.name, name);

        match isolate(&correlation, timeout, cancel, async move {
            handler.call(arguments).await
        })
        .await
        {
            Ok(Ok(output)) => match serde_json::to_value(output) {
                Ok(result) => rpc_result(id, result),
                Err(e) => rpc_error(id, INTERNAL_ERROR, e.to_string()),
            },
            Ok(Err(e)) => {
                tracing::debug!(tool = %correlation, error = %e, "Tool returned an error");
                rpc_error(id, TOOL_ERROR, e.to_string())
            }
            Err(failure) => rpc_error(id, INTERNAL_ERROR, failure.to_string()),
        }
    }
}
