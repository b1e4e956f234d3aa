//! SDK-hosted tool servers
//!
//! Tools registered here run inside the client process. The agent reaches
//! them through `mcp_message` control requests carrying JSON-RPC messages;
//! the client routes each message to the server named in the request and
//! sends back the JSON-RPC answer.
//!
//! ```no_run
//! use agent_control_client::mcp::{SdkMcpServer, ToolDescriptor, ToolOutput};
//! use serde_json::json;
//!
//! # fn main() -> agent_control_client::Result<()> {
//! let server = SdkMcpServer::new("greeter", "1.0.0").with_tool(ToolDescriptor::from_fn(
//!     "greet",
//!     "Greet someone by name",
//!     json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
//!     |args| async move {
//!         let name = args["name"].as_str().unwrap_or("stranger");
//!         Ok(ToolOutput::text(format!("Hello, {name}!")))
//!     },
//! ))?;
//! # let _ = server;
//! # Ok(())
//! # }
//! ```

mod server;
mod tool;

pub use server::{
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION, SdkMcpServer, TOOL_ERROR,
    rpc_error, rpc_result,
};
pub use tool::{ToolContent, ToolDescriptor, ToolError, ToolHandler, ToolOutput};
