//! # Agent Control Client
//!
//! Drives a CLI-hosted AI agent running as a subprocess that speaks
//! newline-delimited JSON over stdin/stdout. Async/await, strong typing,
//! tokio-based.
//!
//! ## Quick Start
//!
//! One prompt, one turn, with [`query()`]:
//!
//! ```no_run
//! use agent_control_client::{ClientEvent, ClientOptions, Message, SpawnSpec, query};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions::builder().spawn(SpawnSpec::new("claude")).build();
//!     let mut stream = Box::pin(query("What is 2 + 2?", options));
//!
//!     while let Some(event) = stream.next().await {
//!         if let ClientEvent::Message(Message::Assistant { message, .. }) = event? {
//!             println!("{}", message.text());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Long-lived sessions with [`ControlClient`]
//!
//! The client owns the subprocess and answers the agent's own requests in
//! the background while the application sends messages and control
//! operations:
//!
//! ```no_run
//! # use agent_control_client::{ClientOptions, ControlClient, PermissionMode, SpawnSpec};
//! # async fn example() -> agent_control_client::Result<()> {
//! let options = ClientOptions::builder().spawn(SpawnSpec::new("claude")).build();
//! let mut client = ControlClient::connect(options).await?;
//!
//! client.set_permission_mode(PermissionMode::AcceptEdits).await?;
//! client.send_message("Refactor src/main.rs").await?;
//! // read client.events() ...
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Hooks
//!
//! Intercept tool calls before or after they run:
//!
//! ```no_run
//! # use agent_control_client::{ClientOptions, HookEvent, HookOutput, HookRegistry, SpawnSpec};
//! # use agent_control_client::hooks::HookMatcherBuilder;
//! # use std::collections::HashMap;
//! let guard = HookRegistry::callback(|input, _tool_use_id, _context| async move {
//!     let command = input["tool_input"]["command"].as_str().unwrap_or_default();
//!     if command.contains("rm -rf") {
//!         Ok(HookOutput::block("Refusing recursive delete"))
//!     } else {
//!         Ok(HookOutput::default())
//!     }
//! });
//!
//! let mut hooks = HashMap::new();
//! hooks.insert(
//!     HookEvent::PreToolUse,
//!     vec![HookMatcherBuilder::new(Some("Bash")).add_hook(guard).build()],
//! );
//! let options = ClientOptions::builder()
//!     .spawn(SpawnSpec::new("claude"))
//!     .hooks(hooks)
//!     .build();
//! ```
//!
//! ## Architecture
//!
//! - [`transport`]: subprocess lifecycle and line framing
//! - [`control`]: envelope encoding and decoding
//! - [`streaming`]: partial-message events from raw stream fragments
//! - [`callbacks`], [`dispatch`]: user callbacks and their isolated,
//!   timeout-bounded execution
//! - [`hooks`], [`permissions`]: hook registrations and tool permissions
//! - [`mcp`]: tools served from inside this process
//! - [`client`]: the session actor, handles and subscriptions
//! - [`auth`]: credentials for the spawned process
//! - [`types`], [`error`]: shared types and errors
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for
//! structured logging. Events are always emitted and cost nothing when no
//! subscriber is attached. Subprocess stderr is logged at `debug` under the
//! `agent_control_client::stderr` target.
//!
//! ## Security
//!
//! - Loader and interpreter injection variables (`LD_PRELOAD`,
//!   `NODE_OPTIONS`, `PATH`, ...) are rejected in the spawn environment
//! - Callbacks run under timeouts (default 60 seconds) and receive
//!   cancellation tokens
//! - Inbound lines are bounded by a configurable maximum (default 1 MiB)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod callbacks;
pub mod client;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod mcp;
pub mod permissions;
pub mod query;
pub mod streaming;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use callbacks::{
    CallbackOutput, FnHookCallback, FnPermissionCallback, HookCallback, PermissionCallback,
};
pub use client::{ClientHandle, ControlClient, Subscription};
pub use error::{AgentError, ErrorCategory, Result};
pub use hooks::{HookMatcherBuilder, HookRegistry};
pub use mcp::{SdkMcpServer, ToolDescriptor, ToolOutput};
pub use permissions::PermissionManager;
pub use query::{query, query_with_transport};
pub use streaming::{StreamAccumulator, StreamEvent};
pub use transport::{CloseMode, SubprocessTransport, Transport, TransportEvent};
pub use types::{
    CanUseToolCallback, ClientEvent, ClientOptions, ClientOptionsBuilder, ClientState,
    CloseReason, ContentBlock, Decision, HookContext, HookDecision, HookEvent, HookMatcher,
    HookOutput, Message, PermissionMode, PermissionResult, PermissionResultAllow,
    PermissionResultDeny, PermissionUpdate, RequestId, SessionId, SessionSnapshot, SpawnSpec,
    SpawnSpecBuilder, StderrCallback, SubscriberId, ToolName, ToolPermissionContext, Verdict,
};

/// Version of the crate, reported to the agent in its environment
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
