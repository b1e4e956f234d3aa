//! Client configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;

use super::hooks::{HookEvent, HookMatcher};
use super::identifiers::ToolName;
use super::permissions::{CanUseToolCallback, PermissionMode};
use crate::auth::CredentialSource;
use crate::dispatch::DEFAULT_CALLBACK_TIMEOUT;
use crate::mcp::SdkMcpServer;

/// Default maximum length of a single protocol line (1 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default timeout for the `initialize` handshake; cold starts can be slow
pub const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for every other SDK-initiated control request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time the subprocess gets to exit after stdin is closed
pub const DEFAULT_CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

// ============================================================================
// Stderr Callback
// ============================================================================

/// Callback for stderr output
///
/// Invoked once per line the agent writes to stderr.
pub type StderrCallback = Arc<dyn Fn(String) + Send + Sync>;

// ============================================================================
// Spawning
// ============================================================================

/// How to start the agent subprocess
///
/// Building the agent's command line is up to the caller; the transport runs
/// `program` with `args` exactly as given.
#[derive(Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for SpawnSpec"),
    builder_type(doc = "Builder for SpawnSpec", vis = "pub"),
    build_method(doc = "Build the SpawnSpec")
)]
pub struct SpawnSpec {
    /// Executable name (resolved through `PATH`) or path
    #[builder(setter(into))]
    pub program: PathBuf,

    /// Arguments passed to the executable
    #[builder(default, setter(into))]
    pub args: Vec<String>,

    /// Working directory for the subprocess
    #[builder(default, setter(strip_option, into))]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, layered over the inherited environment
    #[builder(default)]
    pub env: HashMap<String, String>,

    /// Receives stderr lines
    #[builder(default, setter(strip_option))]
    pub stderr: Option<StderrCallback>,

    /// Maximum length of a single stdout line
    #[builder(default = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_buffer_size: usize,
}

impl SpawnSpec {
    /// Spec running `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self::builder().program(program).build()
    }
}

impl std::fmt::Debug for SpawnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("stderr", &self.stderr.as_ref().map(|_| "<callback>"))
            .field("max_buffer_size", &self.max_buffer_size)
            .finish()
    }
}

// ============================================================================
// Client Options
// ============================================================================

/// Options for [`ControlClient`](crate::ControlClient)
#[derive(Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ClientOptions"),
    builder_type(doc = "Builder for ClientOptions", vis = "pub"),
    build_method(doc = "Build the ClientOptions")
)]
pub struct ClientOptions {
    /// How to start the agent
    pub spawn: SpawnSpec,

    /// Model the session starts with
    #[builder(default, setter(strip_option, into))]
    pub model: Option<String>,

    /// Permission mode the session starts with
    #[builder(default, setter(strip_option))]
    pub permission_mode: Option<PermissionMode>,

    /// Hook configuration
    #[builder(default, setter(strip_option))]
    pub hooks: Option<HashMap<HookEvent, Vec<HookMatcher>>>,

    /// Permission callback consulted on `can_use_tool`
    #[builder(default, setter(strip_option))]
    pub can_use_tool: Option<CanUseToolCallback>,

    /// How long `can_use_tool` may run before the call is denied
    #[builder(default = DEFAULT_CALLBACK_TIMEOUT)]
    pub permission_timeout: Duration,

    /// Tools allowed without consulting the permission callback
    #[builder(default, setter(into))]
    pub allowed_tools: Vec<ToolName>,

    /// Tools denied without consulting the permission callback
    #[builder(default, setter(into))]
    pub disallowed_tools: Vec<ToolName>,

    /// In-process tool servers
    #[builder(default)]
    pub sdk_mcp_servers: Vec<SdkMcpServer>,

    /// Parse `stream_event` messages into [`StreamEvent`](crate::streaming::StreamEvent)s
    #[builder(default)]
    pub include_partial_messages: bool,

    /// Timeout for the `initialize` handshake
    #[builder(default = DEFAULT_INITIALIZE_TIMEOUT)]
    pub initialize_timeout: Duration,

    /// Timeout for other control requests
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,

    /// Time the subprocess gets to exit on close before it is killed
    #[builder(default = DEFAULT_CLOSE_GRACE_PERIOD)]
    pub close_grace_period: Duration,

    /// Prepares credentials in the spawn environment
    #[builder(default, setter(strip_option))]
    pub credentials: Option<Arc<dyn CredentialSource>>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("spawn", &self.spawn)
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field(
                "hooks",
                &self
                    .hooks
                    .as_ref()
                    .map(|h| format!("[{} events]", h.len())),
            )
            .field(
                "can_use_tool",
                &self.can_use_tool.as_ref().map(|_| "<callback>"),
            )
            .field("permission_timeout", &self.permission_timeout)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field(
                "sdk_mcp_servers",
                &self
                    .sdk_mcp_servers
                    .iter()
                    .map(SdkMcpServer::name)
                    .collect::<Vec<_>>(),
            )
            .field("include_partial_messages", &self.include_partial_messages)
            .field("initialize_timeout", &self.initialize_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("close_grace_period", &self.close_grace_period)
            .field("credentials", &self.credentials.as_ref().map(|_| "<source>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::builder()
            .spawn(SpawnSpec::new("claude"))
            .build();
        assert_eq!(options.initialize_timeout, DEFAULT_INITIALIZE_TIMEOUT);
        assert_eq!(options.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(options.permission_timeout, DEFAULT_CALLBACK_TIMEOUT);
        assert_eq!(options.spawn.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
        assert!(!options.include_partial_messages);
        assert!(options.hooks.is_none());
    }

    #[test]
    fn test_debug_hides_env_values() {
        let mut env = HashMap::new();
        env.insert("ANTHROPIC_API_KEY".to_string(), "sk-secret".to_string());
        let spec = SpawnSpec::builder().program("claude").env(env).build();
        let rendered = format!("{spec:?}");
        assert!(rendered.contains("ANTHROPIC_API_KEY"));
        assert!(!rendered.contains("sk-secret"));
    }
}
