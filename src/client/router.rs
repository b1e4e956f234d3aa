//! Routing of agent-initiated control requests

use serde_json::{Value, json};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::control::{HookCallbackRequest, InboundRequest};
use crate::dispatch::run_hook_chain;
use crate::error::AgentError;
use crate::hooks::HookRegistry;
use crate::mcp::{METHOD_NOT_FOUND, SdkMcpServer, rpc_error};
use crate::permissions::PermissionManager;
use crate::types::{Decision, DispatchFailure, HookContext, HookEvent, RequestId};

/// Session facts handed to callbacks
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionInfo {
    pub(crate) session_id: Option<String>,
    pub(crate) cwd: Option<String>,
}

/// Answer to one request: success payload or error message
pub(crate) type Reply = std::result::Result<Value, String>;

pub(crate) struct Router {
    hooks: HookRegistry,
    permissions: PermissionManager,
    servers: HashMap<String, SdkMcpServer>,
}

impl Router {
    pub(crate) fn new(
        hooks: HookRegistry,
        permissions: PermissionManager,
        servers: impl IntoIterator<Item = SdkMcpServer>,
    ) -> Self {
        Self {
            hooks,
            permissions,
            servers: servers
                .into_iter()
                .map(|server| (server.name().to_string(), server))
                .collect(),
        }
    }

    pub(crate) fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub(crate) fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Produce the answer to one request
    pub(crate) async fn handle(
        &self,
        request_id: &RequestId,
        request: InboundRequest,
        session: SessionInfo,
        cancel: &CancellationToken,
    ) -> Reply {
        tracing::debug!(request_id = %request_id, subtype = request.subtype(), "Routing control request");

        match request {
            InboundRequest::HookCallback(hook) => {
                self.run_hooks(request_id, hook, session, cancel).await
            }
            InboundRequest::CanUseTool(check) => {
                let original_input = check.input.clone();
                let decision = self
                    .permissions
                    .check(check, request_id.as_str(), cancel)
                    .await
                    .map_err(|e| e.to_string())?;
                into_reply(&decision, |d| d.to_permission_response(&original_input))
            }
            InboundRequest::McpMessage(message) => {
                let Some(server) = self.servers.get(&message.server_name) else {
                    let id = message.message.get("id").cloned().unwrap_or(Value::Null);
                    tracing::warn!(server = %message.server_name, "Message for unknown tool server");
                    return Ok(json!({
                        "mcp_response": rpc_error(&id, METHOD_NOT_FOUND, format!("server not found: {}", message.server_name))
                    }));
                };
                let response = server.handle_message(message.message, cancel).await;
                if cancel.is_cancelled() {
                    return Err(DispatchFailure::Cancelled.to_string());
                }
                Ok(json!({"mcp_response": response}))
            }
            InboundRequest::Unsupported { subtype } => {
                tracing::warn!(request_id = %request_id, subtype = %subtype, "Unsupported control request");
                Err(AgentError::control_protocol(format!(
                    "Unsupported control request subtype: {subtype}"
                ))
                .to_string())
            }
            InboundRequest::Invalid { subtype, reason } => {
                tracing::warn!(request_id = %request_id, subtype = %subtype, reason = %reason, "Malformed control request");
                Err(AgentError::control_protocol(format!("Invalid {subtype} request: {reason}"))
                    .to_string())
            }
        }
    }

    async fn run_hooks(
        &self,
        request_id: &RequestId,
        hook: HookCallbackRequest,
        session: SessionInfo,
        cancel: &CancellationToken,
    ) -> Reply {
        let input = hook.merged_input();
        let tool_name = hook.tool_name().map(String::from);
        let context = HookContext::new(session.session_id, session.cwd, Some(cancel.clone()));

        let chain = match hook.callback_id.as_deref() {
            Some(callback_id) => match self.hooks.callback_by_id(callback_id) {
                Some(link) => vec![link],
                None if tool_name.is_none() => {
                    return Err(AgentError::control_protocol(format!(
                        "Unknown hook callback: {callback_id}"
                    ))
                    .to_string());
                }
                None => self.chain_by_tool(&hook, tool_name.as_deref()),
            },
            None => self.chain_by_tool(&hook, tool_name.as_deref()),
        };

        let decision = run_hook_chain(
            chain,
            input,
            hook.tool_use_id,
            context,
            request_id.as_str(),
            cancel,
        )
        .await;
        into_reply(&decision, Decision::to_hook_response)
    }

    fn chain_by_tool(
        &self,
        hook: &HookCallbackRequest,
        tool_name: Option<&str>,
    ) -> Vec<crate::hooks::ChainLink> {
        let event = hook
            .hook_event_name()
            .and_then(HookEvent::from_name)
            .unwrap_or(HookEvent::PreToolUse);
        self.hooks.chain_for(event, tool_name)
    }
}

/// A timed-out callback still yields a (deny) answer; failures and
/// cancellation become error responses.
fn into_reply(decision: &Decision, render: impl FnOnce(&Decision) -> Value) -> Reply {
    match &decision.failure {
        None | Some(DispatchFailure::TimedOut(_)) => Ok(render(decision)),
        Some(failure) => Err(failure.to_string()),
    }
}
