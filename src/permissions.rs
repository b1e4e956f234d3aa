//! Tool permission checks
//!
//! Answers `can_use_tool` requests: the disallowed list wins, then the
//! allowed list, then the configured callback.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::callbacks::{CallbackOutput, FnPermissionCallback};
use crate::control::CanUseToolRequest;
use crate::dispatch::{self, DEFAULT_CALLBACK_TIMEOUT};
use crate::error::{AgentError, Result};
use crate::types::{CanUseToolCallback, Decision, ToolName, ToolPermissionContext};

/// Permission policy for one client
#[derive(Clone, Default)]
pub struct PermissionManager {
    allowed: HashSet<ToolName>,
    disallowed: HashSet<ToolName>,
    callback: Option<CanUseToolCallback>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionManager")
            .field("allowed", &self.allowed)
            .field("disallowed", &self.disallowed)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl PermissionManager {
    /// Create a manager
    pub fn new(
        allowed: impl IntoIterator<Item = ToolName>,
        disallowed: impl IntoIterator<Item = ToolName>,
        callback: Option<CanUseToolCallback>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            disallowed: disallowed.into_iter().collect(),
            callback,
            timeout: None,
        }
    }

    /// Override the callback timeout (default 60 seconds)
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Decide a `can_use_tool` request
    ///
    /// # Errors
    /// Returns `Permission` when the tool is on neither list and no callback
    /// is configured
    pub async fn check(
        &self,
        request: CanUseToolRequest,
        correlation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let tool = request.tool_name;

        if self.disallowed.contains(&tool) {
            tracing::debug!(tool = %tool, "Tool is disallowed");
            return Ok(Decision::deny(format!("Tool {tool} is disallowed")));
        }
        if self.allowed.contains(&tool) {
            tracing::debug!(tool = %tool, "Tool is allowed");
            return Ok(Decision::allow());
        }

        let Some(callback) = self.callback.clone() else {
            return Err(AgentError::permission(format!(
                "No permission callback configured for {tool}"
            )));
        };

        let context = ToolPermissionContext {
            suggestions: request.permission_suggestions,
            blocked_path: request.blocked_path,
            tool_use_id: request.tool_use_id,
            cancellation_token: Some(cancel.clone()),
        };
        let input = request.input;
        let tool_name = tool.to_string();
        let timeout = self.timeout.unwrap_or(DEFAULT_CALLBACK_TIMEOUT);

        Ok(dispatch::invoke(correlation_id, timeout, cancel, async move {
            callback.call(tool_name, input, context).await
        })
        .await)
    }

    /// Create a permission callback from a closure
    ///
    /// ```no_run
    /// use agent_control_client::permissions::PermissionManager;
    ///
    /// let read_only = PermissionManager::callback(|tool_name, _input, _ctx| async move {
    ///     Ok(matches!(tool_name.as_str(), "Read" | "Glob" | "Grep"))
    /// });
    /// ```
    pub fn callback<F, Fut, R>(f: F) -> CanUseToolCallback
    where
        F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R>> + Send + 'static,
        R: Into<CallbackOutput>,
    {
        Arc::new(FnPermissionCallback::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PermissionResult, Verdict};
    use serde_json::json;

    fn request(tool: &str) -> CanUseToolRequest {
        CanUseToolRequest {
            tool_name: ToolName::from(tool),
            input: json!({"command": "ls"}),
            permission_suggestions: Vec::new(),
            blocked_path: None,
            tool_use_id: Some("toolu_1".into()),
        }
    }

    #[tokio::test]
    async fn test_lists_take_precedence() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callback = PermissionManager::callback(move |_tool, _input, _ctx| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(true) }
        });
        let manager = PermissionManager::new(
            [ToolName::from("Read")],
            [ToolName::from("Bash")],
            Some(callback),
        );
        let cancel = CancellationToken::new();

        let decision = manager.check(request("Bash"), "r1", &cancel).await.unwrap();
        assert!(decision.is_deny());
        let decision = manager.check(request("Read"), "r2", &cancel).await.unwrap();
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_callback_sees_context() {
        let callback = PermissionManager::callback(|tool, input, ctx| async move {
            assert_eq!(ctx.tool_use_id.as_deref(), Some("toolu_1"));
            assert!(ctx.cancellation_token.is_some());
            if tool == "Bash" {
                Ok(PermissionResult::allow_with_input(json!({"command": format!("{} -la", input["command"].as_str().unwrap_or_default())})))
            } else {
                Ok(PermissionResult::deny("no"))
            }
        });
        let manager = PermissionManager::new([], [], Some(callback));

        let decision = manager
            .check(request("Bash"), "r3", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(decision.modified_input(), Some(&json!({"command": "ls -la"})));
    }

    #[tokio::test]
    async fn test_missing_callback_is_error() {
        let manager = PermissionManager::default();
        let err = manager
            .check(request("Write"), "r4", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Permission(_)));
    }
}
