//! Hook events, hook callback output and matcher registrations

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Hook Events
// ============================================================================

/// Point in the agent's loop at which hooks fire
///
/// The derived ordering is the order in which events are laid out when the
/// hook configuration is sent to the agent, which keeps callback ids stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookEvent {
    /// A tool call is about to run
    PreToolUse,
    /// A tool call finished
    PostToolUse,
    /// A tool call failed
    PostToolUseFailure,
    /// The agent emitted a notification
    Notification,
    /// A prompt was submitted
    UserPromptSubmit,
    /// Session start
    SessionStart,
    /// Session end
    SessionEnd,
    /// The agent finished responding
    Stop,
    /// Subagent start
    SubagentStart,
    /// Subagent finish
    SubagentStop,
    /// History is about to be compacted
    PreCompact,
    /// The agent is about to show a permission prompt
    PermissionRequest,
}

impl HookEvent {
    /// Wire name of the event
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::PostToolUseFailure => "PostToolUseFailure",
            Self::Notification => "Notification",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::Stop => "Stop",
            Self::SubagentStart => "SubagentStart",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::PermissionRequest => "PermissionRequest",
        }
    }

    /// Parse a wire name, returning `None` for events this crate does not know
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Hook Output
// ============================================================================

/// Hook decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    /// Block the action
    Block,
    /// Explicitly approve the action
    Approve,
}

/// Structured hook output
///
/// One of the shapes a hook callback may return. It is normalized into a
/// [`Decision`](crate::types::Decision) before anything is sent to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookOutput {
    /// Decision to block or approve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,
    /// Reason shown to the model when blocking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// System message to add
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemMessage")]
    pub system_message: Option<String>,
    /// Set to `false` to stop the agent after this hook
    #[serde(skip_serializing_if = "Option::is_none", rename = "continue")]
    pub continue_: Option<bool>,
    /// Reason reported when `continue_` is `false`
    #[serde(skip_serializing_if = "Option::is_none", rename = "stopReason")]
    pub stop_reason: Option<String>,
    /// Hook-specific output data (`permissionDecision`, `updatedInput`, ...)
    #[serde(skip_serializing_if = "Option::is_none", rename = "hookSpecificOutput")]
    pub hook_specific_output: Option<serde_json::Value>,
}

impl HookOutput {
    /// Output that blocks the tool call
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Some(HookDecision::Block),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

// ============================================================================
// Hook Context
// ============================================================================

/// What a hook callback knows about its session
///
/// A snapshot taken when the callback is dispatched. Callbacks never see live
/// client state.
#[derive(Clone, Default)]
pub struct HookContext {
    /// Reported by the agent's `system/init` message
    pub session_id: Option<String>,
    /// Agent working directory, also from `system/init`
    pub cwd: Option<String>,
    /// Cancelled when the request is withdrawn or the client shuts down
    pub cancellation_token: Option<CancellationToken>,
}

impl std::fmt::Debug for HookContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookContext")
            .field("session_id", &self.session_id)
            .field("cwd", &self.cwd)
            .field(
                "cancellation_token",
                &self.cancellation_token.as_ref().map(|_| "<token>"),
            )
            .finish()
    }
}

impl HookContext {
    /// Build a context
    #[must_use]
    pub fn new(
        session_id: Option<String>,
        cwd: Option<String>,
        cancellation_token: Option<CancellationToken>,
    ) -> Self {
        Self {
            session_id,
            cwd,
            cancellation_token,
        }
    }

    /// True once the request was withdrawn or the client shut down
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

// ============================================================================
// Hook Matcher
// ============================================================================

/// Callbacks registered for the tools a pattern selects
#[derive(Clone)]
pub struct HookMatcher {
    /// Matcher pattern: a tool name, `"Write|Edit"` alternatives, or `"*"`
    pub matcher: Option<String>,
    /// Callbacks, run in order
    pub hooks: Vec<Arc<dyn crate::callbacks::HookCallback>>,
    /// Per-callback timeout (default: 60 seconds)
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("hooks", &format!("[{} callbacks]", self.hooks.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_round_trip() {
        assert_eq!(HookEvent::PreToolUse.as_str(), "PreToolUse");
        assert_eq!(
            HookEvent::from_name("PostToolUse"),
            Some(HookEvent::PostToolUse)
        );
        assert_eq!(HookEvent::from_name("Bogus"), None);
    }

    #[test]
    fn test_hook_output_wire_names() {
        let out = HookOutput {
            system_message: Some("note".into()),
            continue_: Some(false),
            ..HookOutput::block("no")
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["decision"], "block");
        assert_eq!(json["reason"], "no");
        assert_eq!(json["systemMessage"], "note");
        assert_eq!(json["continue"], false);
        assert!(json.get("hookSpecificOutput").is_none());
    }
}
