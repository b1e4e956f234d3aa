//! Permission modes, rule updates and what permission callbacks see and return

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the agent gates tool use
///
/// Sent verbatim (camelCase) in `set_permission_mode` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before anything risky
    Default,
    /// File edits go through without asking
    AcceptEdits,
    /// Read-only planning, no tool side effects
    Plan,
    /// Never ask
    BypassPermissions,
}

/// Settings scope a rule update is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionUpdateDestination {
    /// User-wide settings
    UserSettings,
    /// Checked-in project settings
    ProjectSettings,
    /// Project settings kept out of version control
    LocalSettings,
    /// This session only
    Session,
}

/// A tool name with an optional rule body (e.g. a command prefix)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRuleValue {
    /// Tool the rule applies to
    pub tool_name: String,
    /// Rule body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_content: Option<String>,
}

/// A change to permission rules, suggested by the agent or returned by a callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionUpdate {
    /// Append rules
    AddRules {
        /// Rules
        #[serde(skip_serializing_if = "Option::is_none")]
        rules: Option<Vec<PermissionRuleValue>>,
        /// Target scope
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Swap the rule set for these
    ReplaceRules {
        /// Rules
        #[serde(skip_serializing_if = "Option::is_none")]
        rules: Option<Vec<PermissionRuleValue>>,
        /// Target scope
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Drop matching rules
    RemoveRules {
        /// Rules
        #[serde(skip_serializing_if = "Option::is_none")]
        rules: Option<Vec<PermissionRuleValue>>,
        /// Target scope
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Switch mode
    SetMode {
        /// Mode to switch to
        mode: PermissionMode,
        /// Target scope
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Grant access to more directories
    AddDirectories {
        /// Paths
        #[serde(skip_serializing_if = "Option::is_none")]
        directories: Option<Vec<String>>,
        /// Target scope
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
    /// Revoke directory access
    RemoveDirectories {
        /// Paths
        #[serde(skip_serializing_if = "Option::is_none")]
        directories: Option<Vec<String>>,
        /// Target scope
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionUpdateDestination>,
    },
}

/// What a permission callback is told about the check
///
/// Carries what the agent sent alongside the `can_use_tool` request plus a
/// cancellation token that fires if the request is withdrawn.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ToolPermissionContext {
    /// Rule updates the agent proposes
    pub suggestions: Vec<PermissionUpdate>,
    /// Path that triggered the permission check, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_path: Option<String>,
    /// Tool use this check belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    /// Cancelled when the request is withdrawn or the client shuts down
    #[serde(skip)]
    pub cancellation_token: Option<CancellationToken>,
}

impl std::fmt::Debug for ToolPermissionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPermissionContext")
            .field("suggestions", &self.suggestions)
            .field("blocked_path", &self.blocked_path)
            .field("tool_use_id", &self.tool_use_id)
            .field(
                "cancellation_token",
                &self.cancellation_token.as_ref().map(|_| "<token>"),
            )
            .finish()
    }
}

impl ToolPermissionContext {
    /// Context carrying only `suggestions`
    #[must_use]
    pub fn new(suggestions: Vec<PermissionUpdate>) -> Self {
        Self {
            suggestions,
            ..Default::default()
        }
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = Some(cancellation_token);
        self
    }

    /// True once the request was withdrawn or the client shut down
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Payload of [`PermissionResult::Allow`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResultAllow {
    /// Replacement tool input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<serde_json::Value>,
    /// Rule updates to persist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_permissions: Option<Vec<PermissionUpdate>>,
}

/// Payload of [`PermissionResult::Deny`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResultDeny {
    /// Shown to the model
    pub message: String,
    /// Also stop the current turn
    #[serde(default)]
    pub interrupt: bool,
}

/// Structured answer from a permission callback
///
/// One of the shapes a permission callback may return. It is normalized into a
/// [`Decision`](crate::types::Decision) before anything is sent to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PermissionResult {
    /// Allow the tool use
    Allow(PermissionResultAllow),
    /// Deny the tool use
    Deny(PermissionResultDeny),
}

/// Shared permission callback
pub type CanUseToolCallback = Arc<dyn crate::callbacks::PermissionCallback>;

impl PermissionResult {
    /// Allow the tool call unchanged
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow(PermissionResultAllow {
            updated_input: None,
            updated_permissions: None,
        })
    }

    /// Allow the tool call with rewritten input
    #[must_use]
    pub fn allow_with_input(input: serde_json::Value) -> Self {
        Self::Allow(PermissionResultAllow {
            updated_input: Some(input),
            updated_permissions: None,
        })
    }

    /// Deny the tool call
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny(PermissionResultDeny {
            message: message.into(),
            interrupt: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_mode_wire_names() {
        assert_eq!(
            serde_json::to_value(PermissionMode::AcceptEdits).unwrap(),
            "acceptEdits"
        );
        assert_eq!(
            serde_json::to_value(PermissionMode::BypassPermissions).unwrap(),
            "bypassPermissions"
        );
    }

    #[test]
    fn test_context_cancellation() {
        let token = CancellationToken::new();
        let context = ToolPermissionContext::new(vec![]).with_cancellation(token.clone());
        assert!(!context.is_cancelled());
        token.cancel();
        assert!(context.is_cancelled());
        assert!(!ToolPermissionContext::default().is_cancelled());
    }

    #[test]
    fn test_suggestion_parses() {
        let update: PermissionUpdate = serde_json::from_value(serde_json::json!({
            "type": "addRules",
            "rules": [{"tool_name": "Bash", "rule_content": "ls"}],
            "destination": "session"
        }))
        .unwrap();
        assert!(matches!(update, PermissionUpdate::AddRules { .. }));
    }
}
