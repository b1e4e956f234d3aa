//! Canonical hook/permission decision
//!
//! Every callback result, whatever shape the callback chose to return, ends up
//! as a [`Decision`]. Only this type is serialized back to the agent.

use serde_json::{Map, Value, json};
use std::time::Duration;

use super::permissions::PermissionUpdate;
use crate::utils::format_duration;

/// What the callback decided about the tool call
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Let the call proceed unchanged
    Allow,
    /// Refuse the call
    Deny,
    /// Let the call proceed with rewritten input
    AllowWithModifiedInput(Value),
    /// Defer to the agent's own prompt
    Ask,
}

/// Why a callback did not produce a result of its own
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchFailure {
    /// The callback outlived its timeout and was cancelled
    TimedOut(Duration),
    /// The callback returned an error
    Failed(String),
    /// The callback panicked
    Panicked(String),
    /// The request was withdrawn or the client shut down
    Cancelled,
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut(after) => write!(f, "Callback timed out after {}", format_duration(after)),
            Self::Failed(msg) => write!(f, "Callback failed: {msg}"),
            Self::Panicked(msg) => write!(f, "Callback panicked: {msg}"),
            Self::Cancelled => f.write_str("request cancelled"),
        }
    }
}

/// Normalized hook or permission decision
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The verdict
    pub verdict: Verdict,
    /// Human-readable reason, shown to the model on deny
    pub reason: Option<String>,
    /// Extra system message to inject into the conversation
    pub system_message: Option<String>,
    /// Stop the agent's current turn
    pub interrupt: bool,
    /// Permission rule updates requested by a permission callback
    pub updated_permissions: Option<Vec<PermissionUpdate>>,
    /// Opaque hook-specific output, forwarded as-is
    pub hook_specific_output: Option<Value>,
    /// Set when the decision was synthesized because the callback did not answer
    pub failure: Option<DispatchFailure>,
}

impl Decision {
    fn with_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            reason: None,
            system_message: None,
            interrupt: false,
            updated_permissions: None,
            hook_specific_output: None,
            failure: None,
        }
    }

    /// Allow the call unchanged
    #[must_use]
    pub fn allow() -> Self {
        Self::with_verdict(Verdict::Allow)
    }

    /// Deny the call
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::with_verdict(Verdict::Deny)
        }
    }

    /// Allow the call with rewritten input
    #[must_use]
    pub fn allow_with_modified_input(input: Value) -> Self {
        Self::with_verdict(Verdict::AllowWithModifiedInput(input))
    }

    /// Defer to the agent
    #[must_use]
    pub fn ask() -> Self {
        Self::with_verdict(Verdict::Ask)
    }

    /// Deny-equivalent decision standing in for a callback that did not answer
    #[must_use]
    pub fn from_failure(failure: DispatchFailure) -> Self {
        Self {
            reason: Some(failure.to_string()),
            failure: Some(failure),
            ..Self::with_verdict(Verdict::Deny)
        }
    }

    /// Attach a reason
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a system message
    #[must_use]
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Mark the decision as interrupting the agent
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// True for `Deny`
    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.verdict == Verdict::Deny
    }

    /// Rewritten input, if any
    #[must_use]
    pub fn modified_input(&self) -> Option<&Value> {
        match &self.verdict {
            Verdict::AllowWithModifiedInput(input) => Some(input),
            _ => None,
        }
    }

    /// Wire payload answering a `hook_callback` request
    #[must_use]
    pub fn to_hook_response(&self) -> Value {
        let mut body = Map::new();
        let decision = match self.verdict {
            Verdict::Allow | Verdict::AllowWithModifiedInput(_) => "allow",
            Verdict::Deny => "deny",
            Verdict::Ask => "ask",
        };
        body.insert("decision".into(), json!(decision));
        if let Some(reason) = &self.reason {
            body.insert("reason".into(), json!(reason));
        }
        if let Some(message) = &self.system_message {
            body.insert("systemMessage".into(), json!(message));
        }
        if let Verdict::AllowWithModifiedInput(input) = &self.verdict {
            body.insert("updatedInput".into(), input.clone());
        }
        if self.interrupt {
            body.insert("interrupt".into(), json!(true));
        }
        if let Some(specific) = &self.hook_specific_output {
            body.insert("hookSpecificOutput".into(), specific.clone());
        }
        Value::Object(body)
    }

    /// Wire payload answering a `can_use_tool` request
    ///
    /// The agent expects `updatedInput` on every allow, so the original input
    /// is echoed back when the callback did not rewrite it.
    #[must_use]
    pub fn to_permission_response(&self, original_input: &Value) -> Value {
        let mut body = Map::new();
        match &self.verdict {
            Verdict::Allow | Verdict::AllowWithModifiedInput(_) => {
                body.insert("behavior".into(), json!("allow"));
                let input = self.modified_input().unwrap_or(original_input);
                body.insert("updatedInput".into(), input.clone());
                if let Some(updates) = &self.updated_permissions {
                    body.insert(
                        "updatedPermissions".into(),
                        serde_json::to_value(updates).unwrap_or(Value::Null),
                    );
                }
            }
            Verdict::Deny => {
                body.insert("behavior".into(), json!("deny"));
                body.insert(
                    "message".into(),
                    json!(self.reason.as_deref().unwrap_or("Denied")),
                );
                if self.interrupt {
                    body.insert("interrupt".into(), json!(true));
                }
            }
            Verdict::Ask => {
                body.insert("behavior".into(), json!("ask"));
                if let Some(reason) = &self.reason {
                    body.insert("message".into(), json!(reason));
                }
            }
        }
        Value::Object(body)
    }
}
