//! Conversation messages passed through from the agent
//!
//! These are the non-control lines of the protocol (`type` is one of
//! `system`, `user`, `assistant`, `result`, `stream_event`). Fields the client
//! does not act on are optional so that newer agent versions still parse.

use serde::{Deserialize, Serialize};

use super::identifiers::SessionId;

/// Content block inside a user or assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Model reasoning
    Thinking {
        /// Reasoning text
        thinking: String,
        /// Signature over the reasoning
        #[serde(default)]
        signature: String,
    },
    /// Tool invocation
    ToolUse {
        /// Tool use identifier
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        input: serde_json::Value,
    },
    /// Tool result fed back to the model
    ToolResult {
        /// Tool use this result answers
        tool_use_id: String,
        /// Result content (string or blocks)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        /// Whether the tool failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Block type this crate does not model
    #[serde(other)]
    Unknown,
}

/// User message body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessageContent {
    /// Always `"user"`
    pub role: String,
    /// Text or content blocks
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Assistant message body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessageContent {
    /// Model that produced the message
    #[serde(default)]
    pub model: Option<String>,
    /// Content blocks
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl AssistantMessageContent {
    /// Concatenated text of all text blocks
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Message received from the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// User message (replayed input or tool results)
    User {
        /// Parent tool use when produced inside a subagent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Message body
        message: UserMessageContent,
        /// Session identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Message UUID, usable with `rewind_files`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
    },
    /// Assistant message
    Assistant {
        /// Parent tool use when produced inside a subagent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Message body
        message: AssistantMessageContent,
        /// Session identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    /// System message (`init`, `compact_boundary`, ...)
    System {
        /// System message subtype
        subtype: String,
        /// Remaining fields
        #[serde(flatten)]
        data: serde_json::Value,
    },
    /// End of a turn
    Result {
        /// `success` or an error subtype
        subtype: String,
        /// Whether the turn failed
        #[serde(default)]
        is_error: bool,
        /// Session identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Wall-clock duration
        #[serde(default)]
        duration_ms: u64,
        /// Number of turns taken
        #[serde(default)]
        num_turns: u32,
        /// Final text result
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        /// Cost of the turn
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        /// Token usage
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<serde_json::Value>,
    },
    /// Raw streaming event (only when partial messages are not parsed)
    StreamEvent {
        /// Event UUID
        #[serde(default)]
        uuid: String,
        /// Session identifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// The raw event
        event: serde_json::Value,
        /// Parent tool use when produced inside a subagent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
}

impl Message {
    /// Session identifier carried by the message, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::User { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::Result { session_id, .. }
            | Self::StreamEvent { session_id, .. } => session_id.as_ref(),
            Self::System { .. } => None,
        }
    }

    /// True for the message that ends a turn
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}
