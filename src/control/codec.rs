//! Envelope encoding and decoding
//!
//! Encoders return the JSON text without a trailing newline; the transport
//! frames it. [`decode`] never fails on a well-formed JSON object: envelopes
//! it does not recognise come back as [`Inbound::Unknown`] or
//! [`InboundRequest::Unsupported`] so the read loop can log and move on.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::types::{PermissionMode, PermissionUpdate, RequestId, ToolName};
use crate::utils::truncate_for_display;

// ============================================================================
// Outbound
// ============================================================================

/// Request the client sends to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum OutboundRequest {
    /// Handshake carrying hook configuration and in-process server names
    Initialize {
        /// Hook configuration, keyed by event name
        #[serde(skip_serializing_if = "Option::is_none")]
        hooks: Option<Value>,
        /// Names of in-process tool servers
        #[serde(rename = "sdkMcpServers", skip_serializing_if = "Vec::is_empty")]
        sdk_mcp_servers: Vec<String>,
    },
    /// Switch model; `None` restores the default
    SetModel {
        /// New model
        model: Option<String>,
    },
    /// Switch permission mode
    SetPermissionMode {
        /// New mode
        mode: PermissionMode,
    },
    /// Stop the current turn
    Interrupt,
    /// Restore files to their state at a user message
    RewindFiles {
        /// UUID of the user message to rewind to
        user_message_id: String,
    },
}

impl OutboundRequest {
    /// Wire subtype, used in logs and error messages
    #[must_use]
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::SetModel { .. } => "set_model",
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::Interrupt => "interrupt",
            Self::RewindFiles { .. } => "rewind_files",
        }
    }
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    request_id: &'a RequestId,
    request: &'a OutboundRequest,
}

#[derive(Serialize)]
struct ResponseEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    response: ResponseBody<'a>,
}

#[derive(Serialize)]
#[serde(tag = "subtype", rename_all = "lowercase")]
enum ResponseBody<'a> {
    Success {
        request_id: &'a RequestId,
        response: Value,
    },
    Error {
        request_id: &'a RequestId,
        error: &'a str,
    },
}

/// Encode an SDK-initiated control request
///
/// # Errors
/// Returns error if serialization fails
pub fn encode_request(request_id: &RequestId, request: &OutboundRequest) -> Result<String> {
    Ok(serde_json::to_string(&RequestEnvelope {
        kind: "control_request",
        request_id,
        request,
    })?)
}

/// Encode a success answer to an agent-initiated request
///
/// # Errors
/// Returns error if serialization fails
pub fn encode_success(request_id: &RequestId, response: Value) -> Result<String> {
    Ok(serde_json::to_string(&ResponseEnvelope {
        kind: "control_response",
        response: ResponseBody::Success {
            request_id,
            response,
        },
    })?)
}

/// Encode an error answer to an agent-initiated request
///
/// # Errors
/// Returns error if serialization fails
pub fn encode_error(request_id: &RequestId, error: &str) -> Result<String> {
    Ok(serde_json::to_string(&ResponseEnvelope {
        kind: "control_response",
        response: ResponseBody::Error { request_id, error },
    })?)
}

/// Encode a user turn
///
/// `content` is either a string or an array of content blocks.
///
/// # Errors
/// Returns error if serialization fails
pub fn encode_user_message(content: Value) -> Result<String> {
    Ok(serde_json::to_string(&json!({
        "type": "user",
        "message": {"role": "user", "content": content},
        "parent_tool_use_id": null,
        "session_id": "default",
    }))?)
}

// ============================================================================
// Inbound
// ============================================================================

/// `hook_callback` request body
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HookCallbackRequest {
    /// Callback id advertised in the initialize handshake
    #[serde(default)]
    pub callback_id: Option<String>,
    /// Hook input (tool name, tool input, event name, session fields, ...)
    #[serde(default)]
    pub input: Value,
    /// Tool use the hook fired for
    #[serde(default)]
    pub tool_use_id: Option<String>,
    /// Tool name when sent outside `input`
    #[serde(default)]
    pub tool_name: Option<ToolName>,
    /// Tool input when sent outside `input`
    #[serde(default)]
    pub tool_input: Option<Value>,
    /// Hook event when sent outside `input`
    #[serde(default)]
    pub hook_event_name: Option<String>,
}

impl HookCallbackRequest {
    /// Tool name, wherever the agent put it
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.tool_name
            .as_deref()
            .or_else(|| self.input.get("tool_name").and_then(Value::as_str))
    }

    /// Hook event name, wherever the agent put it
    #[must_use]
    pub fn hook_event_name(&self) -> Option<&str> {
        self.hook_event_name
            .as_deref()
            .or_else(|| self.input.get("hook_event_name").and_then(Value::as_str))
    }

    /// Hook input with top-level fields folded in
    #[must_use]
    pub fn merged_input(&self) -> Value {
        let mut input = match &self.input {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Some(name) = &self.tool_name {
            input.insert("tool_name".into(), json!(name));
        }
        if let Some(tool_input) = &self.tool_input {
            input.insert("tool_input".into(), tool_input.clone());
        }
        if let Some(event) = &self.hook_event_name {
            input.insert("hook_event_name".into(), json!(event));
        }
        Value::Object(input)
    }
}

/// `can_use_tool` request body
#[derive(Debug, Clone)]
pub struct CanUseToolRequest {
    /// Tool being checked
    pub tool_name: ToolName,
    /// Tool input
    pub input: Value,
    /// Rule updates the agent suggests
    pub permission_suggestions: Vec<PermissionUpdate>,
    /// Path that triggered the check
    pub blocked_path: Option<String>,
    /// Tool use being checked
    pub tool_use_id: Option<String>,
}

#[derive(Deserialize)]
struct RawCanUseTool {
    tool_name: ToolName,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    permission_suggestions: Vec<Value>,
    #[serde(default)]
    blocked_path: Option<String>,
    #[serde(default)]
    tool_use_id: Option<String>,
}

impl From<RawCanUseTool> for CanUseToolRequest {
    fn from(raw: RawCanUseTool) -> Self {
        // Suggestion kinds this crate does not model are dropped, not fatal
        let permission_suggestions = raw
            .permission_suggestions
            .into_iter()
            .filter_map(|s| serde_json::from_value(s).ok())
            .collect();
        Self {
            tool_name: raw.tool_name,
            input: raw.input,
            permission_suggestions,
            blocked_path: raw.blocked_path,
            tool_use_id: raw.tool_use_id,
        }
    }
}

/// `mcp_message` request body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpMessageRequest {
    /// Target in-process server
    pub server_name: String,
    /// JSON-RPC message
    pub message: Value,
}

/// Agent-initiated control request
#[derive(Debug, Clone)]
pub enum InboundRequest {
    /// Run hooks
    HookCallback(HookCallbackRequest),
    /// Ask whether a tool may run
    CanUseTool(CanUseToolRequest),
    /// JSON-RPC message for an in-process tool server
    McpMessage(McpMessageRequest),
    /// Subtype this client does not handle
    Unsupported {
        /// The subtype
        subtype: String,
    },
    /// Known subtype with a body that did not parse
    Invalid {
        /// The subtype
        subtype: String,
        /// Parse error
        reason: String,
    },
}

impl InboundRequest {
    /// Wire subtype
    #[must_use]
    pub fn subtype(&self) -> &str {
        match self {
            Self::HookCallback(_) => "hook_callback",
            Self::CanUseTool(_) => "can_use_tool",
            Self::McpMessage(_) => "mcp_message",
            Self::Unsupported { subtype } | Self::Invalid { subtype, .. } => subtype,
        }
    }
}

/// Decoded inbound line
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Answer to a request this client sent
    ControlResponse {
        /// Request being answered
        request_id: RequestId,
        /// Response payload, or the agent's error message
        outcome: std::result::Result<Value, String>,
    },
    /// Request the agent wants answered
    ControlRequest {
        /// Id to answer with
        request_id: RequestId,
        /// What is being asked
        request: InboundRequest,
    },
    /// The agent withdrew a request
    ControlCancel {
        /// Withdrawn request
        request_id: RequestId,
    },
    /// Conversation or stream message, passed through
    Message(Value),
    /// Envelope type this client does not know
    Unknown {
        /// The `type` field, or empty when absent
        message_type: String,
    },
}

fn parse_body<T: serde::de::DeserializeOwned>(
    subtype: &str,
    body: &Value,
) -> std::result::Result<T, InboundRequest> {
    serde_json::from_value(body.clone()).map_err(|e| InboundRequest::Invalid {
        subtype: subtype.to_string(),
        reason: e.to_string(),
    })
}

fn request_id_of(value: &Value) -> Option<RequestId> {
    value
        .get("request_id")
        .and_then(Value::as_str)
        .map(RequestId::from)
}

/// Decode one line
///
/// # Errors
/// Returns `JsonDecode` for text that is not JSON and `MessageParse` for
/// control envelopes missing their `request_id`.
pub fn decode(line: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(line)?;
    let message_type = value.get("type").and_then(Value::as_str).unwrap_or_default();

    match message_type {
        "control_response" => {
            let response = value.get("response").cloned().unwrap_or(Value::Null);
            let request_id = request_id_of(&response)
                .ok_or_else(|| missing_request_id("control_response", line))?;
            let outcome = match response.get("subtype").and_then(Value::as_str) {
                Some("success") => Ok(response.get("response").cloned().unwrap_or_else(|| json!({}))),
                _ => Err(response
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string()),
            };
            Ok(Inbound::ControlResponse {
                request_id,
                outcome,
            })
        }
        "control_request" => {
            let request_id = request_id_of(&value)
                .ok_or_else(|| missing_request_id("control_request", line))?;
            let body = value.get("request").cloned().unwrap_or_else(|| json!({}));
            let subtype = body
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let request = match subtype.as_str() {
                "hook_callback" => parse_body(&subtype, &body)
                    .map_or_else(|invalid| invalid, InboundRequest::HookCallback),
                "can_use_tool" => parse_body::<RawCanUseTool>(&subtype, &body)
                    .map_or_else(|invalid| invalid, |raw| InboundRequest::CanUseTool(raw.into())),
                "mcp_message" | "sdk_mcp_request" => parse_body(&subtype, &body)
                    .map_or_else(|invalid| invalid, InboundRequest::McpMessage),
                _ => InboundRequest::Unsupported { subtype },
            };
            Ok(Inbound::ControlRequest {
                request_id,
                request,
            })
        }
        "control_cancel_request" => {
            let request_id = request_id_of(&value)
                .ok_or_else(|| missing_request_id("control_cancel_request", line))?;
            Ok(Inbound::ControlCancel { request_id })
        }
        "system" | "user" | "assistant" | "result" | "stream_event" => Ok(Inbound::Message(value)),
        other => Ok(Inbound::Unknown {
            message_type: other.to_string(),
        }),
    }
}

fn missing_request_id(kind: &str, line: &str) -> AgentError {
    AgentError::message_parse(
        format!(
            "{kind} without request_id: {}",
            truncate_for_display(line, 100)
        ),
        None,
    )
}
