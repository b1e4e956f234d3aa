//! Error types for the agent control client

use std::time::Duration;

use thiserror::Error;

use crate::utils::format_duration;

/// Coarse classification of an [`AgentError`]
///
/// Connection errors are fatal for the session. Protocol errors are recovered
/// locally by the read loop. Callback errors are always turned into a negative
/// decision or an error envelope. Request errors only reach the waiter that
/// issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Spawn failures, closed pipes, shutdown
    Connection,
    /// Malformed lines and unknown envelopes
    Protocol,
    /// Hook, permission or tool code failed
    Callback,
    /// Timeouts and explicit error responses
    Request,
    /// Invalid options or credentials
    Configuration,
}

/// Main error type for the agent control client
#[derive(Error, Debug)]
pub enum AgentError {
    /// Agent CLI executable not found
    #[error("Agent CLI not found: {0}")]
    CliNotFound(String),

    /// Subprocess could not be started or its pipes are unusable
    #[error("Connection error: {0}")]
    Connection(String),

    /// The subprocess exited or the transport was closed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The client is shutting down and no longer accepts work
    #[error("Client is closing")]
    Closing,

    /// JSON decode error when parsing CLI output
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// Message parse error with optional raw data
    #[error("Message parse error: {message}")]
    MessageParse {
        /// Error message
        message: String,
        /// Raw message data that failed to parse
        data: Option<serde_json::Value>,
    },

    /// Control protocol violation
    #[error("Control protocol error: {0}")]
    ControlProtocol(String),

    /// The external process answered a control request with an error
    #[error("Control request {request_type} failed: {message}")]
    ControlResponse {
        /// Type of request that failed
        request_type: String,
        /// Error message reported by the process
        message: String,
    },

    /// Control protocol request timed out
    #[error("Control request timed out after {}: {request_type}", format_duration(.timeout))]
    ControlTimeout {
        /// Timeout that elapsed
        timeout: Duration,
        /// Type of request that timed out
        request_type: String,
    },

    /// Hook execution error
    #[error("Hook error: {0}")]
    Hook(String),

    /// Permission callback error
    #[error("Permission error: {0}")]
    Permission(String),

    /// SDK-hosted tool server error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credentials could not be prepared for the subprocess
    #[error("Authentication error: {0}")]
    Authentication(String),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a CLI not found error
    pub fn cli_not_found(msg: impl Into<String>) -> Self {
        Self::CliNotFound(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a connection closed error
    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    /// Create a message parse error
    pub fn message_parse(msg: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::MessageParse {
            message: msg.into(),
            data,
        }
    }

    /// Create a control protocol error
    pub fn control_protocol(msg: impl Into<String>) -> Self {
        Self::ControlProtocol(msg.into())
    }

    /// Create an error for a failed control response
    pub fn control_response(request_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ControlResponse {
            request_type: request_type.into(),
            message: message.into(),
        }
    }

    /// Create a control timeout error
    pub fn control_timeout(timeout: Duration, request_type: impl Into<String>) -> Self {
        Self::ControlTimeout {
            timeout,
            request_type: request_type.into(),
        }
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create a permission error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create an MCP error
    pub fn mcp(msg: impl Into<String>) -> Self {
        Self::Mcp(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Which part of the error taxonomy this error belongs to
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CliNotFound(_)
            | Self::Connection(_)
            | Self::ConnectionClosed(_)
            | Self::Closing
            | Self::Io(_) => ErrorCategory::Connection,
            Self::JsonDecode(_) | Self::MessageParse { .. } | Self::ControlProtocol(_) => {
                ErrorCategory::Protocol
            }
            Self::Hook(_) | Self::Permission(_) | Self::Mcp(_) => ErrorCategory::Callback,
            Self::ControlResponse { .. } | Self::ControlTimeout { .. } => ErrorCategory::Request,
            Self::InvalidConfig(_) | Self::Authentication(_) => ErrorCategory::Configuration,
        }
    }

    /// True for errors that end the session
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }
}
