//! Events delivered to subscribers and the client's observable state

use super::identifiers::SessionId;
use super::messages::Message;
use super::permissions::PermissionMode;
use crate::streaming::StreamEvent;

/// Lifecycle state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Subprocess is being spawned
    Starting,
    /// `initialize` has been sent, waiting for the answer
    Initializing,
    /// Session is usable
    Ready,
    /// Shutdown in progress, new work is rejected
    Closing,
    /// Terminal state
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called
    Shutdown,
    /// The subprocess exited on its own
    ProcessExited {
        /// Exit code, `None` when killed by a signal or unknown
        exit_code: Option<i32>,
    },
    /// The transport failed
    TransportFailed(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => f.write_str("client closed"),
            Self::ProcessExited {
                exit_code: Some(code),
            } => write!(f, "process exited with code {code}"),
            Self::ProcessExited { exit_code: None } => f.write_str("process exited"),
            Self::TransportFailed(msg) => write!(f, "transport failed: {msg}"),
        }
    }
}

/// Item delivered to every subscriber
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Conversation message
    Message(Message),
    /// Semantic streaming event (partial-message mode)
    Stream(StreamEvent),
    /// The session ended; always the last event of a subscription
    Closed(CloseReason),
}

impl ClientEvent {
    /// True for the terminal event
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// True for the `result` message ending a turn
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Message(msg) if msg.is_result())
    }
}

/// Point-in-time view of client state, published by the client after every
/// change
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: ClientState,
    /// Current model
    pub model: Option<String>,
    /// Current permission mode
    pub permission_mode: Option<PermissionMode>,
    /// Session identifier, once the agent reported it
    pub session_id: Option<SessionId>,
    /// Number of SDK-initiated requests awaiting an answer
    pub pending_requests: usize,
    /// Set once the client is closed
    pub close_reason: Option<CloseReason>,
}

impl SessionSnapshot {
    pub(crate) fn starting(model: Option<String>, permission_mode: Option<PermissionMode>) -> Self {
        Self {
            state: ClientState::Starting,
            model,
            permission_mode,
            session_id: None,
            pending_requests: 0,
            close_reason: None,
        }
    }
}
