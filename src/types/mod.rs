//! Type definitions for the agent control client
//!
//! Identifiers, hook and permission types, the canonical [`Decision`],
//! conversation messages, subscriber events and configuration.

pub mod decision;
pub mod events;
pub mod hooks;
pub mod identifiers;
pub mod messages;
pub mod options;
pub mod permissions;

pub use decision::{Decision, DispatchFailure, Verdict};
pub use events::{ClientEvent, ClientState, CloseReason, SessionSnapshot};
pub use hooks::{HookContext, HookDecision, HookEvent, HookMatcher, HookOutput};
pub use identifiers::{RequestId, SessionId, SubscriberId, ToolName};
pub use messages::{AssistantMessageContent, ContentBlock, Message, UserMessageContent};
pub use options::{
    ClientOptions, ClientOptionsBuilder, DEFAULT_CLOSE_GRACE_PERIOD, DEFAULT_INITIALIZE_TIMEOUT,
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_REQUEST_TIMEOUT, SpawnSpec, SpawnSpecBuilder, StderrCallback,
};
pub use permissions::{
    CanUseToolCallback, PermissionMode, PermissionResult, PermissionResultAllow,
    PermissionResultDeny, PermissionRuleValue, PermissionUpdate, PermissionUpdateDestination,
    ToolPermissionContext,
};
