//! User callbacks for hook events and permission checks
//!
//! Callbacks may answer in whatever shape is convenient: a plain `bool`, a
//! JSON object, a [`HookOutput`], a [`PermissionResult`] or a ready-made
//! [`Decision`]. All of them travel as a [`CallbackOutput`] and are
//! normalized by the dispatch engine before anything goes back to the agent.
//!
//! # Implementing [`HookCallback`] by hand
//!
//! ```no_run
//! use agent_control_client::callbacks::{CallbackOutput, HookCallback};
//! use agent_control_client::types::{HookContext, HookOutput};
//! use agent_control_client::Result;
//! use async_trait::async_trait;
//!
//! struct NoRm;
//!
//! #[async_trait]
//! impl HookCallback for NoRm {
//!     async fn call(
//!         &self,
//!         input: serde_json::Value,
//!         _tool_use_id: Option<String>,
//!         _context: HookContext,
//!     ) -> Result<CallbackOutput> {
//!         let command = input["tool_input"]["command"].as_str().unwrap_or_default();
//!         if command.contains("rm -rf") {
//!             return Ok(HookOutput::block("dangerous").into());
//!         }
//!         Ok(true.into())
//!     }
//! }
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Decision, HookContext, HookOutput, PermissionResult, ToolPermissionContext};

// ============================================================================
// Callback Output
// ============================================================================

/// Any result shape a callback may return
#[derive(Debug, Clone)]
pub enum CallbackOutput {
    /// `true` allows, `false` denies
    Bool(bool),
    /// Loosely structured object (`decision`/`behavior`, `reason`, `updatedInput`, ...)
    Json(serde_json::Value),
    /// Hook output in the agent's own shape
    Hook(HookOutput),
    /// Permission result
    Permission(PermissionResult),
    /// Already normalized
    Decision(Decision),
}

impl From<bool> for CallbackOutput {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<serde_json::Value> for CallbackOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<HookOutput> for CallbackOutput {
    fn from(value: HookOutput) -> Self {
        Self::Hook(value)
    }
}

impl From<PermissionResult> for CallbackOutput {
    fn from(value: PermissionResult) -> Self {
        Self::Permission(value)
    }
}

impl From<Decision> for CallbackOutput {
    fn from(value: Decision) -> Self {
        Self::Decision(value)
    }
}

// ============================================================================
// Hook Callback Trait
// ============================================================================

/// Code run when the agent reports a hook event
///
/// Implementations run on their own task with a timeout; a callback that
/// hangs or panics costs only its own request.
#[async_trait]
pub trait HookCallback: Send + Sync {
    /// Handle one hook event
    ///
    /// # Arguments
    ///
    /// * `input` - Hook input; for tool events it carries `tool_name` and
    ///   `tool_input`, already rewritten by earlier callbacks in the chain
    /// * `tool_use_id` - Tool use ID for tool-related hooks
    /// * `context` - Snapshot of session information plus a cancellation token
    async fn call(
        &self,
        input: serde_json::Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<CallbackOutput>;
}

// ============================================================================
// Permission Callback Trait
// ============================================================================

/// Decides whether a tool may run
///
/// Consulted on `can_use_tool` requests for tools on neither the allowed nor
/// the disallowed list.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    /// Answer one `can_use_tool` check
    ///
    /// # Arguments
    ///
    /// * `tool_name` - Tool the agent wants to run
    /// * `input` - Its arguments, as the agent sent them
    /// * `context` - Suggestions from the agent plus a cancellation token
    async fn call(
        &self,
        tool_name: String,
        input: serde_json::Value,
        context: ToolPermissionContext,
    ) -> Result<CallbackOutput>;
}

// ============================================================================
// Shared callbacks
// ============================================================================

#[async_trait]
impl<T: HookCallback + ?Sized> HookCallback for Arc<T> {
    async fn call(
        &self,
        input: serde_json::Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<CallbackOutput> {
        (**self).call(input, tool_use_id, context).await
    }
}

#[async_trait]
impl<T: PermissionCallback + ?Sized> PermissionCallback for Arc<T> {
    async fn call(
        &self,
        tool_name: String,
        input: serde_json::Value,
        context: ToolPermissionContext,
    ) -> Result<CallbackOutput> {
        (**self).call(tool_name, input, context).await
    }
}

// ============================================================================
// Closures
// ============================================================================

type HookFn =
    dyn Fn(serde_json::Value, Option<String>, HookContext) -> BoxFuture<'static, Result<CallbackOutput>>
        + Send
        + Sync;

type PermissionFn = dyn Fn(String, serde_json::Value, ToolPermissionContext) -> BoxFuture<'static, Result<CallbackOutput>>
    + Send
    + Sync;

/// [`HookCallback`] backed by an async closure
///
/// The closure may return anything convertible into [`CallbackOutput`].
///
/// ```no_run
/// use agent_control_client::callbacks::{FnHookCallback, HookCallback};
/// use std::sync::Arc;
///
/// let callback = FnHookCallback::new(|_input, tool_id, ctx| async move {
///     println!("Hook for tool: {:?}, session: {:?}", tool_id, ctx.session_id);
///     Ok(true)
/// });
///
/// let hook: Arc<dyn HookCallback> = Arc::new(callback);
/// ```
pub struct FnHookCallback {
    func: Box<HookFn>,
}

impl FnHookCallback {
    /// Wrap `func`
    pub fn new<F, Fut, R>(func: F) -> Self
    where
        F: Fn(serde_json::Value, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R>> + Send + 'static,
        R: Into<CallbackOutput>,
    {
        Self {
            func: Box::new(move |input, tool_use_id, context| {
                let fut = func(input, tool_use_id, context);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }
}

#[async_trait]
impl HookCallback for FnHookCallback {
    async fn call(
        &self,
        input: serde_json::Value,
        tool_use_id: Option<String>,
        context: HookContext,
    ) -> Result<CallbackOutput> {
        (self.func)(input, tool_use_id, context).await
    }
}

/// [`PermissionCallback`] backed by an async closure
///
/// ```no_run
/// use agent_control_client::callbacks::{FnPermissionCallback, PermissionCallback};
/// use agent_control_client::types::PermissionResult;
/// use std::sync::Arc;
///
/// let callback = FnPermissionCallback::new(|tool_name, _input, _ctx| async move {
///     if tool_name == "Read" {
///         Ok(PermissionResult::allow())
///     } else {
///         Ok(PermissionResult::deny(format!("{tool_name} is not allowed")))
///     }
/// });
///
/// let check: Arc<dyn PermissionCallback> = Arc::new(callback);
/// ```
pub struct FnPermissionCallback {
    func: Box<PermissionFn>,
}

impl FnPermissionCallback {
    /// Wrap `func`
    pub fn new<F, Fut, R>(func: F) -> Self
    where
        F: Fn(String, serde_json::Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R>> + Send + 'static,
        R: Into<CallbackOutput>,
    {
        Self {
            func: Box::new(move |tool_name, input, context| {
                let fut = func(tool_name, input, context);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }
}

#[async_trait]
impl PermissionCallback for FnPermissionCallback {
    async fn call(
        &self,
        tool_name: String,
        input: serde_json::Value,
        context: ToolPermissionContext,
    ) -> Result<CallbackOutput> {
        (self.func)(tool_name, input, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TestHook;

    #[async_trait]
    impl HookCallback for TestHook {
        async fn call(
            &self,
            _input: serde_json::Value,
            _tool_use_id: Option<String>,
            _context: HookContext,
        ) -> Result<CallbackOutput> {
            Ok(HookOutput::default().into())
        }
    }

    #[tokio::test]
    async fn test_arc_wrapped_callback() {
        let hook: Arc<dyn HookCallback> = Arc::new(TestHook);
        let result = hook.call(json!({}), None, HookContext::default()).await;
        assert!(matches!(result, Ok(CallbackOutput::Hook(_))));
    }

    #[tokio::test]
    async fn test_fn_hook_callback_converts_output() {
        let callback = FnHookCallback::new(|input, _tool_id, ctx| async move {
            assert!(!ctx.is_cancelled());
            Ok(input["ok"].as_bool().unwrap_or(false))
        });

        let result = callback
            .call(json!({"ok": true}), None, HookContext::default())
            .await
            .unwrap();
        assert!(matches!(result, CallbackOutput::Bool(true)));
    }

    #[tokio::test]
    async fn test_fn_permission_callback() {
        let callback = FnPermissionCallback::new(|tool, _input, ctx| async move {
            assert!(ctx.suggestions.is_empty());
            Ok(PermissionResult::deny(format!("Denied: {tool}")))
        });

        let result = callback
            .call(
                "Bash".to_string(),
                json!({}),
                ToolPermissionContext::new(vec![]),
            )
            .await
            .unwrap();
        let CallbackOutput::Permission(PermissionResult::Deny(deny)) = result else {
            panic!("expected deny");
        };
        assert_eq!(deny.message, "Denied: Bash");
    }
}
