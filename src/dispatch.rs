//! Callback dispatch engine
//!
//! User callbacks are arbitrary code: they may be slow, hang forever, return
//! errors or panic. Every invocation runs on its own task, raced against a
//! timer and the request's cancellation token, and whatever comes back is
//! normalized into a [`Decision`]. Nothing a callback does can stall or crash
//! the client.

use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::callbacks::{CallbackOutput, HookCallback};
use crate::error::Result;
use crate::types::{Decision, DispatchFailure, HookContext, PermissionResult, Verdict};
use crate::utils::format_duration;

/// Default per-callback timeout
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Reason used when a callback answers a bare `false`
const DENIED_BY_CALLBACK: &str = "Denied by callback";

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `fut` on its own task, bounded by `timeout` and `cancel`
///
/// On timeout or cancellation the task is aborted.
///
/// # Errors
/// Returns the [`DispatchFailure`] describing why no value was produced
pub async fn isolate<F, T>(
    correlation_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> std::result::Result<T, DispatchFailure>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);

    tokio::select! {
        joined = &mut handle => joined.map_err(|e| {
            if e.is_panic() {
                let msg = panic_message(e.into_panic());
                tracing::warn!(request_id = %correlation_id, panic = %msg, "Callback panicked");
                DispatchFailure::Panicked(msg)
            } else {
                DispatchFailure::Cancelled
            }
        }),
        () = tokio::time::sleep(timeout) => {
            handle.abort();
            tracing::warn!(
                request_id = %correlation_id,
                timeout = %format_duration(&timeout),
                "Callback timed out"
            );
            Err(DispatchFailure::TimedOut(timeout))
        }
        () = cancel.cancelled() => {
            handle.abort();
            tracing::debug!(request_id = %correlation_id, "Callback cancelled");
            Err(DispatchFailure::Cancelled)
        }
    }
}

/// Invoke one callback future and normalize its answer
pub async fn invoke<F>(
    correlation_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Decision
where
    F: Future<Output = Result<CallbackOutput>> + Send + 'static,
{
    match isolate(correlation_id, timeout, cancel, fut).await {
        Ok(Ok(output)) => normalize(output),
        Ok(Err(e)) => {
            tracing::warn!(request_id = %correlation_id, error = %e, "Callback returned an error");
            Decision::from_failure(DispatchFailure::Failed(e.to_string()))
        }
        Err(failure) => Decision::from_failure(failure),
    }
}

/// Collapse any callback answer into a [`Decision`]
#[must_use]
pub fn normalize(output: CallbackOutput) -> Decision {
    match output {
        CallbackOutput::Bool(true) => Decision::allow(),
        CallbackOutput::Bool(false) => Decision::deny(DENIED_BY_CALLBACK),
        CallbackOutput::Json(value) => decision_from_json(&value),
        CallbackOutput::Hook(output) => {
            decision_from_json(&serde_json::to_value(output).unwrap_or_default())
        }
        CallbackOutput::Permission(PermissionResult::Allow(allow)) => {
            let mut decision = match allow.updated_input {
                Some(input) => Decision::allow_with_modified_input(input),
                None => Decision::allow(),
            };
            decision.updated_permissions = allow.updated_permissions;
            decision
        }
        CallbackOutput::Permission(PermissionResult::Deny(deny)) => {
            Decision::deny(deny.message).with_interrupt(deny.interrupt)
        }
        CallbackOutput::Decision(decision) => decision,
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_str))
}

/// Interpret a loosely structured answer
///
/// Recognizes `behavior` or `decision` (`allow`/`approve`, `deny`/`block`,
/// `ask`), `reason` or `message`, `updatedInput`, `systemMessage`,
/// `interrupt` and `continue: false`, plus the same fields nested under
/// `hookSpecificOutput`. Anything else allows.
#[must_use]
pub fn decision_from_json(value: &Value) -> Decision {
    let specific = value.get("hookSpecificOutput").filter(|v| v.is_object());

    let verdict_name = str_field(value, &["behavior", "decision"])
        .or_else(|| specific.and_then(|s| str_field(s, &["permissionDecision"])));
    let reason = str_field(value, &["reason", "message"])
        .or_else(|| specific.and_then(|s| str_field(s, &["permissionDecisionReason"])))
        .or_else(|| str_field(value, &["stopReason"]))
        .map(String::from);
    let updated_input = value
        .get("updatedInput")
        .or_else(|| specific.and_then(|s| s.get("updatedInput")))
        .filter(|v| !v.is_null())
        .cloned();

    let verdict = match verdict_name {
        Some("deny" | "block") => Verdict::Deny,
        Some("ask") => Verdict::Ask,
        _ => match updated_input {
            Some(input) => Verdict::AllowWithModifiedInput(input),
            None => Verdict::Allow,
        },
    };

    let interrupt = value.get("interrupt").and_then(Value::as_bool).unwrap_or(false)
        || value.get("continue").and_then(Value::as_bool) == Some(false);

    Decision {
        reason: if verdict == Verdict::Deny {
            reason.or_else(|| Some(DENIED_BY_CALLBACK.to_string()))
        } else {
            reason
        },
        verdict,
        system_message: str_field(value, &["systemMessage"]).map(String::from),
        interrupt,
        updated_permissions: None,
        hook_specific_output: specific.cloned(),
        failure: None,
    }
}

/// Run matched hook callbacks in registration order
///
/// A deny (including a failed or timed-out callback) stops the chain and is
/// returned as-is. Rewritten input replaces `tool_input` for the callbacks
/// that follow, and the chain's result carries the final rewritten input.
/// An `ask` from any callback is remembered and wins over allow.
pub async fn run_hook_chain(
    chain: Vec<(Arc<dyn HookCallback>, Duration)>,
    mut input: Value,
    tool_use_id: Option<String>,
    context: HookContext,
    correlation_id: &str,
    cancel: &CancellationToken,
) -> Decision {
    let mut modified = false;
    let mut asked: Option<Decision> = None;
    let mut reason = None;
    let mut system_message = None;
    let mut hook_specific_output = None;
    let mut interrupt = false;

    for (position, (callback, timeout)) in chain.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Decision::from_failure(DispatchFailure::Cancelled);
        }

        let fut = {
            let input = input.clone();
            let tool_use_id = tool_use_id.clone();
            let context = context.clone();
            async move { callback.call(input, tool_use_id, context).await }
        };
        let decision = invoke(correlation_id, timeout, cancel, fut).await;

        if decision.is_deny() {
            tracing::debug!(request_id = %correlation_id, position, "Hook chain denied");
            return decision;
        }

        if let Some(rewritten) = decision.modified_input() {
            if let Some(fields) = input.as_object_mut() {
                fields.insert("tool_input".into(), rewritten.clone());
                modified = true;
            }
        }
        interrupt |= decision.interrupt;
        if decision.reason.is_some() {
            reason.clone_from(&decision.reason);
        }
        if decision.system_message.is_some() {
            system_message.clone_from(&decision.system_message);
        }
        if decision.hook_specific_output.is_some() {
            hook_specific_output.clone_from(&decision.hook_specific_output);
        }
        if decision.verdict == Verdict::Ask {
            asked = Some(decision);
        }
    }

    let mut result = match asked {
        Some(decision) => decision,
        None if modified => {
            Decision::allow_with_modified_input(input.get("tool_input").cloned().unwrap_or_default())
        }
        None => Decision::allow(),
    };
    result.reason = reason;
    result.system_message = system_message;
    result.hook_specific_output = hook_specific_output;
    result.interrupt = interrupt;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::FnHookCallback;
    use crate::types::HookOutput;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn link<F, Fut>(f: F, timeout: Duration) -> (Arc<dyn HookCallback>, Duration)
    where
        F: Fn(Value, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallbackOutput>> + Send + 'static,
    {
        (Arc::new(FnHookCallback::new(f)), timeout)
    }

    #[test]
    fn test_normalize_shapes() {
        assert_eq!(normalize(true.into()).verdict, Verdict::Allow);

        let denied = normalize(false.into());
        assert!(denied.is_deny());
        assert_eq!(denied.reason.as_deref(), Some("Denied by callback"));

        let blocked = normalize(HookOutput::block("nope").into());
        assert!(blocked.is_deny());
        assert_eq!(blocked.reason.as_deref(), Some("nope"));

        let rewritten = normalize(json!({"updatedInput": {"command": "ls"}}).into());
        assert_eq!(rewritten.modified_input(), Some(&json!({"command": "ls"})));

        let asked = normalize(json!({"behavior": "ask"}).into());
        assert_eq!(asked.verdict, Verdict::Ask);

        let perm = normalize(PermissionResult::deny("no writes").into());
        assert!(perm.is_deny());
        assert_eq!(perm.reason.as_deref(), Some("no writes"));
    }

    #[test]
    fn test_hook_specific_output_is_read() {
        let decision = decision_from_json(&json!({
            "hookSpecificOutput": {
                "hookEventName": "PreToolUse",
                "permissionDecision": "deny",
                "permissionDecisionReason": "protected path"
            }
        }));
        assert!(decision.is_deny());
        assert_eq!(decision.reason.as_deref(), Some("protected path"));
        assert!(decision.hook_specific_output.is_some());
    }

    #[test]
    fn test_continue_false_interrupts() {
        let decision = decision_from_json(&json!({"continue": false, "stopReason": "done"}));
        assert!(decision.interrupt);
        assert_eq!(decision.reason.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_timeout_denies_with_adaptive_message() {
        let cancel = CancellationToken::new();
        let decision = invoke("req_1", Duration::from_millis(50), &cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(CallbackOutput::Bool(true))
        })
        .await;

        assert!(decision.is_deny());
        assert_eq!(
            decision.failure,
            Some(DispatchFailure::TimedOut(Duration::from_millis(50)))
        );
        assert_eq!(
            decision.reason.as_deref(),
            Some("Callback timed out after 50ms")
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let cancel = CancellationToken::new();
        let decision = invoke("req_2", Duration::from_secs(5), &cancel, async {
            if true {
                panic!("boom");
            }
            Ok(CallbackOutput::Bool(true))
        })
        .await;

        assert_eq!(
            decision.failure,
            Some(DispatchFailure::Panicked("boom".to_string()))
        );
    }

    #[tokio::test]
    async fn test_error_becomes_failed() {
        let cancel = CancellationToken::new();
        let decision = invoke("req_3", Duration::from_secs(5), &cancel, async {
            Err(crate::AgentError::hook("bad input"))
        })
        .await;
        assert!(matches!(decision.failure, Some(DispatchFailure::Failed(_))));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_callback() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let decision = invoke("req_4", Duration::from_secs(30), &cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(CallbackOutput::Bool(true))
        })
        .await;
        assert_eq!(decision.failure, Some(DispatchFailure::Cancelled));
        assert_eq!(decision.reason.as_deref(), Some("request cancelled"));
    }

    #[tokio::test]
    async fn test_chain_passes_rewritten_input_forward() {
        let chain = vec![
            link(
                |_input, _id, _ctx| async {
                    Ok(json!({"updatedInput": {"command": "ls -la"}}).into())
                },
                DEFAULT_CALLBACK_TIMEOUT,
            ),
            link(
                |input, _id, _ctx| async move {
                    assert_eq!(input["tool_input"]["command"], "ls -la");
                    Ok(true.into())
                },
                DEFAULT_CALLBACK_TIMEOUT,
            ),
        ];

        let decision = run_hook_chain(
            chain,
            json!({"tool_name": "Bash", "tool_input": {"command": "ls"}}),
            None,
            HookContext::default(),
            "req_5",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(
            decision.modified_input(),
            Some(&json!({"command": "ls -la"}))
        );
    }

    #[tokio::test]
    async fn test_chain_allow_keeps_reason() {
        let chain = vec![
            link(
                |_input, _id, _ctx| async {
                    Ok(json!({"decision": "approve", "reason": "read-only command"}).into())
                },
                DEFAULT_CALLBACK_TIMEOUT,
            ),
            link(|_input, _id, _ctx| async { Ok(true.into()) }, DEFAULT_CALLBACK_TIMEOUT),
        ];

        let decision = run_hook_chain(
            chain,
            json!({"tool_name": "Bash", "tool_input": {"command": "ls"}}),
            None,
            HookContext::default(),
            "req_8",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.reason.as_deref(), Some("read-only command"));
        assert_eq!(
            decision.to_hook_response(),
            json!({"decision": "allow", "reason": "read-only command"})
        );
    }

    #[tokio::test]
    async fn test_chain_deny_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let after = Arc::clone(&calls);
        let chain = vec![
            link(
                |_input, _id, _ctx| async { Ok(HookOutput::block("dangerous").into()) },
                DEFAULT_CALLBACK_TIMEOUT,
            ),
            link(
                move |_input, _id, _ctx| {
                    after.fetch_add(1, Ordering::SeqCst);
                    async { Ok(true.into()) }
                },
                DEFAULT_CALLBACK_TIMEOUT,
            ),
        ];

        let decision = run_hook_chain(
            chain,
            json!({"tool_name": "Bash", "tool_input": {}}),
            None,
            HookContext::default(),
            "req_6",
            &CancellationToken::new(),
        )
        .await;
        assert!(decision.is_deny());
        assert_eq!(decision.reason.as_deref(), Some("dangerous"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_ask_wins_over_allow() {
        let chain = vec![
            link(
                |_input, _id, _ctx| async { Ok(json!({"decision": "ask"}).into()) },
                DEFAULT_CALLBACK_TIMEOUT,
            ),
            link(|_input, _id, _ctx| async { Ok(true.into()) }, DEFAULT_CALLBACK_TIMEOUT),
        ];

        let decision = run_hook_chain(
            chain,
            json!({}),
            None,
            HookContext::default(),
            "req_7",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(decision.verdict, Verdict::Ask);
    }
}
