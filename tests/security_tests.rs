//! Security and robustness tests
//!
//! User callbacks must never be able to stall the session: timeouts have to
//! fire, cancellation has to reach the callback, and the spawned process must
//! not inherit loader overrides.

mod common;

use agent_control_client::control::CanUseToolRequest;
use agent_control_client::dispatch::{self, DEFAULT_CALLBACK_TIMEOUT};
use agent_control_client::hooks::{HookMatcherBuilder, HookRegistry};
use agent_control_client::types::{DispatchFailure, HookContext, HookEvent, HookOutput, Verdict};
use agent_control_client::{
    AgentError, ClientOptions, ControlClient, PermissionManager, PermissionResult, SpawnSpec,
    ToolName,
};
use common::{connect, spawn_spec};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn registry_with(timeout: Duration, delay: Duration) -> HookRegistry {
    let sleepy = HookRegistry::callback(move |_input, _id, _ctx| async move {
        tokio::time::sleep(delay).await;
        Ok(HookOutput::default())
    });
    let mut config = HashMap::new();
    config.insert(
        HookEvent::PreToolUse,
        vec![
            HookMatcherBuilder::new(Some("Bash"))
                .add_hook(sleepy)
                .timeout(timeout)
                .build(),
        ],
    );
    HookRegistry::from_config(config)
}

fn bash_input() -> serde_json::Value {
    json!({"hook_event_name": "PreToolUse", "tool_name": "Bash", "tool_input": {"command": "ls"}})
}

#[tokio::test]
async fn test_timeout_actually_prevents_blocking() {
    let registry = registry_with(Duration::from_millis(100), Duration::from_secs(10));
    let chain = registry.chain_for(HookEvent::PreToolUse, Some("Bash"));
    assert_eq!(chain.len(), 1);

    let started = Instant::now();
    let decision = dispatch::run_hook_chain(
        chain,
        bash_input(),
        None,
        HookContext::default(),
        "req-1",
        &CancellationToken::new(),
    )
    .await;
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(2),
        "hook blocked for {elapsed:?}"
    );
    assert_eq!(decision.verdict, Verdict::Deny);
    assert_eq!(
        decision.failure,
        Some(DispatchFailure::TimedOut(Duration::from_millis(100)))
    );
}

#[tokio::test]
async fn test_callback_finishing_under_timeout_completes() {
    let registry = registry_with(Duration::from_millis(500), Duration::from_millis(20));
    let decision = dispatch::run_hook_chain(
        registry.chain_for(HookEvent::PreToolUse, Some("Bash")),
        bash_input(),
        None,
        HookContext::default(),
        "req-1",
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(decision.verdict, Verdict::Allow);
    assert!(decision.failure.is_none());
}

#[tokio::test]
async fn test_concurrent_callbacks_time_out_independently() {
    let registry = Arc::new(registry_with(
        Duration::from_millis(200),
        Duration::from_secs(10),
    ));
    let started = Instant::now();

    let runs: Vec<_> = (0..5)
        .map(|n| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                dispatch::run_hook_chain(
                    registry.chain_for(HookEvent::PreToolUse, Some("Bash")),
                    bash_input(),
                    None,
                    HookContext::default(),
                    &format!("req-{n}"),
                    &CancellationToken::new(),
                )
                .await
            })
        })
        .collect();

    for run in runs {
        let decision = run.await.unwrap();
        assert!(matches!(
            decision.failure,
            Some(DispatchFailure::TimedOut(_))
        ));
    }
    // Five serial timeouts would take a full second
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn test_cancel_request_reaches_hook_context() {
    let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let stash = Arc::clone(&seen);
    let hook = HookRegistry::callback(move |_input, _id, context: HookContext| {
        let stash = Arc::clone(&stash);
        async move {
            *stash.lock().unwrap() = context.cancellation_token.clone();
            std::future::pending::<()>().await;
            Ok(HookOutput::default())
        }
    });
    let mut hooks = HashMap::new();
    hooks.insert(
        HookEvent::PreToolUse,
        vec![HookMatcherBuilder::new(None::<String>).add_hook(hook).build()],
    );
    let options = ClientOptions::builder().spawn(spawn_spec()).hooks(hooks).build();
    let (_client, mut peer, _) = connect(options).await;

    peer.request(
        "cli_1",
        json!({"subtype": "hook_callback", "callback_id": "hook_0", "input": bash_input()}),
    );
    let token = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(token) = seen.lock().unwrap().clone() {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hook never ran");
    assert!(!token.is_cancelled());

    peer.cancel("cli_1");
    let response = peer.expect_response("cli_1").await;
    assert_eq!(response["subtype"], "error");
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn test_close_cancels_in_flight_callbacks() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let stash = Arc::clone(&seen);
    let callback = PermissionManager::callback(move |_tool, _input, context| {
        counter.fetch_add(1, Ordering::SeqCst);
        let stash = Arc::clone(&stash);
        async move {
            *stash.lock().unwrap() = context.cancellation_token.clone();
            std::future::pending::<()>().await;
            Ok(PermissionResult::allow())
        }
    });
    let options = ClientOptions::builder()
        .spawn(spawn_spec())
        .can_use_tool(callback)
        .close_grace_period(Duration::from_millis(50))
        .build();
    let (client, mut peer, _) = connect(options).await;

    peer.request(
        "p1",
        json!({"subtype": "can_use_tool", "tool_name": "Write", "input": {}}),
    );
    while calls.load(Ordering::SeqCst) == 0 || seen.lock().unwrap().is_none() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.close().await.unwrap();
    let token = seen.lock().unwrap().clone().unwrap();
    assert!(token.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_permission_check_honours_cancellation() {
    let callback = PermissionManager::callback(|_tool, _input, context| async move {
        let token = context.cancellation_token.clone().unwrap();
        token.cancelled().await;
        Ok(PermissionResult::allow())
    });
    let manager = PermissionManager::new([], [], Some(callback));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let request = CanUseToolRequest {
        tool_name: ToolName::from("Write"),
        input: json!({"path": "/etc/passwd"}),
        permission_suggestions: vec![],
        blocked_path: Some("/etc/passwd".to_string()),
        tool_use_id: None,
    };
    let decision = manager.check(request, "p1", &cancel).await.unwrap();
    assert_eq!(decision.failure, Some(DispatchFailure::Cancelled));
    assert_eq!(decision.verdict, Verdict::Deny);
}

#[tokio::test]
async fn test_loader_override_is_refused_before_spawn() {
    let mut env = HashMap::new();
    env.insert("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string());
    let spawn = SpawnSpec::builder().program("cat").env(env).build();
    let options = ClientOptions::builder().spawn(spawn).build();

    match ControlClient::connect(options).await {
        Err(AgentError::InvalidConfig(msg)) => assert!(msg.contains("LD_PRELOAD")),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_default_callback_timeout_is_sixty_seconds() {
    assert_eq!(DEFAULT_CALLBACK_TIMEOUT, Duration::from_secs(60));
}
