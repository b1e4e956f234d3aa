//! Hook registry
//!
//! Hooks are registered by event type (`PreToolUse`, `PostToolUse`, ...).
//! Each event can have several matchers, and each matcher filters by tool name
//! (`"Bash"`, `"Write|Edit"`, `"*"`) and holds callbacks that run in order.
//!
//! Every callback gets a stable id (`hook_0`, `hook_1`, ...) assigned in event
//! order, then registration order. The ids are advertised to the agent in the
//! `initialize` request, and `hook_callback` requests name the id to run.
//!
//! # Example
//!
//! ```no_run
//! use agent_control_client::hooks::{HookMatcherBuilder, HookRegistry};
//! use agent_control_client::types::{HookEvent, HookOutput};
//! use std::collections::HashMap;
//!
//! let guard = HookRegistry::callback(|input, _tool_use_id, _ctx| async move {
//!     let command = input["tool_input"]["command"].as_str().unwrap_or_default();
//!     if command.contains("rm -rf") {
//!         Ok(HookOutput::block("dangerous command"))
//!     } else {
//!         Ok(HookOutput::default())
//!     }
//! });
//!
//! let mut hooks = HashMap::new();
//! hooks.insert(
//!     HookEvent::PreToolUse,
//!     vec![HookMatcherBuilder::new(Some("Bash")).add_hook(guard).build()],
//! );
//! let registry = HookRegistry::from_config(hooks);
//! assert!(registry.callback_by_id("hook_0").is_some());
//! ```

use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::callbacks::{CallbackOutput, FnHookCallback, HookCallback};
use crate::dispatch::DEFAULT_CALLBACK_TIMEOUT;
use crate::error::Result;
use crate::types::{HookContext, HookEvent, HookMatcher};

/// Callback plus the timeout it runs under
pub type ChainLink = (Arc<dyn HookCallback>, Duration);

struct MatcherEntry {
    matcher: Option<String>,
    callback_ids: Vec<String>,
    timeout: Option<Duration>,
}

/// Registered hooks, indexed by event and by callback id
#[derive(Default)]
pub struct HookRegistry {
    events: BTreeMap<HookEvent, Vec<MatcherEntry>>,
    by_id: HashMap<String, ChainLink>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("callbacks", &self.by_id.len())
            .finish()
    }
}

impl HookRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from hook configuration, assigning callback ids
    #[must_use]
    pub fn from_config(config: HashMap<HookEvent, Vec<HookMatcher>>) -> Self {
        let mut registry = Self::new();
        let ordered: BTreeMap<HookEvent, Vec<HookMatcher>> = config.into_iter().collect();
        let mut next_id = 0usize;

        for (event, matchers) in ordered {
            let entries = registry.events.entry(event).or_default();
            for matcher in matchers {
                let timeout = matcher.timeout.unwrap_or(DEFAULT_CALLBACK_TIMEOUT);
                let mut callback_ids = Vec::with_capacity(matcher.hooks.len());
                for hook in matcher.hooks {
                    let id = format!("hook_{next_id}");
                    next_id += 1;
                    registry.by_id.insert(id.clone(), (hook, timeout));
                    callback_ids.push(id);
                }
                entries.push(MatcherEntry {
                    matcher: matcher.matcher,
                    callback_ids,
                    timeout: matcher.timeout,
                });
            }
        }

        registry
    }

    /// True when no callbacks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Hook section of the `initialize` request, `None` when there are no hooks
    ///
    /// `{"PreToolUse": [{"matcher": "Bash", "hookCallbackIds": ["hook_0"], "timeout": 60}]}`
    #[must_use]
    pub fn initialize_config(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }

        let mut config = Map::new();
        for (event, entries) in &self.events {
            let matchers: Vec<Value> = entries
                .iter()
                .map(|entry| {
                    let mut m = Map::new();
                    m.insert(
                        "matcher".into(),
                        entry.matcher.as_ref().map_or(Value::Null, |p| json!(p)),
                    );
                    m.insert("hookCallbackIds".into(), json!(entry.callback_ids));
                    if let Some(timeout) = entry.timeout {
                        m.insert("timeout".into(), json!(timeout.as_secs().max(1)));
                    }
                    Value::Object(m)
                })
                .collect();
            config.insert(event.as_str().to_string(), Value::Array(matchers));
        }
        Some(Value::Object(config))
    }

    /// Callback registered under `callback_id`
    #[must_use]
    pub fn callback_by_id(&self, callback_id: &str) -> Option<ChainLink> {
        self.by_id.get(callback_id).cloned()
    }

    /// Callbacks to run for `event` on `tool_name`, in registration order
    #[must_use]
    pub fn chain_for(&self, event: HookEvent, tool_name: Option<&str>) -> Vec<ChainLink> {
        let Some(entries) = self.events.get(&event) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter(|entry| Self::matches(entry.matcher.as_deref(), tool_name))
            .flat_map(|entry| entry.callback_ids.iter())
            .filter_map(|id| self.by_id.get(id).cloned())
            .collect()
    }

    /// Check if a matcher pattern matches a tool name
    ///
    /// No pattern and `"*"` match everything. Otherwise the pattern is an
    /// exact tool name or `|`-separated alternatives.
    #[must_use]
    pub fn matches(pattern: Option<&str>, tool_name: Option<&str>) -> bool {
        match (pattern, tool_name) {
            (None | Some("*"), _) => true,
            (Some(pattern), Some(name)) => {
                pattern == name || pattern.split('|').any(|p| p.trim() == name)
            }
            (Some(_), None) => false,
        }
    }

    /// Create a hook callback from a closure
    ///
    /// The closure may return anything convertible into [`CallbackOutput`]:
    /// `bool`, a JSON value, [`HookOutput`](crate::types::HookOutput) or a
    /// [`Decision`](crate::types::Decision).
    pub fn callback<F, Fut, R>(f: F) -> Arc<dyn HookCallback>
    where
        F: Fn(Value, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<R>> + Send + 'static,
        R: Into<CallbackOutput>,
    {
        Arc::new(FnHookCallback::new(f))
    }
}

/// Builder for creating hook matchers
pub struct HookMatcherBuilder {
    matcher: Option<String>,
    hooks: Vec<Arc<dyn HookCallback>>,
    timeout: Option<Duration>,
}

impl HookMatcherBuilder {
    /// Create a new hook matcher builder
    ///
    /// # Arguments
    /// * `pattern` - Matcher pattern (None for all, or specific tool name/pattern)
    pub fn new(pattern: Option<impl Into<String>>) -> Self {
        Self {
            matcher: pattern.map(Into::into),
            hooks: Vec::new(),
            timeout: None,
        }
    }

    /// Add a hook callback
    #[must_use]
    pub fn add_hook(mut self, hook: Arc<dyn HookCallback>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Set timeout for each hook in this matcher
    ///
    /// Default is 60 seconds if not specified.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the hook matcher
    #[must_use]
    pub fn build(self) -> HookMatcher {
        HookMatcher {
            matcher: self.matcher,
            hooks: self.hooks,
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HookOutput;

    fn noop() -> Arc<dyn HookCallback> {
        HookRegistry::callback(|_input, _id, _ctx| async { Ok(HookOutput::default()) })
    }

    fn sample() -> HookRegistry {
        let mut config = HashMap::new();
        config.insert(
            HookEvent::PostToolUse,
            vec![HookMatcherBuilder::new(None::<String>).add_hook(noop()).build()],
        );
        config.insert(
            HookEvent::PreToolUse,
            vec![
                HookMatcherBuilder::new(Some("Bash"))
                    .add_hook(noop())
                    .add_hook(noop())
                    .timeout(Duration::from_secs(5))
                    .build(),
                HookMatcherBuilder::new(Some("Write|Edit"))
                    .add_hook(noop())
                    .build(),
            ],
        );
        HookRegistry::from_config(config)
    }

    #[test]
    fn test_matches() {
        assert!(HookRegistry::matches(None, Some("Bash")));
        assert!(HookRegistry::matches(Some("*"), None));
        assert!(HookRegistry::matches(Some("Bash"), Some("Bash")));
        assert!(HookRegistry::matches(Some("Write|Edit"), Some("Edit")));
        assert!(!HookRegistry::matches(Some("Write|Edit"), Some("Bash")));
        assert!(!HookRegistry::matches(Some("Bash"), None));
    }

    #[test]
    fn test_ids_follow_event_then_registration_order() {
        let registry = sample();
        let config = registry.initialize_config().unwrap();

        assert_eq!(
            config["PreToolUse"][0]["hookCallbackIds"],
            json!(["hook_0", "hook_1"])
        );
        assert_eq!(config["PreToolUse"][0]["matcher"], "Bash");
        assert_eq!(config["PreToolUse"][0]["timeout"], 5);
        assert_eq!(config["PreToolUse"][1]["hookCallbackIds"], json!(["hook_2"]));
        assert!(config["PreToolUse"][1].get("timeout").is_none());
        assert_eq!(config["PostToolUse"][0]["hookCallbackIds"], json!(["hook_3"]));
        assert_eq!(config["PostToolUse"][0]["matcher"], Value::Null);
    }

    #[test]
    fn test_chain_for_filters_by_tool() {
        let registry = sample();
        assert_eq!(registry.chain_for(HookEvent::PreToolUse, Some("Bash")).len(), 2);
        assert_eq!(registry.chain_for(HookEvent::PreToolUse, Some("Edit")).len(), 1);
        assert!(registry.chain_for(HookEvent::PreToolUse, Some("Read")).is_empty());
        assert!(registry.chain_for(HookEvent::Stop, None).is_empty());

        let (_, timeout) = registry.callback_by_id("hook_0").unwrap();
        assert_eq!(timeout, Duration::from_secs(5));
        let (_, timeout) = registry.callback_by_id("hook_2").unwrap();
        assert_eq!(timeout, DEFAULT_CALLBACK_TIMEOUT);
    }

    #[test]
    fn test_empty_registry_sends_no_hooks() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.initialize_config().is_none());
        assert!(registry.chain_for(HookEvent::PreToolUse, Some("Bash")).is_empty());
    }
}
