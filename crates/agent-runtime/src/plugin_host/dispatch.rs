//! Hook dispatch pipeline: priority-ordered chain with
//! continue/observe/modify/block semantics and a per-(plugin, hook)
//! circuit breaker (spec.md §4.7).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::api::{HookFn, HookVerdict};
use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::journal::{Journal, JournalEventKind};
use crate::types::SessionId;

struct Entry {
    plugin_id: String,
    priority: i32,
    func: HookFn,
}

pub enum HookFinalAction {
    Continue,
    Observe,
    Block { reason: String },
}

pub struct HookOutcome {
    pub context: Value,
    pub action: HookFinalAction,
}

pub struct HookDispatcher {
    hooks: DashMap<String, Vec<Entry>>,
    circuit_breakers: CircuitBreakerRegistry,
    journal: Option<Arc<Journal>>,
}

impl HookDispatcher {
    pub fn new(circuit_config: CircuitBreakerConfig, journal: Option<Arc<Journal>>) -> Self {
        Self {
            hooks: DashMap::new(),
            circuit_breakers: CircuitBreakerRegistry::new(circuit_config),
            journal,
        }
    }

    pub fn register(&self, hook_name: &str, plugin_id: &str, priority: i32, func: HookFn) {
        let mut entries = self.hooks.entry(hook_name.to_string()).or_default();
        entries.push(Entry {
            plugin_id: plugin_id.to_string(),
            priority,
            func,
        });
        entries.sort_by_key(|e| e.priority);
    }

    pub fn remove_plugin(&self, plugin_id: &str) {
        for mut entries in self.hooks.iter_mut() {
            entries.retain(|e| e.plugin_id != plugin_id);
        }
    }

    fn circuit_key(plugin_id: &str, hook_name: &str) -> String {
        format!("{plugin_id}::{hook_name}")
    }

    pub async fn dispatch(&self, hook_name: &str, session_id: SessionId, mut context: Value) -> HookOutcome {
        let entries: Vec<(String, i32, HookFn)> = self
            .hooks
            .get(hook_name)
            .map(|v| v.iter().map(|e| (e.plugin_id.clone(), e.priority, e.func.clone())).collect())
            .unwrap_or_default();

        let mut observed = false;

        for (plugin_id, _priority, func) in entries {
            let key = Self::circuit_key(&plugin_id, hook_name);
            if self.circuit_breakers.check(&key).is_err() {
                observed = true;
                continue;
            }

            match func(&context) {
                Ok(HookVerdict::Continue) => {
                    self.circuit_breakers.record_success(&key);
                }
                Ok(HookVerdict::Observe) => {
                    self.circuit_breakers.record_success(&key);
                    observed = true;
                }
                Ok(HookVerdict::Modify(data)) => {
                    self.circuit_breakers.record_success(&key);
                    merge_shallow(&mut context, &data);
                }
                Ok(HookVerdict::Block { reason }) => {
                    self.circuit_breakers.record_success(&key);
                    self.emit(session_id, hook_name, &plugin_id, "blocked").await;
                    return HookOutcome {
                        context,
                        action: HookFinalAction::Block { reason },
                    };
                }
                Err(err) => {
                    observed = true;
                    let tripped = self.circuit_breakers.record_failure(&key);
                    tracing::warn!(hook = hook_name, plugin = %plugin_id, error = %err, "plugin hook failed");
                    if tripped {
                        self.emit_circuit_open(session_id, hook_name, &plugin_id).await;
                    }
                }
            }
        }

        self.emit(session_id, hook_name, "*", if observed { "observed" } else { "continued" }).await;

        HookOutcome {
            context,
            action: if observed { HookFinalAction::Observe } else { HookFinalAction::Continue },
        }
    }

    async fn emit(&self, session_id: SessionId, hook_name: &str, plugin_id: &str, outcome: &str) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal
                .emit(
                    session_id,
                    JournalEventKind::PluginHookFired,
                    serde_json::json!({"hook": hook_name, "plugin": plugin_id, "outcome": outcome}),
                )
                .await
            {
                tracing::warn!(error = %err, "hook dispatch journal emission failed");
            }
        }
    }

    async fn emit_circuit_open(&self, session_id: SessionId, hook_name: &str, plugin_id: &str) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal
                .emit(
                    session_id,
                    JournalEventKind::PluginHookCircuitOpen,
                    serde_json::json!({"hook": hook_name, "plugin": plugin_id}),
                )
                .await
            {
                tracing::warn!(error = %err, "circuit-open journal emission failed");
            }
        }
    }
}

fn merge_shallow(target: &mut Value, patch: &Value) {
    if let (Some(target_obj), Some(patch_obj)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            target_obj.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sid() -> SessionId {
        SessionId::new()
    }

    #[tokio::test]
    async fn continue_chain_runs_all_hooks_in_priority_order() {
        let dispatcher = HookDispatcher::new(CircuitBreakerConfig::default(), None);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        dispatcher.register(
            "before_step",
            "plugin-b",
            10,
            Arc::new(move |_ctx| {
                o2.lock().unwrap().push("b");
                Ok(HookVerdict::Continue)
            }),
        );
        dispatcher.register(
            "before_step",
            "plugin-a",
            1,
            Arc::new(move |_ctx| {
                o1.lock().unwrap().push("a");
                Ok(HookVerdict::Continue)
            }),
        );
        let outcome = dispatcher.dispatch("before_step", sid(), serde_json::json!({})).await;
        assert!(matches!(outcome.action, HookFinalAction::Continue));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn block_short_circuits_remaining_hooks() {
        let dispatcher = HookDispatcher::new(CircuitBreakerConfig::default(), None);
        let called = Arc::new(AtomicUsize::new(0));
        let called2 = called.clone();
        dispatcher.register(
            "before_step",
            "plugin-a",
            1,
            Arc::new(|_ctx| Ok(HookVerdict::Block { reason: "nope".into() })),
        );
        dispatcher.register(
            "before_step",
            "plugin-b",
            2,
            Arc::new(move |_ctx| {
                called2.fetch_add(1, Ordering::SeqCst);
                Ok(HookVerdict::Continue)
            }),
        );
        let outcome = dispatcher.dispatch("before_step", sid(), serde_json::json!({})).await;
        assert!(matches!(outcome.action, HookFinalAction::Block { .. }));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn modify_merges_into_context_for_downstream_hooks() {
        let dispatcher = HookDispatcher::new(CircuitBreakerConfig::default(), None);
        dispatcher.register(
            "before_step",
            "plugin-a",
            1,
            Arc::new(|_ctx| Ok(HookVerdict::Modify(serde_json::json!({"tagged": true})))),
        );
        let seen = Arc::new(std::sync::Mutex::new(false));
        let seen2 = seen.clone();
        dispatcher.register(
            "before_step",
            "plugin-b",
            2,
            Arc::new(move |ctx| {
                *seen2.lock().unwrap() = ctx.get("tagged").and_then(|v| v.as_bool()).unwrap_or(false);
                Ok(HookVerdict::Continue)
            }),
        );
        dispatcher.dispatch("before_step", sid(), serde_json::json!({})).await;
        assert!(*seen.lock().unwrap());
    }

    #[tokio::test]
    async fn repeated_failures_trip_circuit_and_fall_back_to_observe() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        };
        let dispatcher = HookDispatcher::new(config, None);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        dispatcher.register(
            "before_step",
            "flaky-plugin",
            1,
            Arc::new(move |_ctx| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            }),
        );
        for _ in 0..5 {
            let outcome = dispatcher.dispatch("before_step", sid(), serde_json::json!({})).await;
            assert!(matches!(outcome.action, HookFinalAction::Observe));
        }
        // after the circuit opens, the hook stops being invoked at all
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
