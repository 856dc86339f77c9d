//! Permission Engine: session-scoped capability cache with single-flight
//! prompt coalescing (spec.md §4.3).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::warn;

use crate::journal::{Journal, JournalEventKind};
use crate::types::{GrantTtl, Permission, PermissionError, PermissionGrant, SessionId, StepId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Deny,
    AllowOnce,
    AllowSession,
    AllowAlways,
    AllowConstrained { constraints: serde_json::Value },
    AllowObserved { telemetry_level: String },
    DenyWithAlternative { reason: String, alternative: String },
}

#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn prompt(
        &self,
        session_id: SessionId,
        scopes: &[String],
    ) -> Result<ApprovalDecision, PermissionError>;
}

#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub session_id: SessionId,
    pub step_id: StepId,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionCheckResult {
    pub allowed: bool,
    pub constraints: Option<serde_json::Value>,
    pub observed: bool,
    pub alternative: Option<String>,
}

#[derive(Debug, Clone)]
struct StepCacheEntry {
    constraints: Option<serde_json::Value>,
    observed: bool,
}

/// Resolves a single outstanding prompt shared by every concurrent caller
/// for the same `(session_id, scope-set)` key (spec.md §9's "map[key] ->
/// pending-result-handle" pattern). The map itself is guarded by a
/// non-awaiting critical section (`DashMap`); only the `Notify::notified()`
/// wait happens across an await point.
struct PendingPrompt {
    notify: Arc<Notify>,
    result: parking_lot::Mutex<Option<Result<ApprovalDecision, String>>>,
}

pub struct PermissionEngine {
    journal: Option<Arc<Journal>>,
    prompter: Arc<dyn ApprovalPrompt>,
    session_grants: DashMap<SessionId, DashMap<String, PermissionGrant>>,
    step_cache: DashMap<(SessionId, StepId, String), StepCacheEntry>,
    inflight: DashMap<(SessionId, String), Arc<PendingPrompt>>,
}

impl PermissionEngine {
    pub fn new(prompter: Arc<dyn ApprovalPrompt>, journal: Option<Arc<Journal>>) -> Self {
        Self {
            journal,
            prompter,
            session_grants: DashMap::new(),
            step_cache: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    pub fn is_granted(&self, session_id: SessionId, scope: &str) -> bool {
        self.session_grants
            .get(&session_id)
            .map(|grants| grants.contains_key(scope))
            .unwrap_or(false)
    }

    /// Implements the §4.3 flow: classify cached vs. missing, single-flight
    /// the prompt for missing scopes, interpret the decision, cache per its
    /// ttl, and emit the request/grant/deny journal events.
    pub async fn check(&self, request: PermissionRequest) -> Result<PermissionCheckResult, PermissionError> {
        let mut missing = Vec::new();
        for scope in &request.scopes {
            if !self.is_granted(request.session_id, scope) {
                missing.push(scope.clone());
            }
        }

        if missing.is_empty() {
            return Ok(self.cached_result(&request));
        }

        self.emit(
            request.session_id,
            JournalEventKind::PermissionRequested,
            serde_json::json!({ "scopes": missing, "step_id": request.step_id.to_string() }),
        )
        .await;

        let key = (request.session_id, missing.join(","));
        let decision = self.single_flight_prompt(key, request.session_id, &missing).await?;

        self.apply_decision(&request, decision).await
    }

    fn cached_result(&self, request: &PermissionRequest) -> PermissionCheckResult {
        let mut constraints = None;
        let mut observed = false;
        for scope in &request.scopes {
            if let Some(entry) = self
                .step_cache
                .get(&(request.session_id, request.step_id, scope.clone()))
            {
                if entry.constraints.is_some() {
                    constraints = entry.constraints.clone();
                }
                observed = observed || entry.observed;
            }
        }
        PermissionCheckResult {
            allowed: true,
            constraints,
            observed,
            alternative: None,
        }
    }

    async fn single_flight_prompt(
        &self,
        key: (SessionId, String),
        session_id: SessionId,
        scopes: &[String],
    ) -> Result<ApprovalDecision, PermissionError> {
        // Leader/follower split: a non-awaiting critical section on the
        // DashMap decides who prompts; everyone then awaits the shared
        // Notify outside the section.
        let (pending, is_leader) = match self.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => (e.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let pending = Arc::new(PendingPrompt {
                    notify: Arc::new(Notify::new()),
                    result: parking_lot::Mutex::new(None),
                });
                e.insert(pending.clone());
                (pending, true)
            }
        };

        if is_leader {
            let outcome = self.prompter.prompt(session_id, scopes).await;
            *pending.result.lock() = Some(outcome.clone().map_err(|e| e.to_string()));
            self.inflight.remove(&key);
            pending.notify.notify_waiters();
            return outcome;
        }

        loop {
            if let Some(result) = pending.result.lock().clone() {
                return result.map_err(PermissionError::PromptFailed);
            }
            pending.notify.notified().await;
        }
    }

    async fn apply_decision(
        &self,
        request: &PermissionRequest,
        decision: ApprovalDecision,
    ) -> Result<PermissionCheckResult, PermissionError> {
        let now = chrono::Utc::now();
        let mut result = PermissionCheckResult::default();

        let grant_all = |ttl: GrantTtl, decision_name: &str, engine: &Self| {
            let grants = engine.session_grants.entry(request.session_id).or_default();
            for scope in &request.scopes {
                grants.insert(
                    scope.clone(),
                    PermissionGrant {
                        scope: scope.clone(),
                        decision: decision_name.to_string(),
                        granted_by: "approval_prompt".to_string(),
                        granted_at: now,
                        ttl,
                    },
                );
            }
        };

        match decision {
            ApprovalDecision::Deny => {
                self.emit(
                    request.session_id,
                    JournalEventKind::PermissionDenied,
                    serde_json::json!({ "scopes": request.scopes }),
                )
                .await;
                return Ok(PermissionCheckResult {
                    allowed: false,
                    ..Default::default()
                });
            }
            ApprovalDecision::AllowOnce => {
                // ttl=step, deliberately NOT cached session-wide: every
                // subsequent step reprompts (spec.md §4.3).
                result.allowed = true;
            }
            ApprovalDecision::AllowSession => {
                grant_all(GrantTtl::Session, "allow_session", self);
                result.allowed = true;
            }
            ApprovalDecision::AllowAlways => {
                // Cached per-session only, even though semantically
                // "global" (see DESIGN.md open-question decision).
                grant_all(GrantTtl::Session, "allow_always", self);
                result.allowed = true;
            }
            ApprovalDecision::AllowConstrained { constraints } => {
                grant_all(GrantTtl::Session, "allow_constrained", self);
                for scope in &request.scopes {
                    self.step_cache.insert(
                        (request.session_id, request.step_id, scope.clone()),
                        StepCacheEntry {
                            constraints: Some(constraints.clone()),
                            observed: false,
                        },
                    );
                }
                result.allowed = true;
                result.constraints = Some(constraints);
            }
            ApprovalDecision::AllowObserved { telemetry_level } => {
                grant_all(GrantTtl::Session, "allow_observed", self);
                for scope in &request.scopes {
                    self.step_cache.insert(
                        (request.session_id, request.step_id, scope.clone()),
                        StepCacheEntry {
                            constraints: None,
                            observed: true,
                        },
                    );
                }
                let _ = telemetry_level;
                result.allowed = true;
                result.observed = true;
            }
            ApprovalDecision::DenyWithAlternative { reason, alternative } => {
                self.emit(
                    request.session_id,
                    JournalEventKind::PermissionDenied,
                    serde_json::json!({ "scopes": request.scopes, "reason": reason }),
                )
                .await;
                return Ok(PermissionCheckResult {
                    allowed: false,
                    alternative: Some(alternative),
                    ..Default::default()
                });
            }
        }

        self.emit(
            request.session_id,
            JournalEventKind::PermissionGranted,
            serde_json::json!({ "scopes": request.scopes }),
        )
        .await;
        Ok(result)
    }

    pub fn clear_session(&self, session_id: Option<SessionId>) {
        match session_id {
            Some(id) => {
                self.session_grants.remove(&id);
                self.step_cache.retain(|(sid, _, _), _| *sid != id);
            }
            None => {
                self.session_grants.clear();
                self.step_cache.clear();
            }
        }
    }

    pub fn clear_step(&self, session_id: Option<SessionId>) {
        match session_id {
            Some(id) => {
                self.step_cache.retain(|(sid, _, _), entry| {
                    *sid != id || entry.constraints.is_none()
                });
            }
            None => self.step_cache.clear(),
        }
    }

    pub fn list_grants(&self, session_id: SessionId) -> Vec<PermissionGrant> {
        self.session_grants
            .get(&session_id)
            .map(|grants| grants.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    async fn emit(&self, session_id: SessionId, kind: JournalEventKind, payload: serde_json::Value) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.emit(session_id, kind, payload).await {
                warn!(error = %err, "permission engine journal emission failed");
            }
        }
    }
}

/// Convenience helper for callers that just want a scope string parsed and
/// immediately turned into a permission request target check.
pub fn parse_scope(scope: &str) -> Result<Permission, PermissionError> {
    Permission::parse(scope).map_err(PermissionError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPrompt {
        decision: ApprovalDecision,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApprovalPrompt for FixedPrompt {
        async fn prompt(
            &self,
            _session_id: SessionId,
            _scopes: &[String],
        ) -> Result<ApprovalDecision, PermissionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Simulates a suspended human-approval prompt so concurrent
            // single-flight tests actually observe the leader/follower
            // split instead of racing to completion synchronously.
            tokio::task::yield_now().await;
            Ok(self.decision.clone())
        }
    }

    fn engine(decision: ApprovalDecision) -> (PermissionEngine, Arc<FixedPrompt>) {
        let prompt = Arc::new(FixedPrompt {
            decision,
            calls: AtomicUsize::new(0),
        });
        let engine = PermissionEngine::new(prompt.clone(), None);
        (engine, prompt)
    }

    // S2 from spec.md §8.
    #[tokio::test]
    async fn repeated_check_with_allow_session_prompts_once() {
        let (engine, prompt) = engine(ApprovalDecision::AllowSession);
        let session = SessionId::new();
        let step = StepId::new();
        let request = || PermissionRequest {
            session_id: session,
            step_id: step,
            scopes: vec!["filesystem:read:workspace".to_string()],
        };

        let first = engine.check(request()).await.unwrap();
        let second = engine.check(request()).await.unwrap();

        assert!(first.allowed);
        assert!(second.allowed);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deny_does_not_cache_a_grant() {
        let (engine, _prompt) = engine(ApprovalDecision::Deny);
        let session = SessionId::new();
        let result = engine
            .check(PermissionRequest {
                session_id: session,
                step_id: StepId::new(),
                scopes: vec!["network:fetch:https://x".to_string()],
            })
            .await
            .unwrap();
        assert!(!result.allowed);
        assert!(engine.list_grants(session).is_empty());
    }

    #[tokio::test]
    async fn allow_once_does_not_persist_across_checks() {
        let (engine, prompt) = engine(ApprovalDecision::AllowOnce);
        let session = SessionId::new();
        let scopes = vec!["command:exec:ls".to_string()];

        let first = engine
            .check(PermissionRequest {
                session_id: session,
                step_id: StepId::new(),
                scopes: scopes.clone(),
            })
            .await
            .unwrap();
        let second = engine
            .check(PermissionRequest {
                session_id: session,
                step_id: StepId::new(),
                scopes,
            })
            .await
            .unwrap();

        assert!(first.allowed && second.allowed);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_session_empties_listed_grants() {
        let (engine, _prompt) = engine(ApprovalDecision::AllowSession);
        let session = SessionId::new();
        engine
            .check(PermissionRequest {
                session_id: session,
                step_id: StepId::new(),
                scopes: vec!["filesystem:read:workspace".to_string()],
            })
            .await
            .unwrap();
        assert!(!engine.list_grants(session).is_empty());

        engine.clear_session(Some(session));
        assert!(engine.list_grants(session).is_empty());
    }

    // S3 from spec.md §8: two concurrent checks for the same scope share
    // one prompt invocation.
    #[tokio::test]
    async fn concurrent_checks_for_same_scope_single_flight() {
        let (engine, prompt) = engine(ApprovalDecision::AllowSession);
        let engine = Arc::new(engine);
        let session = SessionId::new();
        let scopes = vec!["network:browser:https".to_string()];

        let e1 = engine.clone();
        let s1 = scopes.clone();
        let e2 = engine.clone();
        let s2 = scopes.clone();
        let (r1, r2) = tokio::join!(
            e1.check(PermissionRequest {
                session_id: session,
                step_id: StepId::new(),
                scopes: s1,
            }),
            e2.check(PermissionRequest {
                session_id: session,
                step_id: StepId::new(),
                scopes: s2,
            })
        );

        assert!(r1.unwrap().allowed);
        assert!(r2.unwrap().allowed);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    }
}
