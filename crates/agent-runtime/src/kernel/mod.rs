//! The Kernel: session lifecycle, plan execution, and the futility /
//! context-budget feedback loops that keep a session from running away
//! (spec.md §4.5).
//!
//! State machine per session:
//! `created --accept--> planning --plan--> running --done--> completed`,
//! with `running --replan--> planning`, and `error`/`abort` reachable from
//! `planning` or `running` into `failed`/`aborted`. Terminal states are
//! sticky (enforced by the journal's own per-session terminal flag).

pub mod context_budget;
pub mod futility;
pub mod planner;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::journal::{Journal, JournalEventKind};
use crate::tool_runtime::{Invocation, ToolRuntime};
use crate::types::{
    FailurePolicy, KernelError, Plan, Session, SessionCheckpoint, SessionId, SessionLimits,
    SessionMode, SessionPolicy, SessionStatus, Step, StepId, StepResult, StepStatus, Task,
};

use context_budget::{ContextBudgetConfig, ContextBudgetInput, ContextBudgetMonitor, ContextBudgetVerdict};
use futility::{FutilityConfig, FutilityInput, FutilityMonitor, FutilityVerdict};
use planner::Planner;

pub struct Kernel {
    journal: Arc<Journal>,
    tool_runtime: Arc<ToolRuntime>,
    planner: Arc<dyn Planner>,
    futility: Mutex<FutilityMonitor>,
    context_budget: Mutex<ContextBudgetMonitor>,
    sessions: dashmap::DashMap<SessionId, Session>,
    aborted: dashmap::DashMap<SessionId, ()>,
    max_concurrent_sessions: usize,
}

impl Kernel {
    pub fn new(
        journal: Arc<Journal>,
        tool_runtime: Arc<ToolRuntime>,
        planner: Arc<dyn Planner>,
        futility_config: FutilityConfig,
        context_budget_config: ContextBudgetConfig,
        max_concurrent_sessions: usize,
    ) -> Self {
        Self {
            journal,
            tool_runtime,
            planner,
            futility: Mutex::new(FutilityMonitor::new(futility_config)),
            context_budget: Mutex::new(ContextBudgetMonitor::new(context_budget_config)),
            sessions: dashmap::DashMap::new(),
            aborted: dashmap::DashMap::new(),
            max_concurrent_sessions,
        }
    }

    fn live_session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|e| !e.value().status.is_terminal())
            .count()
    }

    /// Creates a new session in `created` state and journals `session.created`.
    /// Does not start executing it — call `run` for that.
    pub async fn create_session(
        &self,
        task_text: impl Into<String>,
        mode: SessionMode,
        limits: SessionLimits,
        policy: SessionPolicy,
    ) -> Result<SessionId, KernelError> {
        if self.live_session_count() >= self.max_concurrent_sessions {
            return Err(KernelError::ConcurrencyLimit);
        }
        let task = Task::new(task_text)?;
        let session = Session::new(task, mode, limits, policy);
        let session_id = session.session_id;

        self.journal
            .emit(
                session_id,
                JournalEventKind::SessionCreated,
                serde_json::json!({
                    "task": session.task,
                    "mode": session.mode,
                    "limits": session.limits,
                    "policy": session.policy,
                }),
            )
            .await?;

        self.sessions.insert(session_id, session);
        Ok(session_id)
    }

    /// Drives a session from `created` through to a terminal state,
    /// replanning and checkpointing as the futility / context-budget
    /// monitors direct.
    pub async fn run(&self, session_id: SessionId) -> Result<SessionStatus, KernelError> {
        {
            let mut session = self
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
            if session.status.is_terminal() {
                return Err(KernelError::SessionTerminal(session_id.to_string()));
            }
            session.status = SessionStatus::Planning;
        }
        self.journal
            .emit(session_id, JournalEventKind::SessionStarted, serde_json::json!({}))
            .await?;

        let mut accumulated_findings: Vec<String> = Vec::new();
        let mut cumulative_tokens: u64 = 0;

        'planning: loop {
            if self.aborted.remove(&session_id).is_some() {
                return self.finish(session_id, SessionStatus::Aborted, JournalEventKind::SessionAborted)
                    .await;
            }

            let plan = match self.generate_and_accept_plan(session_id).await? {
                Some(plan) => plan,
                None => {
                    return self
                        .finish(session_id, SessionStatus::Failed, JournalEventKind::SessionFailed)
                        .await;
                }
            };

            {
                let mut session = self
                    .sessions
                    .get_mut(&session_id)
                    .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
                session.plan_history.push(plan.clone());
                session.status = SessionStatus::Running;
            }

            let order = plan
                .topological_order()
                .expect("plan.validate() already rejected cyclic plans");

            let mut iteration_tokens: u64 = 0;
            let mut tools_used: Vec<String> = Vec::new();
            let mut replan_requested = false;

            for step_id in order {
                if self.aborted.remove(&session_id).is_some() {
                    return self
                        .finish(session_id, SessionStatus::Aborted, JournalEventKind::SessionAborted)
                        .await;
                }

                let step = plan
                    .step(step_id)
                    .ok_or_else(|| KernelError::UnknownStep(step_id.to_string()))?
                    .clone();

                let result = self.execute_step(session_id, &step).await?;
                let failed = result.status == StepStatus::Failed;
                if let Some(err) = &result.error {
                    accumulated_findings.push(err.message.clone());
                }
                tools_used.push(step.tool_ref.name.clone());
                let tokens = result
                    .output
                    .as_ref()
                    .and_then(|v| v.get("tokens_used"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let cost_usd = result
                    .output
                    .as_ref()
                    .and_then(|v| v.get("cost_usd"))
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                iteration_tokens += tokens;
                cumulative_tokens += tokens;

                {
                    let mut session = self
                        .sessions
                        .get_mut(&session_id)
                        .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
                    session.step_results.push(result);
                    session.usage_summary.steps_executed += 1;
                    session.usage_summary.tokens_used += tokens;
                    session.usage_summary.cost_usd += cost_usd;
                    session.usage_summary.wall_clock_ms =
                        (chrono::Utc::now() - session.created_at).num_milliseconds().max(0) as u64;
                }

                if let Some(reason) = self.check_limits(session_id).await? {
                    self.journal
                        .emit(
                            session_id,
                            JournalEventKind::LimitExceeded,
                            serde_json::json!({ "reason": reason }),
                        )
                        .await?;
                    return self
                        .finish(session_id, SessionStatus::Failed, JournalEventKind::SessionFailed)
                        .await;
                }

                if failed {
                    match step.failure_policy {
                        FailurePolicy::Abort => {
                            return self
                                .finish(session_id, SessionStatus::Failed, JournalEventKind::SessionFailed)
                                .await;
                        }
                        FailurePolicy::Continue => {}
                        FailurePolicy::Replan => {
                            replan_requested = true;
                            break;
                        }
                    }
                }
            }

            // Monitors and checkpointing run once per planning iteration,
            // whether it ran every step or broke early for a replan —
            // replanning is the repeated-failure case these exist to catch.
            let (step_results, goal) = {
                let session = self
                    .sessions
                    .get(&session_id)
                    .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
                (session.step_results.clone(), plan.goal.clone())
            };

            let futility_verdict = {
                let (cumulative_cost_usd, max_cost_usd) = {
                    let session = self
                        .sessions
                        .get(&session_id)
                        .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
                    (session.usage_summary.cost_usd, session.limits.max_cost_usd)
                };
                self.futility.lock().evaluate(
                    session_id,
                    FutilityInput {
                        plan_goal: goal.clone(),
                        step_results,
                        iteration_tokens: Some(iteration_tokens),
                        cumulative_cost_usd: Some(cumulative_cost_usd),
                        max_cost_usd: Some(max_cost_usd),
                    },
                )
            };

            match futility_verdict {
                FutilityVerdict::Halt(reason) => {
                    self.journal
                        .emit(
                            session_id,
                            JournalEventKind::FutilityHalted,
                            serde_json::json!({ "reason": reason }),
                        )
                        .await?;
                    return self
                        .finish(session_id, SessionStatus::Failed, JournalEventKind::SessionFailed)
                        .await;
                }
                FutilityVerdict::Warn(reason) => {
                    self.journal
                        .emit(
                            session_id,
                            JournalEventKind::FutilityWarned,
                            serde_json::json!({ "reason": reason }),
                        )
                        .await?;
                }
                FutilityVerdict::Continue => {}
            }

            let max_tokens = {
                let session = self
                    .sessions
                    .get(&session_id)
                    .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
                session.limits.max_tokens as i64
            };
            let budget_verdict = self.context_budget.lock().evaluate(
                session_id,
                ContextBudgetInput {
                    cumulative_tokens,
                    max_tokens,
                    tokens_this_iteration: iteration_tokens,
                    tools_used,
                    plan_goal: goal.clone(),
                },
            );

            match budget_verdict {
                ContextBudgetVerdict::Continue => {}
                ContextBudgetVerdict::Checkpoint | ContextBudgetVerdict::Summarize => {
                    self.emit_checkpoint(session_id, &goal, &accumulated_findings).await?;
                }
                ContextBudgetVerdict::Delegate => {
                    // Swarm delegation wiring is an embedder concern (the
                    // kernel has no swarm handle of its own); record a
                    // checkpoint so whatever picks the session up next has
                    // something to resume from.
                    info!(%session_id, "context budget requested delegation; checkpointing and continuing locally");
                    self.emit_checkpoint(session_id, &goal, &accumulated_findings).await?;
                }
            }

            if replan_requested {
                continue 'planning;
            }

            return self
                .finish(session_id, SessionStatus::Completed, JournalEventKind::SessionCompleted)
                .await;
        }
    }

    async fn generate_and_accept_plan(&self, session_id: SessionId) -> Result<Option<Plan>, KernelError> {
        let (task, limits, policy) = {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
            (session.task.clone(), session.limits.clone(), session.policy.clone())
        };
        let state_snapshot = {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
            serde_json::json!({
                "step_results": session.step_results,
                "usage_summary": session.usage_summary,
            })
        };
        let constraints = serde_json::json!({ "limits": limits, "policy": policy });

        let plan = match self
            .planner
            .generate_plan(&task, &[], &state_snapshot, &constraints)
            .await
        {
            Ok(plan) => plan,
            Err(reason) => {
                self.journal
                    .emit(
                        session_id,
                        JournalEventKind::PlanRejected,
                        serde_json::json!({ "reason": reason }),
                    )
                    .await?;
                return Ok(None);
            }
        };

        self.journal
            .emit(
                session_id,
                JournalEventKind::PlanGenerated,
                serde_json::json!({ "plan": plan }),
            )
            .await?;

        if let Err(err) = plan.validate() {
            self.journal
                .emit(
                    session_id,
                    JournalEventKind::PlanRejected,
                    serde_json::json!({ "reason": err.to_string() }),
                )
                .await?;
            return Ok(None);
        }

        self.journal
            .emit(session_id, JournalEventKind::PlanAccepted, serde_json::json!({}))
            .await?;

        Ok(Some(plan))
    }

    async fn execute_step(&self, session_id: SessionId, step: &Step) -> Result<StepResult, KernelError> {
        let input = {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
            resolve_input(&session, step)
        };

        self.journal
            .emit(
                session_id,
                JournalEventKind::StepStarted,
                serde_json::json!({ "step_id": step.step_id, "title": step.title }),
            )
            .await?;

        let input = match input {
            Ok(v) => v,
            Err(bad_path) => {
                let result = StepResult {
                    step_id: step.step_id,
                    status: StepStatus::Failed,
                    output: None,
                    error: Some(crate::types::StepError {
                        code: "BAD_INPUT".to_string(),
                        message: format!("input_from path '{bad_path}' did not resolve"),
                    }),
                    started_at: chrono::Utc::now(),
                    finished_at: Some(chrono::Utc::now()),
                    attempts: 0,
                };
                self.journal
                    .emit(
                        session_id,
                        JournalEventKind::StepFailed,
                        serde_json::json!({ "result": result }),
                    )
                    .await?;
                return Ok(result);
            }
        };

        let policy = {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
            session.policy.clone()
        };

        let result = self
            .tool_runtime
            .invoke(Invocation {
                session_id,
                step_id: step.step_id,
                tool_name: step.tool_ref.name.clone(),
                input,
                policy,
            })
            .await;

        let kind = if result.status == StepStatus::Succeeded {
            JournalEventKind::StepSucceeded
        } else {
            JournalEventKind::StepFailed
        };
        self.journal
            .emit(session_id, kind, serde_json::json!({ "result": result }))
            .await?;

        Ok(result)
    }

    async fn check_limits(&self, session_id: SessionId) -> Result<Option<String>, KernelError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
        let usage = &session.usage_summary;
        let limits = &session.limits;
        if usage.steps_executed > limits.max_steps {
            return Ok(Some(format!(
                "max_steps exceeded: {} > {}",
                usage.steps_executed, limits.max_steps
            )));
        }
        if usage.wall_clock_ms > limits.max_duration_ms {
            return Ok(Some(format!(
                "max_duration_ms exceeded: {} > {}",
                usage.wall_clock_ms, limits.max_duration_ms
            )));
        }
        if usage.cost_usd > limits.max_cost_usd {
            return Ok(Some(format!(
                "max_cost_usd exceeded: {} > {}",
                usage.cost_usd, limits.max_cost_usd
            )));
        }
        if usage.tokens_used > limits.max_tokens {
            return Ok(Some(format!(
                "max_tokens exceeded: {} > {}",
                usage.tokens_used, limits.max_tokens
            )));
        }
        Ok(None)
    }

    async fn emit_checkpoint(
        &self,
        session_id: SessionId,
        plan_goal: &str,
        findings: &[String],
    ) -> Result<(), KernelError> {
        let (remaining_step_titles, usage) = {
            let session = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
            let remaining = session
                .current_plan()
                .map(|plan| {
                    plan.steps
                        .iter()
                        .filter(|s| session.result_for(s.step_id).is_none())
                        .map(|s| s.title.clone())
                        .collect()
                })
                .unwrap_or_default();
            (remaining, session.usage_summary.clone())
        };
        let checkpoint = SessionCheckpoint::new(
            session_id,
            findings.to_vec(),
            remaining_step_titles,
            plan_goal.to_string(),
            usage,
            serde_json::json!({}),
        );
        self.journal
            .emit(
                session_id,
                JournalEventKind::SessionCheckpoint,
                serde_json::json!({ "checkpoint": checkpoint }),
            )
            .await?;
        Ok(())
    }

    async fn finish(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        kind: JournalEventKind,
    ) -> Result<SessionStatus, KernelError> {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.status = status;
        }
        self.journal.emit(session_id, kind, serde_json::json!({})).await?;
        Ok(status)
    }

    /// Requests that a running session stop before its next step. Takes
    /// effect the next time the run loop checks for it; the session ends
    /// up `aborted`, not silently dropped.
    pub fn abort(&self, session_id: SessionId) -> Result<(), KernelError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(KernelError::UnknownSession(session_id.to_string()));
        }
        self.aborted.insert(session_id, ());
        Ok(())
    }

    pub fn session(&self, session_id: SessionId) -> Option<Session> {
        self.sessions.get(&session_id).map(|e| e.value().clone())
    }

    /// Sessions with a `session.started` event but no terminal event —
    /// candidates for `recover`.
    pub async fn discover_recoverable(&self) -> Result<Vec<SessionId>, KernelError> {
        let events = self.journal.read_all().await?;
        let mut started = std::collections::HashSet::new();
        let mut terminal = std::collections::HashSet::new();
        for event in events {
            if event.kind == JournalEventKind::SessionStarted {
                started.insert(event.session_id);
            }
            if event.kind.is_terminal() {
                terminal.insert(event.session_id);
            }
        }
        Ok(started.into_iter().filter(|id| !terminal.contains(id)).collect())
    }

    /// Rebuilds a session's in-memory state from its journal history and
    /// re-enters the run loop. Because the Planner is stateless and
    /// external, resumption asks it for a fresh plan seeded with the
    /// recovered `step_results` as `state_snapshot` rather than trying to
    /// resume mid-plan — the same path `replan` already takes.
    pub async fn recover(&self, session_id: SessionId) -> Result<SessionStatus, KernelError> {
        let events = self.journal.read_session(session_id).await?;
        if events.is_empty() {
            return Err(KernelError::UnknownSession(session_id.to_string()));
        }
        if events.iter().any(|e| e.kind.is_terminal()) {
            return Err(KernelError::SessionTerminal(session_id.to_string()));
        }

        let created = events
            .iter()
            .find(|e| e.kind == JournalEventKind::SessionCreated)
            .ok_or_else(|| KernelError::UnknownSession(session_id.to_string()))?;
        let task: Task = serde_json::from_value(created.payload["task"].clone())
            .map_err(|e| KernelError::BadInput(e.to_string()))?;
        let mode: SessionMode = serde_json::from_value(created.payload["mode"].clone())
            .map_err(|e| KernelError::BadInput(e.to_string()))?;
        let limits: SessionLimits = serde_json::from_value(created.payload["limits"].clone())
            .map_err(|e| KernelError::BadInput(e.to_string()))?;
        let policy: SessionPolicy = serde_json::from_value(created.payload["policy"].clone())
            .map_err(|e| KernelError::BadInput(e.to_string()))?;

        let mut session = Session::new(task, mode, limits, policy);
        session.session_id = session_id;

        for event in &events {
            match event.kind {
                JournalEventKind::PlanGenerated => {
                    if let Ok(plan) = serde_json::from_value::<Plan>(event.payload["plan"].clone()) {
                        session.plan_history.push(plan);
                    }
                }
                JournalEventKind::StepSucceeded | JournalEventKind::StepFailed => {
                    if let Ok(result) =
                        serde_json::from_value::<StepResult>(event.payload["result"].clone())
                    {
                        session.usage_summary.steps_executed += 1;
                        session.step_results.push(result);
                    }
                }
                _ => {}
            }
        }
        session.status = SessionStatus::Planning;

        self.futility.lock().reset(session_id);
        self.context_budget.lock().reset(session_id);
        self.sessions.insert(session_id, session);

        warn!(%session_id, "recovered session from journal; resuming with a fresh plan");
        self.run(session_id).await
    }
}

/// Resolves `step.input_from` dotted paths against prior step results,
/// overlaying them onto the step's static `input`. `Err` names the first
/// path that failed to resolve (spec.md §4.5's `BAD_INPUT`).
fn resolve_input(session: &Session, step: &Step) -> Result<serde_json::Value, String> {
    let mut input = step.input.clone();
    if !input.is_object() {
        input = serde_json::json!({});
    }
    for (field, path) in &step.input_from {
        let mut parts = path.splitn(2, '.');
        let source_step = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");

        let source_id = uuid::Uuid::parse_str(source_step)
            .map(StepId)
            .map_err(|_| path.clone())?;
        let source_result = session.result_for(source_id).ok_or_else(|| path.clone())?;
        if source_result.status != StepStatus::Succeeded {
            return Err(path.clone());
        }
        let output = source_result.output.as_ref().ok_or_else(|| path.clone())?;
        let resolved = navigate(output, rest).ok_or_else(|| path.clone())?;
        input
            .as_object_mut()
            .expect("coerced to object above")
            .insert(field.clone(), resolved.clone());
    }
    Ok(input)
}

fn navigate<'a>(value: &'a serde_json::Value, dotted: &str) -> Option<&'a serde_json::Value> {
    if dotted.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for part in dotted.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalConfig;
    use crate::permission::{ApprovalDecision, ApprovalPrompt, PermissionEngine};
    use crate::schema::SchemaValidator;
    use crate::tool_runtime::{MockRunner, ToolRuntime};
    use crate::types::{FailurePolicy, PermissionError, ToolManifest, ToolRef, ToolSupports};

    struct DenyPrompt;

    #[async_trait::async_trait]
    impl ApprovalPrompt for DenyPrompt {
        async fn prompt(
            &self,
            _session_id: SessionId,
            _scopes: &[String],
        ) -> Result<ApprovalDecision, PermissionError> {
            Ok(ApprovalDecision::Deny)
        }
    }

    fn manifest(name: &str) -> ToolManifest {
        ToolManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: "test tool".to_string(),
            runner: crate::types::Runner::Internal,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            permissions: vec![],
            timeout_ms: 5000,
            supports: ToolSupports::default(),
            mock_responses: None,
        }
    }

    fn one_step_plan(tool: &str) -> Plan {
        Plan::new(
            "test goal",
            vec![Step {
                step_id: StepId::new(),
                title: "do it".to_string(),
                tool_ref: ToolRef {
                    name: tool.to_string(),
                    version_range: None,
                },
                input: serde_json::json!({}),
                input_from: HashMap::new(),
                depends_on: vec![],
                success_criteria: vec!["ok".to_string()],
                failure_policy: FailurePolicy::Abort,
                timeout_ms: 1000,
                max_retries: 0,
            }],
        )
    }

    async fn kernel_with_plan(plan: Plan) -> Kernel {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(
            Journal::init(JournalConfig {
                path: dir.path().join("journal.jsonl"),
                fsync: false,
                redact: true,
                redaction_rules: Default::default(),
            })
            .await
            .unwrap(),
        );
        let permission_engine = Arc::new(PermissionEngine::new(Arc::new(DenyPrompt), None));
        let schema = Arc::new(SchemaValidator::new());
        let mut tool_runtime = ToolRuntime::new(permission_engine, schema);
        tool_runtime.register(
            manifest("echo"),
            Arc::new(MockRunner::new(serde_json::json!({"ok": true}))),
        );
        let planner = Arc::new(planner::FixedPlanner::new(plan));
        Kernel::new(
            journal,
            Arc::new(tool_runtime),
            planner,
            FutilityConfig::default(),
            ContextBudgetConfig::default(),
            10,
        )
    }

    #[tokio::test]
    async fn happy_path_session_completes() {
        let kernel = kernel_with_plan(one_step_plan("echo")).await;
        let session_id = kernel
            .create_session("do something", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
            .await
            .unwrap();
        let status = kernel.run(session_id).await.unwrap();
        assert_eq!(status, SessionStatus::Completed);
        let session = kernel.session(session_id).unwrap();
        assert_eq!(session.step_results.len(), 1);
        assert_eq!(session.step_results[0].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_tool_aborts_by_default_policy() {
        let kernel = kernel_with_plan(one_step_plan("does-not-exist")).await;
        let session_id = kernel
            .create_session("do something", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
            .await
            .unwrap();
        let status = kernel.run(session_id).await.unwrap();
        assert_eq!(status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn abort_before_start_marks_session_aborted() {
        let kernel = kernel_with_plan(one_step_plan("echo")).await;
        let session_id = kernel
            .create_session("do something", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
            .await
            .unwrap();
        kernel.abort(session_id).unwrap();
        let status = kernel.run(session_id).await.unwrap();
        assert_eq!(status, SessionStatus::Aborted);
    }

    #[tokio::test]
    async fn concurrency_limit_rejects_new_sessions() {
        let kernel = kernel_with_plan(one_step_plan("echo")).await;
        // Drain the limit by holding sessions in a non-terminal state:
        // create_session alone leaves status == Created (non-terminal).
        for _ in 0..10 {
            kernel
                .create_session("t", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
                .await
                .unwrap();
        }
        let result = kernel
            .create_session("overflow", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
            .await;
        assert!(matches!(result, Err(KernelError::ConcurrencyLimit)));
    }

    #[tokio::test]
    async fn discover_recoverable_excludes_terminal_sessions() {
        let kernel = kernel_with_plan(one_step_plan("echo")).await;
        let done = kernel
            .create_session("t1", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
            .await
            .unwrap();
        kernel.run(done).await.unwrap();

        let recoverable = kernel.discover_recoverable().await.unwrap();
        assert!(!recoverable.contains(&done));
    }

    #[tokio::test]
    async fn recover_rejects_terminal_session() {
        let kernel = kernel_with_plan(one_step_plan("echo")).await;
        let done = kernel
            .create_session("t1", SessionMode::Mock, SessionLimits::default(), SessionPolicy::default())
            .await
            .unwrap();
        kernel.run(done).await.unwrap();

        let result = kernel.recover(done).await;
        assert!(matches!(result, Err(KernelError::SessionTerminal(_))));
    }
}
