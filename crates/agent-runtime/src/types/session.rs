//! `Session`, `StepResult`, and the limits/policy/usage types attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{SessionId, StepId};
use super::plan::Plan;
use super::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Planning,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    /// Terminal states are sticky (spec.md §3 invariants): once reached,
    /// no further state-mutating events may be emitted for the session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Mock,
    DryRun,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLimits {
    pub max_steps: u64,
    pub max_duration_ms: u64,
    pub max_cost_usd: f64,
    pub max_tokens: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_duration_ms: 10 * 60 * 1000,
            max_cost_usd: 5.0,
            max_tokens: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPolicy {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub require_approval_for_writes: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub steps_executed: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub wall_clock_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Built on the context-budget monitor's `checkpoint` verdict so a session
/// can later resume with a compact summary instead of its full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session_id: SessionId,
    /// Each finding truncated to 500 chars (spec.md §4.5).
    pub findings: Vec<String>,
    pub remaining_step_titles: Vec<String>,
    pub last_plan_goal: String,
    pub usage: UsageSummary,
    #[serde(default)]
    pub artifacts: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

const MAX_FINDING_CHARS: usize = 500;

impl SessionCheckpoint {
    pub fn new(
        session_id: SessionId,
        findings: Vec<String>,
        remaining_step_titles: Vec<String>,
        last_plan_goal: String,
        usage: UsageSummary,
        artifacts: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            findings: findings
                .into_iter()
                .map(|f| f.chars().take(MAX_FINDING_CHARS).collect())
                .collect(),
            remaining_step_titles,
            last_plan_goal,
            usage,
            artifacts,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub task: Task,
    pub status: SessionStatus,
    pub mode: SessionMode,
    pub limits: SessionLimits,
    pub policy: SessionPolicy,
    pub plan_history: Vec<Plan>,
    pub step_results: Vec<StepResult>,
    pub usage_summary: UsageSummary,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(task: Task, mode: SessionMode, limits: SessionLimits, policy: SessionPolicy) -> Self {
        Self {
            session_id: SessionId::new(),
            task,
            status: SessionStatus::Created,
            mode,
            limits,
            policy,
            plan_history: Vec::new(),
            step_results: Vec::new(),
            usage_summary: UsageSummary::default(),
            created_at: Utc::now(),
        }
    }

    pub fn current_plan(&self) -> Option<&Plan> {
        self.plan_history.last()
    }

    pub fn result_for(&self, step_id: StepId) -> Option<&StepResult> {
        self.step_results.iter().rev().find(|r| r.step_id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Created.is_terminal());
    }
}
