//! Futility Monitor: detects an agent looping without progress and signals
//! the kernel to halt before it burns its whole budget (spec.md §4.6).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{SessionId, StepResult, StepStatus};

const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutilityConfig {
    pub max_repeated_errors: u32,
    pub max_stagnant_iterations: u32,
    pub max_identical_plans: u32,
    /// Not given a default in the spec's normative table; 5 keeps it
    /// a notch above `max_repeated_errors` (see DESIGN.md).
    pub max_cost_without_progress: u32,
    pub budget_burn_threshold: f64,
}

impl Default for FutilityConfig {
    fn default() -> Self {
        Self {
            max_repeated_errors: 3,
            max_stagnant_iterations: 3,
            max_identical_plans: 2,
            max_cost_without_progress: 5,
            budget_burn_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FutilityInput {
    pub plan_goal: String,
    pub step_results: Vec<StepResult>,
    pub iteration_tokens: Option<u64>,
    pub cumulative_cost_usd: Option<f64>,
    pub max_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FutilityVerdict {
    Continue,
    Warn(String),
    Halt(String),
}

#[derive(Debug, Clone)]
struct Snapshot {
    plan_goal: String,
    dominant_error: Option<String>,
    successes: u32,
    total_steps: u32,
    cumulative_successes: u32,
    positive_usage: bool,
    cumulative_cost_usd: Option<f64>,
    max_cost_usd: Option<f64>,
}

pub struct FutilityMonitor {
    config: FutilityConfig,
    history: HashMap<SessionId, VecDeque<Snapshot>>,
}

impl FutilityMonitor {
    pub fn new(config: FutilityConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
        }
    }

    pub fn reset(&mut self, session_id: SessionId) {
        self.history.remove(&session_id);
    }

    pub fn evaluate(&mut self, session_id: SessionId, input: FutilityInput) -> FutilityVerdict {
        let successes = input
            .step_results
            .iter()
            .filter(|r| r.status == StepStatus::Succeeded)
            .count() as u32;
        let total_steps = input.step_results.len() as u32;
        let dominant_error = input
            .step_results
            .iter()
            .find(|r| r.status == StepStatus::Failed)
            .and_then(|r| r.error.as_ref())
            .map(|e| normalize_error(&e.message));

        let history = self.history.entry(session_id).or_default();
        let prior_cumulative = history.back().map(|s| s.cumulative_successes).unwrap_or(0);

        let snapshot = Snapshot {
            plan_goal: input.plan_goal,
            dominant_error,
            successes,
            total_steps,
            cumulative_successes: prior_cumulative + successes,
            positive_usage: input.iteration_tokens.unwrap_or(0) > 0,
            cumulative_cost_usd: input.cumulative_cost_usd,
            max_cost_usd: input.max_cost_usd,
        };
        history.push_back(snapshot);
        if history.len() > MAX_HISTORY {
            history.pop_front();
        }

        if let Some(reason) = rule_repeated_errors(history, self.config.max_repeated_errors) {
            return FutilityVerdict::Halt(reason);
        }
        if let Some(reason) = rule_stagnant(history, self.config.max_stagnant_iterations) {
            return FutilityVerdict::Halt(reason);
        }
        if let Some(reason) = rule_identical_plans(history, self.config.max_identical_plans) {
            return FutilityVerdict::Halt(reason);
        }
        if let Some(reason) = rule_cost_without_progress(history, self.config.max_cost_without_progress) {
            return FutilityVerdict::Halt(reason);
        }
        if let Some(reason) = rule_budget_burn(history, self.config.budget_burn_threshold) {
            return FutilityVerdict::Halt(reason);
        }

        if let Some(reason) = near_threshold_warning(history, &self.config) {
            return FutilityVerdict::Warn(reason);
        }
        FutilityVerdict::Continue
    }
}

fn normalize_error(message: &str) -> String {
    let collapsed: String = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = collapsed.to_lowercase();
    lower.chars().take(200).collect()
}

fn rule_repeated_errors(history: &VecDeque<Snapshot>, threshold: u32) -> Option<String> {
    if threshold == 0 {
        return None;
    }
    let n = threshold as usize;
    if history.len() < n {
        return None;
    }
    let tail: Vec<&Snapshot> = history.iter().rev().take(n).collect();
    let first_error = tail[0].dominant_error.clone()?;
    if tail.iter().all(|s| s.dominant_error.as_deref() == Some(first_error.as_str())) {
        Some(format!(
            "same error repeated {n} consecutive iterations: {first_error}"
        ))
    } else {
        None
    }
}

fn rule_stagnant(history: &VecDeque<Snapshot>, max_stagnant_iterations: u32) -> Option<String> {
    let window = max_stagnant_iterations as usize + 1;
    if history.len() < window {
        return None;
    }
    let tail: Vec<&Snapshot> = history.iter().rev().take(window).collect();
    let baseline = tail.last()?.successes;
    if tail.iter().all(|s| s.successes <= baseline) {
        Some(format!(
            "successful-step count non-increasing for {window} iterations (baseline {baseline})"
        ))
    } else {
        None
    }
}

fn rule_identical_plans(history: &VecDeque<Snapshot>, threshold: u32) -> Option<String> {
    if threshold == 0 {
        return None;
    }
    let n = threshold as usize;
    if history.len() < n {
        return None;
    }
    let tail: Vec<&Snapshot> = history.iter().rev().take(n).collect();
    let first_goal = &tail[0].plan_goal;
    if tail.iter().all(|s| &s.plan_goal == first_goal) {
        Some(format!("identical plan goal repeated {n} consecutive iterations"))
    } else {
        None
    }
}

fn rule_cost_without_progress(history: &VecDeque<Snapshot>, threshold: u32) -> Option<String> {
    if threshold == 0 {
        return None;
    }
    let n = threshold as usize;
    if history.len() < n {
        return None;
    }
    let tail: Vec<&Snapshot> = history.iter().rev().take(n).collect();
    let all_positive_usage = tail.iter().all(|s| s.positive_usage);
    let baseline = tail.last()?.cumulative_successes;
    let no_progress = tail.iter().all(|s| s.cumulative_successes <= baseline);
    if all_positive_usage && no_progress {
        Some(format!(
            "{n} consecutive iterations of token usage with no increase in cumulative successes"
        ))
    } else {
        None
    }
}

fn rule_budget_burn(history: &VecDeque<Snapshot>, threshold: f64) -> Option<String> {
    let current = history.back()?;
    let (cost, max_cost) = (current.cumulative_cost_usd?, current.max_cost_usd?);
    if max_cost <= 0.0 {
        return None;
    }
    let burn_ratio = cost / max_cost;
    let success_ratio = if current.total_steps > 0 {
        current.successes as f64 / current.total_steps as f64
    } else {
        0.0
    };
    if burn_ratio >= threshold && success_ratio < 0.5 {
        Some(format!(
            "budget burn ratio {burn_ratio:.2} >= {threshold:.2} with success ratio {success_ratio:.2} < 0.5"
        ))
    } else {
        None
    }
}

/// One iteration short of any halt condition triggers a soft warning —
/// not in the spec's normative rule list, but a reasonable reading of the
/// `warn` verdict's purpose (give the caller a chance to intervene before
/// the halt fires on the following iteration).
fn near_threshold_warning(history: &VecDeque<Snapshot>, config: &FutilityConfig) -> Option<String> {
    if config.max_repeated_errors > 0
        && rule_repeated_errors(history, config.max_repeated_errors.saturating_sub(1)).is_some()
        && history.back().and_then(|s| s.dominant_error.as_ref()).is_some()
    {
        return Some("approaching repeated-error halt threshold".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StepError, StepId};
    use chrono::Utc;

    fn failed_result(message: &str) -> StepResult {
        StepResult {
            step_id: StepId::new(),
            status: StepStatus::Failed,
            output: None,
            error: Some(StepError {
                code: "UNKNOWN".into(),
                message: message.into(),
            }),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            attempts: 1,
        }
    }

    fn succeeded_result() -> StepResult {
        StepResult {
            step_id: StepId::new(),
            status: StepStatus::Succeeded,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            attempts: 1,
        }
    }

    #[test]
    fn halts_on_repeated_identical_errors() {
        let mut monitor = FutilityMonitor::new(FutilityConfig::default());
        let session = SessionId::new();
        let first = monitor.evaluate(
            session,
            FutilityInput {
                plan_goal: "goal-0".into(),
                step_results: vec![failed_result("Connection refused")],
                ..Default::default()
            },
        );
        assert_eq!(first, FutilityVerdict::Continue);
        monitor.evaluate(
            session,
            FutilityInput {
                plan_goal: "goal-1".into(),
                step_results: vec![failed_result("Connection refused")],
                ..Default::default()
            },
        );
        let third = monitor.evaluate(
            session,
            FutilityInput {
                plan_goal: "goal-2".into(),
                step_results: vec![failed_result("connection   refused")],
                ..Default::default()
            },
        );
        assert!(matches!(third, FutilityVerdict::Halt(_)));
    }

    #[test]
    fn halts_on_stagnant_success_count() {
        let mut monitor = FutilityMonitor::new(FutilityConfig::default());
        let session = SessionId::new();
        for _ in 0..4 {
            let verdict = monitor.evaluate(
                session,
                FutilityInput {
                    plan_goal: format!("goal-{}", uuid::Uuid::new_v4()),
                    step_results: vec![succeeded_result()],
                    ..Default::default()
                },
            );
            let _ = verdict;
        }
        let verdict = monitor.evaluate(
            session,
            FutilityInput {
                plan_goal: "goal-final".into(),
                step_results: vec![succeeded_result()],
                ..Default::default()
            },
        );
        assert!(matches!(verdict, FutilityVerdict::Halt(_)));
    }

    #[test]
    fn continues_on_healthy_progress() {
        let mut monitor = FutilityMonitor::new(FutilityConfig::default());
        let session = SessionId::new();
        for i in 0..3 {
            let verdict = monitor.evaluate(
                session,
                FutilityInput {
                    plan_goal: format!("goal-{i}"),
                    step_results: vec![succeeded_result(), succeeded_result()],
                    ..Default::default()
                },
            );
            assert_eq!(verdict, FutilityVerdict::Continue);
        }
    }

    #[test]
    fn halts_on_budget_burn_with_low_success_ratio() {
        let mut monitor = FutilityMonitor::new(FutilityConfig::default());
        let session = SessionId::new();
        let verdict = monitor.evaluate(
            session,
            FutilityInput {
                plan_goal: "goal".into(),
                step_results: vec![failed_result("x"), failed_result("y")],
                cumulative_cost_usd: Some(9.0),
                max_cost_usd: Some(10.0),
                ..Default::default()
            },
        );
        assert!(matches!(verdict, FutilityVerdict::Halt(_)));
    }

    #[test]
    fn sessions_have_independent_history() {
        let mut monitor = FutilityMonitor::new(FutilityConfig::default());
        let a = SessionId::new();
        let b = SessionId::new();
        for _ in 0..3 {
            monitor.evaluate(
                a,
                FutilityInput {
                    plan_goal: "goal".into(),
                    step_results: vec![failed_result("boom")],
                    ..Default::default()
                },
            );
        }
        let verdict_b = monitor.evaluate(
            b,
            FutilityInput {
                plan_goal: "goal".into(),
                step_results: vec![succeeded_result()],
                ..Default::default()
            },
        );
        assert_eq!(verdict_b, FutilityVerdict::Continue);
    }
}
