//! Context-Budget Monitor: tracks token burn rate per session and signals
//! when the kernel should summarize, checkpoint, or delegate (spec.md §4.6).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::SessionId;

const ROLLING_WINDOW: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBudgetConfig {
    pub summarize_threshold: f64,
    pub checkpoint_threshold: f64,
    pub delegate_threshold: f64,
    pub min_iterations_before_action: u32,
    pub high_burn_tools: Vec<String>,
}

impl Default for ContextBudgetConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: 0.90,
            checkpoint_threshold: 0.85,
            delegate_threshold: 0.70,
            min_iterations_before_action: 2,
            high_burn_tools: vec!["browser".to_string(), "http-request".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBudgetInput {
    pub cumulative_tokens: u64,
    pub max_tokens: i64,
    pub tokens_this_iteration: u64,
    pub tools_used: Vec<String>,
    pub plan_goal: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextBudgetVerdict {
    Continue,
    Delegate,
    Checkpoint,
    Summarize,
}

struct SessionState {
    iterations: u32,
    velocity_window: VecDeque<u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            iterations: 0,
            velocity_window: VecDeque::new(),
        }
    }
}

pub struct ContextBudgetMonitor {
    config: ContextBudgetConfig,
    sessions: HashMap<SessionId, SessionState>,
}

impl ContextBudgetMonitor {
    pub fn new(config: ContextBudgetConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn reset(&mut self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }

    pub fn evaluate(&mut self, session_id: SessionId, input: ContextBudgetInput) -> ContextBudgetVerdict {
        if input.max_tokens <= 0 {
            return ContextBudgetVerdict::Continue;
        }
        let max_tokens = input.max_tokens as f64;

        let state = self.sessions.entry(session_id).or_default();
        state.iterations += 1;
        state.velocity_window.push_back(input.tokens_this_iteration);
        if state.velocity_window.len() > ROLLING_WINDOW {
            state.velocity_window.pop_front();
        }

        if state.iterations < self.config.min_iterations_before_action {
            return ContextBudgetVerdict::Continue;
        }

        let burn_ratio = input.cumulative_tokens as f64 / max_tokens;
        let velocity = state.velocity_window.iter().sum::<u64>() as f64 / state.velocity_window.len() as f64;

        if burn_ratio >= self.config.summarize_threshold {
            return ContextBudgetVerdict::Summarize;
        }
        if burn_ratio >= self.config.checkpoint_threshold {
            return ContextBudgetVerdict::Checkpoint;
        }

        let used_high_burn_tool = input
            .tools_used
            .iter()
            .any(|t| self.config.high_burn_tools.iter().any(|h| h == t));
        if burn_ratio >= self.config.delegate_threshold && used_high_burn_tool {
            return ContextBudgetVerdict::Delegate;
        }

        // Early delegate: project two iterations of current velocity forward
        // at 2.5x and see if that alone would clear the checkpoint line.
        let projected = (input.cumulative_tokens as f64 + velocity * 2.5 * 2.0) / max_tokens;
        if projected >= self.config.checkpoint_threshold {
            return ContextBudgetVerdict::Delegate;
        }

        ContextBudgetVerdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(cumulative: u64, this_iter: u64, tools: &[&str]) -> ContextBudgetInput {
        ContextBudgetInput {
            cumulative_tokens: cumulative,
            max_tokens: 1000,
            tokens_this_iteration: this_iter,
            tools_used: tools.iter().map(|s| s.to_string()).collect(),
            plan_goal: "goal".into(),
        }
    }

    #[test]
    fn disabled_when_max_tokens_not_positive() {
        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let session = SessionId::new();
        let verdict = monitor.evaluate(
            session,
            ContextBudgetInput {
                max_tokens: 0,
                ..input(999, 10, &[])
            },
        );
        assert_eq!(verdict, ContextBudgetVerdict::Continue);
    }

    #[test]
    fn no_verdict_before_minimum_iterations() {
        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let session = SessionId::new();
        let verdict = monitor.evaluate(session, input(950, 50, &[]));
        assert_eq!(verdict, ContextBudgetVerdict::Continue);
    }

    #[test]
    fn summarize_outranks_checkpoint_and_delegate() {
        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let session = SessionId::new();
        monitor.evaluate(session, input(100, 100, &[]));
        let verdict = monitor.evaluate(session, input(920, 20, &["browser"]));
        assert_eq!(verdict, ContextBudgetVerdict::Summarize);
    }

    #[test]
    fn checkpoint_fires_between_checkpoint_and_summarize() {
        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let session = SessionId::new();
        monitor.evaluate(session, input(100, 100, &[]));
        let verdict = monitor.evaluate(session, input(870, 20, &[]));
        assert_eq!(verdict, ContextBudgetVerdict::Checkpoint);
    }

    #[test]
    fn delegate_requires_a_high_burn_tool_this_iteration() {
        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let session = SessionId::new();
        monitor.evaluate(session, input(100, 0, &[]));
        let without_tool = monitor.evaluate(session, input(750, 0, &["local-fs"]));
        assert_eq!(without_tool, ContextBudgetVerdict::Continue);

        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let session = SessionId::new();
        monitor.evaluate(session, input(100, 0, &[]));
        let with_tool = monitor.evaluate(session, input(750, 0, &["http-request"]));
        assert_eq!(with_tool, ContextBudgetVerdict::Delegate);
    }

    #[test]
    fn independent_sessions_track_separate_velocity() {
        let mut monitor = ContextBudgetMonitor::new(ContextBudgetConfig::default());
        let a = SessionId::new();
        let b = SessionId::new();
        monitor.evaluate(a, input(900, 900, &[]));
        let verdict_b = monitor.evaluate(b, input(10, 10, &[]));
        assert_eq!(verdict_b, ContextBudgetVerdict::Continue);
    }
}
