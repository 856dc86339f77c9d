//! `Plan` and `Step`: the structured output of the (external) planner.
//!
//! Plans are immutable once produced; replanning always creates a new
//! `Plan` with a new `plan_id` (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::ids::{PlanId, StepId};

pub const PLAN_SCHEMA_VERSION: &str = "0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Abort,
    Replan,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,
    pub title: String,
    pub tool_ref: ToolRef,
    pub input: serde_json::Value,
    /// Maps `step.field` -> a dotted output path on a prior step's result.
    #[serde(default)]
    pub input_from: HashMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    pub success_criteria: Vec<String>,
    pub failure_policy: FailurePolicy,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StepValidationError {
    #[error("step '{0}' has no success_criteria")]
    NoSuccessCriteria(String),
    #[error("step '{0}' timeout_ms must be >= 100, got {1}")]
    TimeoutTooSmall(String, u64),
    #[error("step '{0}' max_retries must be in [0, 10], got {1}")]
    MaxRetriesOutOfRange(String, u32),
}

impl Step {
    pub fn validate(&self) -> Result<(), StepValidationError> {
        if self.success_criteria.is_empty() {
            return Err(StepValidationError::NoSuccessCriteria(
                self.step_id.to_string(),
            ));
        }
        if self.timeout_ms < 100 {
            return Err(StepValidationError::TimeoutTooSmall(
                self.step_id.to_string(),
                self.timeout_ms,
            ));
        }
        if self.max_retries > 10 {
            return Err(StepValidationError::MaxRetriesOutOfRange(
                self.step_id.to_string(),
                self.max_retries,
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub goal: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

fn default_schema_version() -> String {
    PLAN_SCHEMA_VERSION.to_string()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("plan must have at least one step")]
    NoSteps,
    #[error(transparent)]
    Step(#[from] StepValidationError),
    #[error("step depends_on references unknown step id")]
    DanglingDependency,
    #[error("plan has a dependency cycle")]
    CyclicDependency,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            plan_id: PlanId::new(),
            schema_version: PLAN_SCHEMA_VERSION.to_string(),
            goal: goal.into(),
            assumptions: Vec::new(),
            steps,
            artifacts: None,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::NoSteps);
        }
        for step in &self.steps {
            step.validate()?;
        }
        let ids: HashSet<StepId> = self.steps.iter().map(|s| s.step_id).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep) {
                    return Err(PlanValidationError::DanglingDependency);
                }
            }
        }
        self.topological_order()
            .map(|_| ())
            .ok_or(PlanValidationError::CyclicDependency)
    }

    /// Kahn's algorithm over `depends_on`. Returns `None` on a cycle.
    ///
    /// A `petgraph` dependency (used by the enriching example repo for a
    /// much richer code-dependency graph) isn't warranted for a DAG of at
    /// most a few dozen steps; a direct Kahn's-algorithm pass is simpler
    /// and has no extra dependency.
    pub fn topological_order(&self) -> Option<Vec<StepId>> {
        let mut indegree: HashMap<StepId, usize> =
            self.steps.iter().map(|s| (s.step_id, 0)).collect();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                *indegree.get_mut(&step.step_id).unwrap() += 1;
                dependents.entry(*dep).or_default().push(step.step_id);
            }
        }

        let mut queue: Vec<StepId> = self
            .steps
            .iter()
            .map(|s| s.step_id)
            .filter(|id| indegree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(id) = queue.pop() {
            order.push(id);
            if let Some(children) = dependents.get(&id) {
                for child in children {
                    let entry = indegree.get_mut(child).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push(*child);
                    }
                }
            }
        }

        if order.len() == self.steps.len() {
            Some(order)
        } else {
            None
        }
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == id)
    }
}
