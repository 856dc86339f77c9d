//! The Planner interface: external, contract-only (spec.md §3's "Planner
//! Interface" row). The kernel depends on this trait, never a concrete
//! implementation — swapping in an LLM-backed planner is the embedder's
//! job, mirroring how `ApprovalPrompt` and `ToolRunner` are pluggable.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Plan, Task, ToolManifest};

#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate_plan(
        &self,
        task: &Task,
        tool_schemas: &[ToolManifest],
        state_snapshot: &Value,
        constraints: &Value,
    ) -> Result<Plan, String>;
}

/// Always returns the same plan, ignoring its inputs. Used by tests and by
/// `SessionMode::Mock` sessions that supply their own fixed plan.
pub struct FixedPlanner {
    plan: Plan,
}

impl FixedPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn generate_plan(
        &self,
        _task: &Task,
        _tool_schemas: &[ToolManifest],
        _state_snapshot: &Value,
        _constraints: &Value,
    ) -> Result<Plan, String> {
        Ok(self.plan.clone())
    }
}
