//! Liability Firebreak / Cognitive Friction veto point (spec.md §4.8): a
//! pluggable gate a received delegation must clear before it is accepted,
//! mirroring how `ApprovalPrompt`/`Planner` are external, contract-only
//! traits elsewhere in the crate.

use async_trait::async_trait;

use crate::types::TaskAttributes;

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyVerdict {
    Allow,
    Veto { reason: String },
}

#[async_trait]
pub trait DelegationPolicy: Send + Sync {
    async fn evaluate(&self, attributes: &TaskAttributes, delegation_depth: u32) -> PolicyVerdict;
}

/// Allows everything. The default when no Liability Firebreak / Cognitive
/// Friction implementation is configured.
pub struct NoOpPolicy;

#[async_trait]
impl DelegationPolicy for NoOpPolicy {
    async fn evaluate(&self, _attributes: &TaskAttributes, _delegation_depth: u32) -> PolicyVerdict {
        PolicyVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_policy_always_allows() {
        let policy = NoOpPolicy;
        let verdict = policy.evaluate(&TaskAttributes::default(), 3).await;
        assert_eq!(verdict, PolicyVerdict::Allow);
    }
}
