//! `JournalEvent` and its closed `type` enum (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, SessionId};

/// The closed set of event types a journal line may carry. Unit variants
/// serialize to their `#[serde(rename)]` string directly (no enum tagging
/// wrapper), so `type` on the wire is exactly e.g. `"step.succeeded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEventKind {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.started")]
    SessionStarted,
    #[serde(rename = "session.completed")]
    SessionCompleted,
    #[serde(rename = "session.failed")]
    SessionFailed,
    #[serde(rename = "session.aborted")]
    SessionAborted,
    #[serde(rename = "session.checkpoint")]
    SessionCheckpoint,

    #[serde(rename = "plan.generated")]
    PlanGenerated,
    #[serde(rename = "plan.accepted")]
    PlanAccepted,
    #[serde(rename = "plan.rejected")]
    PlanRejected,

    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.succeeded")]
    StepSucceeded,
    #[serde(rename = "step.failed")]
    StepFailed,

    #[serde(rename = "permission.requested")]
    PermissionRequested,
    #[serde(rename = "permission.granted")]
    PermissionGranted,
    #[serde(rename = "permission.denied")]
    PermissionDenied,

    #[serde(rename = "limit.exceeded")]
    LimitExceeded,
    #[serde(rename = "policy.violated")]
    PolicyViolated,

    #[serde(rename = "futility.warned")]
    FutilityWarned,
    #[serde(rename = "futility.halted")]
    FutilityHalted,

    #[serde(rename = "plugin.discovered")]
    PluginDiscovered,
    #[serde(rename = "plugin.loading")]
    PluginLoading,
    #[serde(rename = "plugin.loaded")]
    PluginLoaded,
    #[serde(rename = "plugin.failed")]
    PluginFailed,
    #[serde(rename = "plugin.hook_fired")]
    PluginHookFired,
    #[serde(rename = "plugin.hook_circuit_open")]
    PluginHookCircuitOpen,
    #[serde(rename = "plugin.service_started")]
    PluginServiceStarted,
    #[serde(rename = "plugin.service_failed")]
    PluginServiceFailed,
    #[serde(rename = "plugin.service_stopped")]
    PluginServiceStopped,
    #[serde(rename = "plugin.unloaded")]
    PluginUnloaded,
    #[serde(rename = "plugin.reloaded")]
    PluginReloaded,

    #[serde(rename = "swarm.peer_added")]
    SwarmPeerAdded,
    #[serde(rename = "swarm.peer_suspected")]
    SwarmPeerSuspected,
    #[serde(rename = "swarm.peer_unreachable")]
    SwarmPeerUnreachable,
    #[serde(rename = "swarm.peer_evicted")]
    SwarmPeerEvicted,
    #[serde(rename = "swarm.attestation_chain_invalid")]
    SwarmAttestationChainInvalid,
    #[serde(rename = "swarm.task_delegated")]
    SwarmTaskDelegated,
    #[serde(rename = "swarm.task_accepted")]
    SwarmTaskAccepted,
    #[serde(rename = "swarm.task_rejected")]
    SwarmTaskRejected,
    #[serde(rename = "swarm.auction_created")]
    SwarmAuctionCreated,
    #[serde(rename = "swarm.auction_won")]
    SwarmAuctionWon,
}

impl JournalEventKind {
    /// Session lifecycle events after which the session is sticky-terminal
    /// (spec.md §3 invariants): no further events may follow for that
    /// session.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JournalEventKind::SessionCompleted
                | JournalEventKind::SessionFailed
                | JournalEventKind::SessionAborted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEvent {
    pub event_id: EventId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: JournalEventKind,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_self: Option<String>,
}
