//! Shared swarm data-model types (spec.md §3). The behavior that operates
//! on these lives in `crate::swarm`; this module holds the plain records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{NodeId, SessionId, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerCredential {
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub node_id: NodeId,
    pub display_name: String,
    pub api_url: String,
    pub capabilities: Vec<String>,
    pub version: String,
    #[serde(default)]
    pub credentials: Vec<PeerCredential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    New,
    Active,
    Suspected,
    Unreachable,
    Evicted,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub identity: PeerIdentity,
    pub status: PeerStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub last_latency_ms: u64,
    pub joined_at: DateTime<Utc>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub node_id: NodeId,
    pub payload_hash: String,
    pub hmac: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationChain {
    pub hops: Vec<Attestation>,
}

impl AttestationChain {
    pub fn depth(&self) -> usize {
        self.hops.len()
    }
}

/// Task characteristics the Liability Firebreak / Cognitive Friction
/// engines veto on (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskAttributes {
    pub complexity: ComplexityLevel,
    pub reversibility: ComplexityLevel,
    pub criticality: ComplexityLevel,
}

impl Default for TaskAttributes {
    fn default() -> Self {
        Self {
            complexity: ComplexityLevel::Medium,
            reversibility: ComplexityLevel::Medium,
            criticality: ComplexityLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTaskRequest {
    pub task_id: TaskId,
    pub originator_node_id: NodeId,
    pub originator_session_id: SessionId,
    pub task_text: String,
    #[serde(default)]
    pub constraints: serde_json::Value,
    pub correlation_id: String,
    pub nonce: String,
    #[serde(default)]
    pub parent_attestation_chain: AttestationChain,
    pub delegation_depth: u32,
    #[serde(default)]
    pub task_attributes: Option<TaskAttributes>,
}

/// A lightweight gossip entry (spec.md §4.8: "carries only `{node_id,
/// api_url, status}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipEntry {
    pub node_id: NodeId,
    pub api_url: String,
    pub status: PeerStatus,
}

/// The commit-phase sealed bid: a SHA-256 commitment, not the bid itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBid {
    pub rfq_id: String,
    pub bidder_node_id: NodeId,
    pub commitment: String,
    pub committed_at: DateTime<Utc>,
}

/// The reveal-phase bid the commitment hashes over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealedBid {
    pub rfq_id: String,
    pub bidder_node_id: NodeId,
    pub estimated_cost_usd: f64,
    pub estimated_duration_ms: u64,
    pub nonce: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_aborted: u64,
    pub total_duration_ms: u64,
    pub total_tokens_used: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_outcome_at: Option<DateTime<Utc>>,
    #[serde(default = "default_trust_score")]
    pub trust_score: f64,
    /// Completed-task counts per complexity bucket, for the anti-gaming
    /// check and the Shannon-entropy diversity multiplier.
    #[serde(default)]
    pub low_complexity_completed: u64,
    #[serde(default)]
    pub medium_complexity_completed: u64,
    #[serde(default)]
    pub high_complexity_completed: u64,
    #[serde(default)]
    pub high_complexity_rejected: u64,
    #[serde(default)]
    pub high_complexity_offered: u64,
}

fn default_trust_score() -> f64 {
    0.5
}

impl ReputationRecord {
    pub fn new() -> Self {
        Self {
            trust_score: 0.5,
            ..Default::default()
        }
    }
}
