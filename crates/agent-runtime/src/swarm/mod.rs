//! Swarm Mesh (spec.md §4.8): peer discovery and health, gossip, task
//! delegation with attestation chains, commit-reveal auctions, and
//! reputation across a flat mesh of runtime nodes.
//!
//! `SwarmTransport` is the external RPC contract (heartbeat, task send,
//! gossip exchange) — this crate never opens a socket itself, mirroring
//! how `ApprovalPrompt`/`Planner`/`ToolRunner` are pluggable elsewhere.

pub mod attestation;
pub mod auction;
pub mod diagnosis;
pub mod policy;
pub mod reputation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::journal::{Journal, JournalEventKind};
use crate::types::{
    AttestationChain, GossipEntry, NodeId, PeerEntry, PeerIdentity, PeerStatus, SessionId,
    SwarmError, SwarmTaskRequest, TaskAttributes, TaskId,
};

pub use auction::AuctionHouse;
pub use policy::{DelegationPolicy, NoOpPolicy, PolicyVerdict};
pub use reputation::ReputationBook;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerTableConfig {
    pub max_peers: usize,
    pub suspected_after_ms: u64,
    pub unreachable_after_ms: u64,
    pub evict_after_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub nonce_window_ms: u64,
    pub max_delegation_depth: u32,
    pub bid_rate_limit_per_minute: u32,
    pub front_running_window_ms: u64,
}

impl Default for PeerTableConfig {
    fn default() -> Self {
        Self {
            max_peers: 64,
            suspected_after_ms: 15_000,
            unreachable_after_ms: 60_000,
            evict_after_ms: 300_000,
            heartbeat_interval_ms: 5_000,
            sweep_interval_ms: 5_000,
            nonce_window_ms: 120_000,
            max_delegation_depth: 4,
            bid_rate_limit_per_minute: 10,
            front_running_window_ms: 500,
        }
    }
}

/// Outcome of a heartbeat sweep pass, for callers that want to act on
/// newly-degraded peers (e.g. trigger re-delegation of their tasks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub node_id: NodeId,
    pub from: PeerStatus,
    pub to: PeerStatus,
}

/// The peer table: bounded membership with the health-state machine from
/// spec.md §4.8. Guarded by a single critical section (spec.md §5), which
/// here is the `std::sync::Mutex` wrapping the map — sweeps and mutations
/// are short, synchronous, and never hold the lock across an `await`.
pub struct PeerTable {
    config: PeerTableConfig,
    peers: std::sync::Mutex<std::collections::HashMap<NodeId, PeerEntry>>,
}

impl PeerTable {
    pub fn new(config: PeerTableConfig) -> Self {
        Self {
            config,
            peers: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn get(&self, node_id: NodeId) -> Option<PeerEntry> {
        self.peers.lock().unwrap().get(&node_id).cloned()
    }

    pub fn active_peers(&self) -> Vec<PeerEntry> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == PeerStatus::Active)
            .cloned()
            .collect()
    }

    /// Adds a peer as `new`, evicting the stalest already-evicted-or-left
    /// member first if the table is at capacity.
    pub fn add(&self, identity: PeerIdentity) {
        let now = Utc::now();
        let mut peers = self.peers.lock().unwrap();
        if peers.len() >= self.config.max_peers && !peers.contains_key(&identity.node_id) {
            let stalest = peers
                .iter()
                .filter(|(_, p)| matches!(p.status, PeerStatus::Evicted | PeerStatus::Left))
                .min_by_key(|(_, p)| p.last_heartbeat_at)
                .map(|(id, _)| *id);
            if let Some(id) = stalest {
                peers.remove(&id);
            }
        }
        peers
            .entry(identity.node_id)
            .and_modify(|existing| existing.identity = identity.clone())
            .or_insert(PeerEntry {
                identity,
                status: PeerStatus::New,
                last_heartbeat_at: now,
                last_latency_ms: 0,
                joined_at: now,
                consecutive_failures: 0,
            });
    }

    pub fn mark_left(&self, node_id: NodeId) {
        if let Some(peer) = self.peers.lock().unwrap().get_mut(&node_id) {
            peer.status = PeerStatus::Left;
        }
    }

    /// Records a successful heartbeat: the peer returns to `active` from
    /// any prior state and its failure streak resets.
    pub fn record_heartbeat(&self, node_id: NodeId, latency_ms: u64) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.get_mut(&node_id) {
            peer.status = PeerStatus::Active;
            peer.last_heartbeat_at = Utc::now();
            peer.last_latency_ms = latency_ms;
            peer.consecutive_failures = 0;
        }
    }

    pub fn record_heartbeat_failure(&self, node_id: NodeId) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.get_mut(&node_id) {
            peer.consecutive_failures += 1;
        }
    }

    /// Runs the status-transition rules (spec.md §4.8's diagram) over
    /// every peer whose heartbeat has gone stale, returning the
    /// transitions so the caller can re-delegate work off degraded peers.
    pub fn sweep(&self) -> Vec<StatusTransition> {
        let now = Utc::now();
        let mut transitions = Vec::new();
        let mut peers = self.peers.lock().unwrap();
        for peer in peers.values_mut() {
            if matches!(peer.status, PeerStatus::Evicted | PeerStatus::Left) {
                continue;
            }
            let since_ms = (now - peer.last_heartbeat_at).num_milliseconds().max(0) as u64;
            let next = if since_ms >= self.config.evict_after_ms
                && peer.status == PeerStatus::Unreachable
            {
                Some(PeerStatus::Evicted)
            } else if since_ms >= self.config.unreachable_after_ms
                && peer.status == PeerStatus::Suspected
            {
                Some(PeerStatus::Unreachable)
            } else if since_ms >= self.config.suspected_after_ms && peer.status == PeerStatus::Active
            {
                Some(PeerStatus::Suspected)
            } else if peer.status == PeerStatus::New {
                Some(PeerStatus::Active)
            } else {
                None
            };
            if let Some(to) = next {
                transitions.push(StatusTransition {
                    node_id: peer.identity.node_id,
                    from: peer.status,
                    to,
                });
                peer.status = to;
            }
        }
        transitions
    }

    /// Merges a gossip round's entries: known peers get their status
    /// refreshed, unknown ones are queued for a lazy `join`
    /// (the caller is responsible for actually fetching full identity).
    pub fn merge_gossip(&self, entries: &[GossipEntry]) -> Vec<NodeId> {
        let mut peers = self.peers.lock().unwrap();
        let mut unknown = Vec::new();
        for entry in entries {
            match peers.get_mut(&entry.node_id) {
                Some(existing) => {
                    if !matches!(existing.status, PeerStatus::Evicted | PeerStatus::Left) {
                        existing.status = entry.status;
                    }
                }
                None => unknown.push(entry.node_id),
            }
        }
        unknown
    }
}

/// Guards against replayed task requests (spec.md §4.8): a nonce is
/// remembered for `nonce_window_ms`, after which it ages out.
pub struct NonceGuard {
    window_ms: u64,
    seen: std::sync::Mutex<std::collections::HashMap<String, chrono::DateTime<Utc>>>,
}

impl NonceGuard {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            seen: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Returns `true` if this nonce is fresh (and remembers it); `false`
    /// if it has been seen within the replay window.
    pub fn check_and_record(&self, nonce: &str) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, at| (now - *at).num_milliseconds() < self.window_ms as i64);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now);
        true
    }
}

/// The RPC contract a transport implementation fulfils on the mesh's
/// behalf. Every call is a suspension point (spec.md §5).
#[async_trait]
pub trait SwarmTransport: Send + Sync {
    async fn heartbeat(&self, peer: &PeerIdentity) -> Result<Duration, String>;
    async fn send_task(&self, peer: &PeerIdentity, request: &SwarmTaskRequest) -> Result<serde_json::Value, String>;
    async fn gossip(&self, peer: &PeerIdentity, entries: &[GossipEntry]) -> Result<Vec<GossipEntry>, String>;
}

const MAX_RPC_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;

async fn retry_rpc<T, F, Fut>(mut call: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, String>>,
{
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut last_err = String::new();
    for attempt in 1..=MAX_RPC_ATTEMPTS {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = err;
                if attempt < MAX_RPC_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
    Err(last_err)
}

/// Constraints attenuated on forward (spec.md §4.8): the intersection of
/// tool allow-lists and the minimum of SLO budgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationConstraints {
    #[serde(default)]
    pub tool_allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
}

impl DelegationConstraints {
    pub fn attenuate(&self, boundary: &DelegationConstraints) -> Self {
        let tool_allowlist = match (&self.tool_allowlist, &boundary.tool_allowlist) {
            (Some(a), Some(b)) => Some(a.iter().filter(|t| b.contains(t)).cloned().collect()),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        Self {
            tool_allowlist,
            max_tokens: min_opt(self.max_tokens, boundary.max_tokens),
            max_cost_usd: min_opt_f64(self.max_cost_usd, boundary.max_cost_usd),
            max_duration_ms: min_opt(self.max_duration_ms, boundary.max_duration_ms),
        }
    }

    /// The missing-capability reason a delegatee rejects with when it
    /// lacks a tool named in the attenuated allow-list.
    pub fn missing_capability(&self, available_tools: &[String]) -> Option<String> {
        let allowlist = self.tool_allowlist.as_ref()?;
        allowlist
            .iter()
            .find(|t| !available_tools.contains(t))
            .map(|t| format!("missing required capability: {t}"))
    }
}

fn min_opt<T: Ord + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn min_opt_f64(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// The top-level swarm orchestrator: peer table, nonce guard, reputation
/// book, auction house, and the delegation policy veto point, tied
/// together behind `delegate_task`/`receive_task`.
pub struct SwarmMesh {
    node_id: NodeId,
    swarm_token: String,
    config: PeerTableConfig,
    peer_table: PeerTable,
    nonce_guard: NonceGuard,
    reputation: ReputationBook,
    auctions: AuctionHouse,
    policy: std::sync::Arc<dyn DelegationPolicy>,
    transport: std::sync::Arc<dyn SwarmTransport>,
    journal: std::sync::Arc<Journal>,
    system_session: SessionId,
    correlation_counter: AtomicU64,
}

impl SwarmMesh {
    pub fn new(
        node_id: NodeId,
        swarm_token: String,
        config: PeerTableConfig,
        policy: std::sync::Arc<dyn DelegationPolicy>,
        transport: std::sync::Arc<dyn SwarmTransport>,
        journal: std::sync::Arc<Journal>,
    ) -> Self {
        let nonce_guard = NonceGuard::new(config.nonce_window_ms);
        let peer_table = PeerTable::new(config.clone());
        Self {
            node_id,
            swarm_token,
            config,
            peer_table,
            nonce_guard,
            reputation: ReputationBook::new(),
            auctions: AuctionHouse::new(),
            policy,
            transport,
            journal,
            system_session: SessionId::new(),
            correlation_counter: AtomicU64::new(0),
        }
    }

    pub fn peer_table(&self) -> &PeerTable {
        &self.peer_table
    }

    pub fn reputation(&self) -> &ReputationBook {
        &self.reputation
    }

    pub fn auctions(&self) -> &AuctionHouse {
        &self.auctions
    }

    pub fn join(&self, identity: PeerIdentity) {
        self.peer_table.add(identity.clone());
        self.emit_best_effort(JournalEventKind::SwarmPeerAdded, serde_json::json!({ "node_id": identity.node_id }));
    }

    fn next_correlation_id(&self) -> String {
        let n = self.correlation_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.node_id)
    }

    fn emit_best_effort(&self, kind: JournalEventKind, payload: serde_json::Value) {
        let journal = self.journal.clone();
        let session = self.system_session;
        tokio::spawn(async move {
            if let Err(err) = journal.emit(session, kind, payload).await {
                warn!(error = %err, "swarm journal emission failed, ignoring");
            }
        });
    }

    /// Runs one heartbeat pass over every active peer and one
    /// status-transition sweep, journaling degraded transitions.
    pub async fn heartbeat_and_sweep(&self) -> Vec<StatusTransition> {
        for peer in self.peer_table.active_peers() {
            let identity = peer.identity.clone();
            let result = retry_rpc(|| {
                let transport = self.transport.clone();
                let identity = identity.clone();
                async move { transport.heartbeat(&identity).await }
            })
            .await;
            match result {
                Ok(latency) => self.peer_table.record_heartbeat(identity.node_id, latency.as_millis() as u64),
                Err(_) => self.peer_table.record_heartbeat_failure(identity.node_id),
            }
        }

        let transitions = self.peer_table.sweep();
        for t in &transitions {
            let kind = match t.to {
                PeerStatus::Suspected => Some(JournalEventKind::SwarmPeerSuspected),
                PeerStatus::Unreachable => Some(JournalEventKind::SwarmPeerUnreachable),
                PeerStatus::Evicted => Some(JournalEventKind::SwarmPeerEvicted),
                _ => None,
            };
            if let Some(kind) = kind {
                self.emit_best_effort(kind, serde_json::json!({ "node_id": t.node_id, "from": t.from, "to": t.to }));
            }
        }
        transitions
    }

    /// One gossip round: the mesh drops gossip rounds when `peer_count <
    /// 3` (spec.md §5's backpressure clause).
    pub async fn gossip_round(&self) -> Result<(), String> {
        let active = self.peer_table.active_peers();
        if active.len() < 3 {
            return Ok(());
        }
        let partner = &active[rand::random::<usize>() % active.len()];
        let local_entries: Vec<GossipEntry> = self
            .peer_table
            .active_peers()
            .into_iter()
            .map(|p| GossipEntry { node_id: p.identity.node_id, api_url: p.identity.api_url, status: p.status })
            .collect();
        let remote_entries = retry_rpc(|| {
            let transport = self.transport.clone();
            let peer = partner.identity.clone();
            let entries = local_entries.clone();
            async move { transport.gossip(&peer, &entries).await }
        })
        .await?;
        self.peer_table.merge_gossip(&remote_entries);
        Ok(())
    }

    /// Builds, signs, and sends a delegated task (spec.md §4.8's
    /// `delegateTask`), attenuating constraints against the peer's
    /// boundary allow-list before forwarding.
    pub async fn delegate_task(
        &self,
        peer: NodeId,
        task_text: String,
        originator_session_id: SessionId,
        constraints: DelegationConstraints,
        boundary: &DelegationConstraints,
        parent_chain: AttestationChain,
        delegation_depth: u32,
        task_attributes: Option<TaskAttributes>,
    ) -> Result<serde_json::Value, SwarmError> {
        let target = self
            .peer_table
            .get(peer)
            .ok_or_else(|| SwarmError::UnknownPeer(peer.to_string()))?;
        if target.status == PeerStatus::Evicted {
            return Err(SwarmError::PeerEvicted(peer.to_string()));
        }
        if delegation_depth >= self.config.max_delegation_depth {
            return Err(SwarmError::DelegationDepthExceeded(delegation_depth, self.config.max_delegation_depth));
        }

        let attenuated = constraints.attenuate(boundary);
        let mut request = SwarmTaskRequest {
            task_id: TaskId::new(),
            originator_node_id: self.node_id,
            originator_session_id,
            task_text,
            constraints: serde_json::to_value(&attenuated).unwrap_or(serde_json::Value::Null),
            correlation_id: self.next_correlation_id(),
            nonce: uuid::Uuid::new_v4().to_string(),
            parent_attestation_chain: parent_chain,
            delegation_depth,
            task_attributes,
        };
        attestation::sign_hop(&self.swarm_token, self.node_id, &mut request);

        let response = retry_rpc(|| {
            let transport = self.transport.clone();
            let identity = target.identity.clone();
            let request = request.clone();
            async move { transport.send_task(&identity, &request).await }
        })
        .await
        .map_err(|_| SwarmError::UnknownPeer(peer.to_string()))?;

        self.emit_best_effort(
            JournalEventKind::SwarmTaskDelegated,
            serde_json::json!({ "task_id": request.task_id, "peer": peer, "depth": delegation_depth }),
        );
        Ok(response)
    }

    /// Receives a delegated task (the other end of `delegate_task`):
    /// replay check, depth check, chain verification, then the
    /// Liability Firebreak / Cognitive Friction veto point.
    pub async fn receive_task(&self, request: &SwarmTaskRequest, available_tools: &[String]) -> Result<(), SwarmError> {
        if !self.nonce_guard.check_and_record(&request.nonce) {
            return Err(SwarmError::ReplayDetected(request.nonce.clone()));
        }
        if request.delegation_depth >= self.config.max_delegation_depth {
            self.emit_best_effort(
                JournalEventKind::SwarmTaskRejected,
                serde_json::json!({ "task_id": request.task_id, "reason": "delegation_depth_exceeded" }),
            );
            return Err(SwarmError::DelegationDepthExceeded(request.delegation_depth, self.config.max_delegation_depth));
        }
        if !attestation::verify_chain(&self.swarm_token, request) {
            self.emit_best_effort(
                JournalEventKind::SwarmAttestationChainInvalid,
                serde_json::json!({ "task_id": request.task_id }),
            );
            return Err(SwarmError::AttestationInvalid(request.task_id.to_string()));
        }

        if let Ok(constraints) = serde_json::from_value::<DelegationConstraints>(request.constraints.clone()) {
            if let Some(reason) = constraints.missing_capability(available_tools) {
                self.emit_best_effort(
                    JournalEventKind::SwarmTaskRejected,
                    serde_json::json!({ "task_id": request.task_id, "reason": reason }),
                );
                return Err(SwarmError::VetoedByPolicy(reason));
            }
        }

        let attributes = request.task_attributes.unwrap_or_default();
        let verdict = self.policy.evaluate(&attributes, request.delegation_depth).await;
        match verdict {
            PolicyVerdict::Allow => {
                self.emit_best_effort(JournalEventKind::SwarmTaskAccepted, serde_json::json!({ "task_id": request.task_id }));
                Ok(())
            }
            PolicyVerdict::Veto { reason } => {
                self.emit_best_effort(
                    JournalEventKind::SwarmTaskRejected,
                    serde_json::json!({ "task_id": request.task_id, "reason": reason }),
                );
                Err(SwarmError::VetoedByPolicy(reason))
            }
        }
    }

    /// Consensus verification (spec.md §4.8): send the same task to N
    /// peers, accept if at least `quorum` agree on a canonical result
    /// hash. Dissenters are returned for the caller to feed the anomaly
    /// pipeline.
    pub async fn verify_by_consensus(
        &self,
        peers: &[NodeId],
        request: &SwarmTaskRequest,
        quorum: usize,
    ) -> Result<(String, Vec<NodeId>), SwarmError> {
        use std::collections::HashMap;

        let mut tallies: HashMap<String, Vec<NodeId>> = HashMap::new();
        for peer in peers {
            let Some(entry) = self.peer_table.get(*peer) else { continue };
            let result = retry_rpc(|| {
                let transport = self.transport.clone();
                let identity = entry.identity.clone();
                let request = request.clone();
                async move { transport.send_task(&identity, &request).await }
            })
            .await;
            if let Ok(value) = result {
                let hash = attestation::canonical_hash(&value);
                tallies.entry(hash).or_default().push(*peer);
            }
        }

        let winner = tallies.iter().max_by_key(|(_, ids)| ids.len());
        match winner {
            Some((hash, agreeing)) if agreeing.len() >= quorum => {
                let dissenters = peers.iter().filter(|p| !agreeing.contains(p)).copied().collect();
                Ok((hash.clone(), dissenters))
            }
            _ => Err(SwarmError::QuorumNotReached(
                winner.map(|(_, ids)| ids.len()).unwrap_or(0),
                quorum,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalConfig;
    use std::sync::Arc;

    fn identity(node_id: NodeId) -> PeerIdentity {
        PeerIdentity {
            node_id,
            display_name: "peer".to_string(),
            api_url: "http://127.0.0.1:9".to_string(),
            capabilities: vec![],
            version: "0.1.0".to_string(),
            credentials: vec![],
        }
    }

    #[test]
    fn new_peer_becomes_active_on_first_sweep() {
        let table = PeerTable::new(PeerTableConfig::default());
        let node = NodeId::new();
        table.add(identity(node));
        let transitions = table.sweep();
        assert_eq!(transitions, vec![StatusTransition { node_id: node, from: PeerStatus::New, to: PeerStatus::Active }]);
    }

    #[test]
    fn stale_active_peer_degrades_through_the_lifecycle() {
        let mut config = PeerTableConfig::default();
        config.suspected_after_ms = 0;
        config.unreachable_after_ms = 0;
        config.evict_after_ms = 0;
        let table = PeerTable::new(config);
        let node = NodeId::new();
        table.add(identity(node));
        table.sweep(); // new -> active
        assert_eq!(table.sweep()[0].to, PeerStatus::Suspected);
        assert_eq!(table.sweep()[0].to, PeerStatus::Unreachable);
        assert_eq!(table.sweep()[0].to, PeerStatus::Evicted);
        assert!(table.sweep().is_empty());
    }

    #[test]
    fn heartbeat_ok_restores_active_from_any_state() {
        let table = PeerTable::new(PeerTableConfig::default());
        let node = NodeId::new();
        table.add(identity(node));
        table.record_heartbeat(node, 12);
        assert_eq!(table.get(node).unwrap().status, PeerStatus::Active);
    }

    #[test]
    fn nonce_guard_rejects_replays_within_window() {
        let guard = NonceGuard::new(60_000);
        assert!(guard.check_and_record("abc"));
        assert!(!guard.check_and_record("abc"));
    }

    #[test]
    fn constraint_attenuation_takes_intersection_and_minimum() {
        let parent = DelegationConstraints {
            tool_allowlist: Some(vec!["a".into(), "b".into()]),
            max_tokens: Some(1000),
            max_cost_usd: Some(5.0),
            max_duration_ms: Some(60_000),
        };
        let boundary = DelegationConstraints {
            tool_allowlist: Some(vec!["b".into(), "c".into()]),
            max_tokens: Some(500),
            max_cost_usd: Some(10.0),
            max_duration_ms: Some(30_000),
        };
        let attenuated = parent.attenuate(&boundary);
        assert_eq!(attenuated.tool_allowlist, Some(vec!["b".to_string()]));
        assert_eq!(attenuated.max_tokens, Some(500));
        assert_eq!(attenuated.max_cost_usd, Some(5.0));
        assert_eq!(attenuated.max_duration_ms, Some(30_000));
    }

    #[test]
    fn missing_capability_is_reported_by_name() {
        let constraints = DelegationConstraints {
            tool_allowlist: Some(vec!["fs.read".into()]),
            ..Default::default()
        };
        let reason = constraints.missing_capability(&["fs.write".to_string()]);
        assert!(reason.unwrap().contains("fs.read"));
    }

    struct FlakyTransport {
        attempts: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl SwarmTransport for FlakyTransport {
        async fn heartbeat(&self, _peer: &PeerIdentity) -> Result<Duration, String> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("connection refused".to_string())
            } else {
                Ok(Duration::from_millis(5))
            }
        }
        async fn send_task(&self, _peer: &PeerIdentity, _request: &SwarmTaskRequest) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({}))
        }
        async fn gossip(&self, _peer: &PeerIdentity, _entries: &[GossipEntry]) -> Result<Vec<GossipEntry>, String> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn heartbeat_recovers_within_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::init(JournalConfig::new(dir.path().join("j.jsonl"))).await.unwrap());
        let mesh = SwarmMesh::new(
            NodeId::new(),
            "token".to_string(),
            PeerTableConfig::default(),
            Arc::new(NoOpPolicy),
            Arc::new(FlakyTransport { attempts: std::sync::atomic::AtomicU32::new(0) }),
            journal,
        );
        let node = NodeId::new();
        mesh.join(identity(node));
        mesh.peer_table.sweep(); // new -> active
        mesh.heartbeat_and_sweep().await;
        assert_eq!(mesh.peer_table.get(node).unwrap().status, PeerStatus::Active);
    }

    /// S5: a depth-3 chain with its last hop tampered is rejected with a
    /// reason mentioning "Attestation", and `swarm.attestation_chain_invalid`
    /// is journaled (spec.md §8).
    #[tokio::test]
    async fn tampered_deep_chain_is_rejected_and_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::init(JournalConfig::new(dir.path().join("j.jsonl"))).await.unwrap());
        let token = "shared-secret".to_string();

        let mut request = SwarmTaskRequest {
            task_id: TaskId::new(),
            originator_node_id: NodeId::new(),
            originator_session_id: SessionId::new(),
            task_text: "investigate outage".to_string(),
            constraints: serde_json::json!({}),
            correlation_id: "corr-s5".to_string(),
            nonce: uuid::Uuid::new_v4().to_string(),
            parent_attestation_chain: AttestationChain::default(),
            delegation_depth: 0,
            task_attributes: None,
        };
        for _ in 0..3 {
            attestation::sign_hop(&token, NodeId::new(), &mut request);
            request.delegation_depth += 1;
        }
        request.parent_attestation_chain.hops[0].hmac = "deadbeef".to_string();

        let mesh = SwarmMesh::new(
            NodeId::new(),
            token,
            PeerTableConfig::default(),
            Arc::new(NoOpPolicy),
            Arc::new(FlakyTransport { attempts: std::sync::atomic::AtomicU32::new(99) }),
            journal.clone(),
        );

        let result = mesh.receive_task(&request, &[]).await;
        match result {
            Err(SwarmError::AttestationInvalid(reason)) => {
                assert!(format!("attestation invalid: {reason}").to_lowercase().contains("attestation"));
            }
            other => panic!("expected AttestationInvalid, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let events = journal.read_session(request.originator_session_id).await.unwrap();
        assert!(events.is_empty()); // journaled under the mesh's system session, not the originator's
        let system_events = journal.read_all().await.unwrap();
        assert!(system_events.iter().any(|e| e.kind == JournalEventKind::SwarmAttestationChainInvalid));
    }
}
