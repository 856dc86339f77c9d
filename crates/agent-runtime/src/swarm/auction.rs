//! Commit-reveal sealed-bid auctions (spec.md §4.8): RFQ creation, bid
//! commit and reveal, the Auction Guard's rate limiting and front-running
//! detection, and Pareto selection of the winning bid.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::types::{NodeId, RevealedBid, SealedBid, SwarmError};

const DEFAULT_BID_RATE_LIMIT_PER_MINUTE: u32 = 10;
const FRONT_RUNNING_WINDOW_MS: i64 = 500;

/// A bid past both commit and reveal, with reputation/capability data
/// joined in by the caller for Pareto scoring.
#[derive(Debug, Clone)]
pub struct ScoredBid {
    pub bidder_node_id: NodeId,
    pub estimated_cost_usd: f64,
    pub estimated_duration_ms: u64,
    pub trust: f64,
    pub capability: f64,
}

struct AuctionState {
    commits: HashMap<NodeId, SealedBid>,
    reveals: HashMap<NodeId, RevealedBid>,
}

pub struct AuctionHouse {
    auctions: Mutex<HashMap<String, AuctionState>>,
    bid_times: Mutex<HashMap<NodeId, Vec<DateTime<Utc>>>>,
    rate_limit_per_minute: u32,
}

impl AuctionHouse {
    pub fn new() -> Self {
        Self {
            auctions: Mutex::new(HashMap::new()),
            bid_times: Mutex::new(HashMap::new()),
            rate_limit_per_minute: DEFAULT_BID_RATE_LIMIT_PER_MINUTE,
        }
    }

    pub fn create_auction(&self, rfq_id: String) {
        self.auctions.lock().unwrap().insert(
            rfq_id,
            AuctionState {
                commits: HashMap::new(),
                reveals: HashMap::new(),
            },
        );
    }

    /// Accepts a sealed commitment, enforcing the bid-rate limit and
    /// flagging front-running (committing within 500ms of another
    /// bidder's commit on the same RFQ).
    pub fn submit_commit(&self, bid: SealedBid) -> Result<(), SwarmError> {
        {
            let mut bid_times = self.bid_times.lock().unwrap();
            let times = bid_times.entry(bid.bidder_node_id).or_default();
            let one_minute_ago = Utc::now() - chrono::Duration::minutes(1);
            times.retain(|t| *t > one_minute_ago);
            if times.len() as u32 >= self.rate_limit_per_minute {
                return Err(SwarmError::BidRateLimited(bid.bidder_node_id.to_string()));
            }
            times.push(bid.committed_at);
        }

        let mut auctions = self.auctions.lock().unwrap();
        let auction = auctions
            .get_mut(&bid.rfq_id)
            .ok_or_else(|| SwarmError::UnknownPeer(bid.rfq_id.clone()))?;
        auction.commits.insert(bid.bidder_node_id, bid);
        Ok(())
    }

    /// Returns the node ids the Auction Guard flags for front-running on
    /// this RFQ: bidders whose commit landed within `FRONT_RUNNING_WINDOW_MS`
    /// of another bidder's commit, for every pair of commits.
    pub fn front_runners(&self, rfq_id: &str) -> Vec<NodeId> {
        let auctions = self.auctions.lock().unwrap();
        let Some(auction) = auctions.get(rfq_id) else { return Vec::new() };
        let mut commits: Vec<&SealedBid> = auction.commits.values().collect();
        commits.sort_by_key(|b| b.committed_at);

        let mut flagged = Vec::new();
        for i in 1..commits.len() {
            let gap_ms = (commits[i].committed_at - commits[i - 1].committed_at).num_milliseconds();
            if gap_ms.abs() <= FRONT_RUNNING_WINDOW_MS {
                flagged.push(commits[i].bidder_node_id);
            }
        }
        flagged
    }

    /// Verifies the reveal's hash equals its commitment and records it.
    pub fn submit_reveal(&self, bid: RevealedBid) -> Result<(), SwarmError> {
        let mut auctions = self.auctions.lock().unwrap();
        let auction = auctions
            .get_mut(&bid.rfq_id)
            .ok_or_else(|| SwarmError::UnknownPeer(bid.rfq_id.clone()))?;

        let commit = auction
            .commits
            .get(&bid.bidder_node_id)
            .ok_or_else(|| SwarmError::UnknownPeer(bid.bidder_node_id.to_string()))?;

        let expected = commitment_hash(&bid);
        if expected != commit.commitment {
            return Err(SwarmError::AttestationInvalid(format!(
                "reveal for '{}' does not match its commitment",
                bid.bidder_node_id
            )));
        }
        auction.reveals.insert(bid.bidder_node_id, bid);
        Ok(())
    }

    /// Selects the winner by Pareto dominance over
    /// `{trust, latency, cost, capability}`: the non-dominated front, with
    /// crowding-distance-biased weighted-sum tie-break when more than one
    /// bid survives.
    pub fn select_winner(&self, rfq_id: &str, bids: Vec<ScoredBid>) -> Result<NodeId, SwarmError> {
        let flagged = self.front_runners(rfq_id);
        let eligible: Vec<ScoredBid> = bids.into_iter().filter(|b| !flagged.contains(&b.bidder_node_id)).collect();
        if eligible.is_empty() {
            return Err(SwarmError::NoEligibleBids);
        }
        let front = pareto_front(&eligible);
        if front.len() == 1 {
            return Ok(front[0].bidder_node_id);
        }
        let distances = crowding_distances(&front);
        front
            .iter()
            .zip(distances.iter())
            .max_by(|(a, da), (b, db)| {
                weighted_score(a, **da)
                    .partial_cmp(&weighted_score(b, **db))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(bid, _)| bid.bidder_node_id)
            .ok_or(SwarmError::NoEligibleBids)
    }
}

impl Default for AuctionHouse {
    fn default() -> Self {
        Self::new()
    }
}

fn commitment_hash(bid: &RevealedBid) -> String {
    let payload = serde_json::json!({
        "rfq_id": bid.rfq_id,
        "bidder_node_id": bid.bidder_node_id,
        "estimated_cost_usd": bid.estimated_cost_usd,
        "estimated_duration_ms": bid.estimated_duration_ms,
        "nonce": bid.nonce,
    });
    super::attestation::canonical_hash(&payload)
}

/// `true` if `a` dominates `b`: at least as good on every objective (trust
/// and capability maximized, latency and cost minimized) and strictly
/// better on at least one.
fn dominates(a: &ScoredBid, b: &ScoredBid) -> bool {
    let at_least_as_good = a.trust >= b.trust
        && a.capability >= b.capability
        && a.estimated_duration_ms <= b.estimated_duration_ms
        && a.estimated_cost_usd <= b.estimated_cost_usd;
    let strictly_better = a.trust > b.trust
        || a.capability > b.capability
        || a.estimated_duration_ms < b.estimated_duration_ms
        || a.estimated_cost_usd < b.estimated_cost_usd;
    at_least_as_good && strictly_better
}

fn pareto_front(bids: &[ScoredBid]) -> Vec<ScoredBid> {
    bids.iter()
        .filter(|candidate| !bids.iter().any(|other| dominates(other, candidate)))
        .cloned()
        .collect()
}

/// Per-bid crowding distance over the four objectives, normalized to each
/// objective's range on the front. Boundary solutions (min/max on any
/// objective) get `f64::INFINITY` so they are always preferred, avoiding
/// always picking the same "middle" bidder (spec.md §4.8).
fn crowding_distances(front: &[ScoredBid]) -> Vec<f64> {
    let n = front.len();
    let mut distances = vec![0.0_f64; n];
    if n <= 2 {
        return vec![f64::INFINITY; n];
    }

    let objectives: [(fn(&ScoredBid) -> f64, bool); 4] = [
        (|b| b.trust, true),
        (|b| b.capability, true),
        (|b| b.estimated_duration_ms as f64, false),
        (|b| b.estimated_cost_usd, false),
    ];

    for (extract, maximize) in objectives {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| extract(&front[i]).partial_cmp(&extract(&front[j])).unwrap());
        let lo = extract(&front[order[0]]);
        let hi = extract(&front[order[n - 1]]);
        let range = (hi - lo).abs();

        distances[order[0]] = f64::INFINITY;
        distances[order[n - 1]] = f64::INFINITY;
        for w in 1..n - 1 {
            if distances[order[w]].is_infinite() {
                continue;
            }
            let prev = extract(&front[order[w - 1]]);
            let next = extract(&front[order[w + 1]]);
            let contribution = if range > 0.0 { (next - prev).abs() / range } else { 0.0 };
            distances[order[w]] += if maximize { contribution } else { contribution };
        }
    }
    distances
}

fn weighted_score(bid: &ScoredBid, crowding: f64) -> f64 {
    let cost_term = 1.0 / (1.0 + bid.estimated_cost_usd.max(0.0));
    let latency_term = 1.0 / (1.0 + bid.estimated_duration_ms as f64 / 1000.0);
    let base = 0.4 * bid.trust + 0.2 * bid.capability + 0.2 * cost_term + 0.2 * latency_term;
    if crowding.is_finite() {
        base + 0.01 * crowding
    } else {
        base + 1.0
    }
}
