//! Peer reputation (spec.md §4.8): trust-score updates, time decay,
//! anti-gaming detection, and the Shannon-entropy diversity multiplier
//! used to bias auction tie-breaks.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::types::{ComplexityLevel, NodeId, ReputationRecord};

/// Half-life for trust decay toward 0.5 when a peer has no interactions.
/// Not specified by name in spec.md (only "decays toward 0.5 over time");
/// chosen as a conservative default — documented as an open decision.
const DECAY_HALF_LIFE_MS: i64 = 3_600_000;

pub struct ReputationBook {
    records: Mutex<HashMap<NodeId, ReputationRecord>>,
}

impl ReputationBook {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Applies time decay toward 0.5 since the peer's last recorded
    /// outcome, then returns the (possibly updated) record. A peer with
    /// no history yet starts at the neutral 0.5 and has nothing to decay.
    pub fn get(&self, node_id: NodeId) -> ReputationRecord {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(node_id).or_insert_with(ReputationRecord::new);
        decay_towards_neutral(record);
        record.clone()
    }

    pub fn record_success(
        &self,
        node_id: NodeId,
        complexity: ComplexityLevel,
        duration_ms: u64,
        tokens_used: u64,
        cost_usd: f64,
    ) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(node_id).or_insert_with(ReputationRecord::new);
        decay_towards_neutral(record);

        record.tasks_completed += 1;
        record.total_duration_ms += duration_ms;
        record.total_tokens_used += tokens_used;
        record.total_cost_usd += cost_usd;
        record.consecutive_successes += 1;
        record.consecutive_failures = 0;
        record.trust_score += (1.0 - record.trust_score) / 8.0;
        record.avg_latency_ms = running_average(record.avg_latency_ms, duration_ms as f64, record.tasks_completed);
        record.last_outcome_at = Some(Utc::now());

        match complexity {
            ComplexityLevel::Low => record.low_complexity_completed += 1,
            ComplexityLevel::Medium => record.medium_complexity_completed += 1,
            ComplexityLevel::High => record.high_complexity_completed += 1,
        }
    }

    pub fn record_failure(&self, node_id: NodeId, complexity: ComplexityLevel) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(node_id).or_insert_with(ReputationRecord::new);
        decay_towards_neutral(record);

        record.tasks_failed += 1;
        record.consecutive_failures += 1;
        record.consecutive_successes = 0;
        record.trust_score -= (1.0 - record.trust_score) / 4.0;
        record.last_outcome_at = Some(Utc::now());

        if complexity == ComplexityLevel::High {
            record.high_complexity_offered += 1;
        }
    }

    pub fn record_high_complexity_rejected(&self, node_id: NodeId) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(node_id).or_insert_with(ReputationRecord::new);
        record.high_complexity_offered += 1;
        record.high_complexity_rejected += 1;
    }

    pub fn record_aborted(&self, node_id: NodeId) {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(node_id).or_insert_with(ReputationRecord::new);
        record.tasks_aborted += 1;
        record.last_outcome_at = Some(Utc::now());
    }

    /// Anti-gaming flag (spec.md §4.8): peer whose completed work is ≥80%
    /// low-complexity, or which rejects ≥50% of high-complexity offers.
    pub fn is_flagged(&self, node_id: NodeId) -> bool {
        let record = self.get(node_id);
        let total_completed =
            record.low_complexity_completed + record.medium_complexity_completed + record.high_complexity_completed;
        let low_share_flagged =
            total_completed > 0 && record.low_complexity_completed as f64 / total_completed as f64 >= 0.8;
        let high_reject_flagged = record.high_complexity_offered > 0
            && record.high_complexity_rejected as f64 / record.high_complexity_offered as f64 >= 0.5;
        low_share_flagged || high_reject_flagged
    }

    /// Normalized Shannon entropy over the low/medium/high complexity
    /// mix of completed tasks, in `[0, 1]`. A peer that only ever does one
    /// complexity bucket scores 0; an even three-way split scores 1.
    pub fn diversity_multiplier(&self, node_id: NodeId) -> f64 {
        let record = self.get(node_id);
        let counts = [
            record.low_complexity_completed as f64,
            record.medium_complexity_completed as f64,
            record.high_complexity_completed as f64,
        ];
        let total: f64 = counts.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let entropy: f64 = counts
            .iter()
            .filter(|&&c| c > 0.0)
            .map(|&c| {
                let p = c / total;
                -p * p.log2()
            })
            .sum();
        let max_entropy = (counts.len() as f64).log2();
        if max_entropy == 0.0 {
            0.0
        } else {
            (entropy / max_entropy).clamp(0.0, 1.0)
        }
    }
}

impl Default for ReputationBook {
    fn default() -> Self {
        Self::new()
    }
}

fn running_average(current: f64, new_value: f64, count: u64) -> f64 {
    if count <= 1 {
        new_value
    } else {
        current + (new_value - current) / count as f64
    }
}

fn decay_towards_neutral(record: &mut ReputationRecord) {
    let Some(last) = record.last_outcome_at else { return };
    let elapsed_ms = (Utc::now() - last).num_milliseconds().max(0) as f64;
    if elapsed_ms <= 0.0 {
        return;
    }
    let halvings = elapsed_ms / DECAY_HALF_LIFE_MS as f64;
    let decay_factor = 0.5_f64.powf(halvings);
    record.trust_score = 0.5 + (record.trust_score - 0.5) * decay_factor;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_raises_trust_by_the_spec_formula() {
        let book = ReputationBook::new();
        let node = NodeId::new();
        let before = book.get(node).trust_score;
        book.record_success(node, ComplexityLevel::Medium, 100, 10, 0.01);
        let after = book.get(node).trust_score;
        assert!((after - (before + (1.0 - before) / 8.0)).abs() < 1e-9);
    }

    #[test]
    fn failure_lowers_trust_by_the_spec_formula() {
        let book = ReputationBook::new();
        let node = NodeId::new();
        let before = book.get(node).trust_score;
        book.record_failure(node, ComplexityLevel::Medium);
        let after = book.get(node).trust_score;
        assert!((after - (before - (1.0 - before) / 4.0)).abs() < 1e-9);
    }

    #[test]
    fn anti_gaming_flags_low_complexity_farmer() {
        let book = ReputationBook::new();
        let node = NodeId::new();
        for _ in 0..9 {
            book.record_success(node, ComplexityLevel::Low, 10, 1, 0.0);
        }
        book.record_success(node, ComplexityLevel::High, 10, 1, 0.0);
        assert!(book.is_flagged(node));
    }

    #[test]
    fn anti_gaming_flags_high_complexity_dodger() {
        let book = ReputationBook::new();
        let node = NodeId::new();
        book.record_high_complexity_rejected(node);
        book.record_high_complexity_rejected(node);
        assert!(book.is_flagged(node));
    }

    #[test]
    fn single_complexity_bucket_has_zero_diversity() {
        let book = ReputationBook::new();
        let node = NodeId::new();
        book.record_success(node, ComplexityLevel::Medium, 10, 1, 0.0);
        book.record_success(node, ComplexityLevel::Medium, 10, 1, 0.0);
        assert_eq!(book.diversity_multiplier(node), 0.0);
    }

    #[test]
    fn even_split_across_buckets_has_full_diversity() {
        let book = ReputationBook::new();
        let node = NodeId::new();
        book.record_success(node, ComplexityLevel::Low, 10, 1, 0.0);
        book.record_success(node, ComplexityLevel::Medium, 10, 1, 0.0);
        book.record_success(node, ComplexityLevel::High, 10, 1, 0.0);
        assert!((book.diversity_multiplier(node) - 1.0).abs() < 1e-9);
    }
}
