//! Root-cause diagnosis for a delegated task's failure (spec.md §4.8): a
//! fixed priority chain over the available evidence, refined by the
//! task's attributes.

use serde::{Deserialize, Serialize};

use crate::types::{ComplexityLevel, PeerStatus, TaskAttributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    MaliciousBehavior,
    NetworkPartition,
    PeerOverload,
    TaskComplexityMismatch,
    ResourceExhaustion,
    TransientFailure,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedResponse {
    EscalateToHuman,
    Abort,
    Retry,
    NoAction,
}

/// Evidence gathered about a failed delegation, exactly the inputs the
/// priority chain needs — no more.
#[derive(Debug, Clone, Default)]
pub struct FailureEvidence {
    pub suspicious_findings: bool,
    pub data_access_violation: bool,
    pub peer_status: Option<PeerStatus>,
    pub missed_checkpoints: u32,
    pub current_latency_ms: Option<u64>,
    pub avg_latency_ms: Option<f64>,
    pub task_complexity: ComplexityLevel,
    pub failure_count: u32,
    pub cost_spike_detected: bool,
}

/// Combines evidence in priority order (spec.md §4.8): the first rule
/// that matches wins, regardless of whether a later rule would also
/// match.
pub fn diagnose(evidence: &FailureEvidence) -> RootCause {
    if evidence.suspicious_findings || evidence.data_access_violation {
        return RootCause::MaliciousBehavior;
    }
    if matches!(evidence.peer_status, Some(PeerStatus::Suspected) | Some(PeerStatus::Unreachable))
        && evidence.missed_checkpoints >= 3
    {
        return RootCause::NetworkPartition;
    }
    if let (Some(current), Some(avg)) = (evidence.current_latency_ms, evidence.avg_latency_ms) {
        if avg > 0.0 && current as f64 >= 3.0 * avg {
            return RootCause::PeerOverload;
        }
    }
    if evidence.task_complexity == ComplexityLevel::High && evidence.failure_count >= 2 {
        return RootCause::TaskComplexityMismatch;
    }
    if evidence.cost_spike_detected {
        return RootCause::ResourceExhaustion;
    }
    if evidence.failure_count == 1 {
        return RootCause::TransientFailure;
    }
    RootCause::Unknown
}

/// Refines the diagnosed root cause by task attributes (spec.md §4.8): low
/// reversibility escalates to a human; a malicious finding is aborted
/// outright regardless of reversibility.
pub fn recommend_response(cause: RootCause, attributes: &TaskAttributes) -> RecommendedResponse {
    if cause == RootCause::MaliciousBehavior {
        return RecommendedResponse::Abort;
    }
    if attributes.reversibility == ComplexityLevel::Low {
        return RecommendedResponse::EscalateToHuman;
    }
    match cause {
        RootCause::NetworkPartition | RootCause::PeerOverload | RootCause::TransientFailure => {
            RecommendedResponse::Retry
        }
        RootCause::TaskComplexityMismatch | RootCause::ResourceExhaustion => RecommendedResponse::EscalateToHuman,
        RootCause::Unknown => RecommendedResponse::NoAction,
        RootCause::MaliciousBehavior => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspicious_findings_outrank_every_other_signal() {
        let evidence = FailureEvidence {
            suspicious_findings: true,
            peer_status: Some(PeerStatus::Unreachable),
            missed_checkpoints: 5,
            ..Default::default()
        };
        assert_eq!(diagnose(&evidence), RootCause::MaliciousBehavior);
    }

    #[test]
    fn suspected_peer_with_missed_checkpoints_is_network_partition() {
        let evidence = FailureEvidence {
            peer_status: Some(PeerStatus::Suspected),
            missed_checkpoints: 3,
            ..Default::default()
        };
        assert_eq!(diagnose(&evidence), RootCause::NetworkPartition);
    }

    #[test]
    fn latency_spike_is_peer_overload() {
        let evidence = FailureEvidence {
            current_latency_ms: Some(900),
            avg_latency_ms: Some(300.0),
            ..Default::default()
        };
        assert_eq!(diagnose(&evidence), RootCause::PeerOverload);
    }

    #[test]
    fn repeated_high_complexity_failures_are_a_mismatch() {
        let evidence = FailureEvidence {
            task_complexity: ComplexityLevel::High,
            failure_count: 2,
            ..Default::default()
        };
        assert_eq!(diagnose(&evidence), RootCause::TaskComplexityMismatch);
    }

    #[test]
    fn lone_failure_with_no_anomalies_is_transient() {
        let evidence = FailureEvidence {
            failure_count: 1,
            ..Default::default()
        };
        assert_eq!(diagnose(&evidence), RootCause::TransientFailure);
    }

    #[test]
    fn low_reversibility_always_escalates_to_a_human() {
        let attrs = TaskAttributes { reversibility: ComplexityLevel::Low, ..TaskAttributes::default() };
        assert_eq!(recommend_response(RootCause::TransientFailure, &attrs), RecommendedResponse::EscalateToHuman);
    }

    #[test]
    fn malicious_behavior_is_always_aborted_even_if_irreversible() {
        let attrs = TaskAttributes { reversibility: ComplexityLevel::Low, ..TaskAttributes::default() };
        assert_eq!(recommend_response(RootCause::MaliciousBehavior, &attrs), RecommendedResponse::Abort);
    }
}
