//! Per-subsystem error enums aggregated into a top-level `RuntimeError`,
//! plus the stable `ErrorCode` taxonomy (spec.md §7) that callers match on.
//!
//! Mirrors the teacher's `RuntimeError` (runtime/src/types/error.rs): each
//! subsystem owns its own `thiserror` enum, and the umbrella type wraps them
//! with `#[from]` so `?` composes across module boundaries without manual
//! `.map_err`.

use serde::{Deserialize, Serialize};

use super::manifest::{ManifestValidationError, PluginManifestError};
use super::permission::ScopeParseError;
use super::plan::PlanValidationError;
use super::task::TaskError;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal entry at seq {0} failed hash-chain verification")]
    ChainBroken(u64),
    #[error("journal entry at seq {0} is malformed: {1}")]
    Malformed(u64, String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no such session: {0}")]
    UnknownSession(String),
    #[error("compaction failed: {0}")]
    CompactionFailed(String),
    #[error("session {0} is already terminal; no further events may be appended")]
    SessionTerminal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema exceeds the {0} byte size guard")]
    TooLarge(usize),
    #[error("schema exceeds the {0} nesting-depth guard")]
    TooDeep(usize),
    #[error("invalid schema: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error(transparent)]
    ScopeParse(#[from] ScopeParseError),
    #[error("permission denied for scope '{0}'")]
    Denied(String),
    #[error("no approval prompt configured, cannot resolve scope '{0}'")]
    NoPrompter(String),
    #[error("approval prompt failed: {0}")]
    PromptFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ToolRuntimeError {
    #[error(transparent)]
    Manifest(#[from] ManifestValidationError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("input failed schema validation: {0:?}")]
    InvalidInput(Vec<String>),
    #[error("output failed schema validation: {0:?}")]
    InvalidOutput(Vec<String>),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool timed out after {0}ms")]
    Timeout(u64),
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    #[error("runner failed: {0}")]
    RunnerFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    Manifest(#[from] PluginManifestError),
    #[error("plugin '{0}' not found")]
    NotFound(String),
    #[error("plugin '{0}' failed to load: {1}")]
    LoadFailed(String, String),
    #[error("hook circuit open for '{0}'")]
    CircuitOpen(String),
    #[error("plugin '{0}' is not active")]
    NotActive(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Plan(#[from] PlanValidationError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("session '{0}' is already terminal")]
    SessionTerminal(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("unknown step: {0}")]
    UnknownStep(String),
    #[error("input_from path '{0}' did not resolve on a prior step result")]
    BadInput(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("max concurrent sessions reached")]
    ConcurrencyLimit,
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    ToolRuntime(#[from] ToolRuntimeError),
}

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("peer '{0}' is evicted")]
    PeerEvicted(String),
    #[error("replay detected for nonce '{0}'")]
    ReplayDetected(String),
    #[error("attestation verification failed: {0}")]
    AttestationInvalid(String),
    #[error("delegation blocked by veto policy: {0}")]
    VetoedByPolicy(String),
    #[error("auction has no eligible bids")]
    NoEligibleBids,
    #[error("consensus quorum not reached: {0}/{1}")]
    QuorumNotReached(usize, usize),
    #[error("bid rate limit exceeded for peer '{0}'")]
    BidRateLimited(String),
    #[error("delegation depth {0} exceeds max_delegation_depth {1}")]
    DelegationDepthExceeded(u32, u32),
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    ToolRuntime(#[from] ToolRuntimeError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Swarm(#[from] SwarmError),
}

/// Stable, wire-facing error codes (spec.md §7 — the table there is
/// normative on names). These are what a client matches on; the
/// `thiserror` enums above are the in-process Rust surface. Kept as a flat
/// `Serialize`/`Deserialize` enum so it round-trips as the plain string
/// spec.md specifies (e.g. `"BAD_INPUT"`) rather than serde's default
/// enum-tag shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "BAD_INPUT")]
    BadInput,
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "POLICY_VIOLATION")]
    PolicyViolation,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "TOO_MANY_SESSIONS")]
    TooManySessions,
    #[serde(rename = "IO_ERROR")]
    IoError,
    #[serde(rename = "PLUGIN_FAILED")]
    PluginFailed,
    #[serde(rename = "PEER_UNREACHABLE")]
    PeerUnreachable,
    #[serde(rename = "ATTESTATION_INVALID")]
    AttestationInvalid,
    #[serde(rename = "NONCE_REPLAY")]
    NonceReplay,
    #[serde(rename = "DELEGATION_DEPTH")]
    DelegationDepth,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl RuntimeError {
    /// Maps a typed error to its stable wire code. New variants should be
    /// added here deliberately rather than falling through to `Unknown`.
    pub fn code(&self) -> ErrorCode {
        match self {
            RuntimeError::Kernel(KernelError::BadInput(_)) => ErrorCode::BadInput,
            RuntimeError::Kernel(KernelError::LimitExceeded(_)) => ErrorCode::Unknown,
            RuntimeError::Kernel(KernelError::ConcurrencyLimit) => ErrorCode::TooManySessions,
            RuntimeError::Kernel(KernelError::Journal(_)) => ErrorCode::IoError,
            RuntimeError::Kernel(KernelError::ToolRuntime(inner)) => Self::tool_code(inner),
            RuntimeError::Kernel(_) => ErrorCode::Unknown,
            RuntimeError::Permission(PermissionError::Denied(_)) => ErrorCode::PermissionDenied,
            RuntimeError::Permission(_) => ErrorCode::Unknown,
            RuntimeError::Schema(_) => ErrorCode::BadInput,
            RuntimeError::ToolRuntime(inner) => Self::tool_code(inner),
            RuntimeError::Plugin(PluginError::LoadFailed(..)) => ErrorCode::PluginFailed,
            RuntimeError::Plugin(_) => ErrorCode::PluginFailed,
            RuntimeError::Swarm(SwarmError::AttestationInvalid(_)) => ErrorCode::AttestationInvalid,
            RuntimeError::Swarm(SwarmError::ReplayDetected(_)) => ErrorCode::NonceReplay,
            RuntimeError::Swarm(SwarmError::PeerEvicted(_)) => ErrorCode::PeerUnreachable,
            RuntimeError::Swarm(SwarmError::DelegationDepthExceeded(..)) => {
                ErrorCode::DelegationDepth
            }
            RuntimeError::Swarm(_) => ErrorCode::Unknown,
            RuntimeError::Journal(_) => ErrorCode::IoError,
        }
    }

    fn tool_code(err: &ToolRuntimeError) -> ErrorCode {
        match err {
            ToolRuntimeError::InvalidInput(_) | ToolRuntimeError::InvalidOutput(_) => {
                ErrorCode::BadInput
            }
            ToolRuntimeError::UnknownTool(_) => ErrorCode::BadInput,
            ToolRuntimeError::Timeout(_) => ErrorCode::Timeout,
            ToolRuntimeError::PolicyDenied(_) => ErrorCode::PolicyViolation,
            ToolRuntimeError::Permission(_) => ErrorCode::PermissionDenied,
            _ => ErrorCode::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_as_bare_string() {
        let json = serde_json::to_string(&ErrorCode::BadInput).unwrap();
        assert_eq!(json, "\"BAD_INPUT\"");
    }

    #[test]
    fn bad_input_maps_through_kernel_wrapper() {
        let err = RuntimeError::Kernel(KernelError::BadInput("steps.0.output".into()));
        assert_eq!(err.code(), ErrorCode::BadInput);
    }

    #[test]
    fn tool_timeout_maps_through_both_wrappers() {
        let direct = RuntimeError::ToolRuntime(ToolRuntimeError::Timeout(5000));
        assert_eq!(direct.code(), ErrorCode::Timeout);
        let via_kernel =
            RuntimeError::Kernel(KernelError::ToolRuntime(ToolRuntimeError::Timeout(5000)));
        assert_eq!(via_kernel.code(), ErrorCode::Timeout);
    }

    #[test]
    fn delegation_depth_and_attestation_map_correctly() {
        let attestation = RuntimeError::Swarm(SwarmError::AttestationInvalid("bad hmac".into()));
        assert_eq!(attestation.code(), ErrorCode::AttestationInvalid);
        let replay = RuntimeError::Swarm(SwarmError::ReplayDetected("nonce-1".into()));
        assert_eq!(replay.code(), ErrorCode::NonceReplay);
    }
}
