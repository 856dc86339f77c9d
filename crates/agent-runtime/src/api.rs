//! HTTP surface contract (spec.md §6): the exact operations a system
//! boundary exposes, expressed as a trait rather than a bound port —
//! binding it to an actual HTTP server (routes, auth middleware, a
//! listener) is the embedder's job, mirroring the teacher's
//! `RuntimeApiProvider` (`api/traits.rs`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::journal::JournalEvent;
use crate::permission::ApprovalDecision;
use crate::plugin_host::PluginDescriptor;
use crate::types::{RuntimeError, Session, SessionId, ToolManifest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub subsystem: String,
    pub status: HealthState,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Warning,
    Unavailable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub text: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub limits: Option<serde_json::Value>,
    #[serde(default)]
    pub policy: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactRequest {
    pub retain_sessions: Vec<SessionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactResponse {
    pub events_before: u64,
    pub events_after: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub session_id: SessionId,
    pub scopes: Vec<String>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveApprovalRequest {
    pub decision: ApprovalDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    pub plugin_id: String,
    pub content_hash: String,
}

/// Errors this trait's methods surface as the HTTP-layer's 4xx cases;
/// an embedder's router maps these to status codes (spec.md §6's table),
/// `RuntimeError` covers everything else (500-equivalent).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// The HTTP surface at the system boundary (spec.md §6): every method
/// here corresponds to exactly one `Method Path` row in the spec's table.
/// Authentication (a single bearer token, `health` exempt) is the
/// embedder's router's job, not this trait's.
#[async_trait]
pub trait RuntimeApiProvider: Send + Sync {
    async fn health(&self) -> Vec<HealthStatus>;

    async fn list_tools(&self) -> Vec<ToolManifest>;

    async fn get_tool(&self, name: &str) -> Result<ToolManifest, ApiError>;

    async fn create_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse, ApiError>;

    async fn get_session(&self, session_id: SessionId) -> Result<Session, ApiError>;

    async fn abort_session(&self, session_id: SessionId) -> Result<(), ApiError>;

    async fn replay_session(&self, session_id: SessionId) -> Result<Vec<JournalEvent>, ApiError>;

    async fn recover_session(&self, session_id: SessionId) -> Result<Session, ApiError>;

    async fn compact_journal(&self, request: CompactRequest) -> Result<CompactResponse, ApiError>;

    async fn list_pending_approvals(&self) -> Vec<PendingApproval>;

    async fn resolve_approval(&self, approval_id: &str, request: ResolveApprovalRequest) -> Result<(), ApiError>;

    async fn list_plugins(&self) -> Vec<PluginDescriptor>;

    async fn get_plugin(&self, plugin_id: &str) -> Result<PluginDescriptor, ApiError>;

    async fn reload_plugin(&self, plugin_id: &str) -> Result<ReloadResponse, ApiError>;

    async fn unload_plugin(&self, plugin_id: &str) -> Result<(), ApiError>;
}
