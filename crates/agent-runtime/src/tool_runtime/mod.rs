//! Tool Runtime: resolves a manifest, enforces permission/policy, invokes
//! a pluggable runner, and validates the result (spec.md §4.4).

pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{timeout, Duration};

use crate::permission::{PermissionEngine, PermissionRequest};
use crate::schema::SchemaValidator;
use crate::types::{
    SessionPolicy, StepError, StepResult, StepStatus, ToolManifest, ToolRuntimeError,
};
use crate::types::{SessionId, StepId};

pub use runner::{HttpRunner, InternalRunner, MockRunner, SubprocessConfig, SubprocessRunner, ToolRunner};

pub struct ToolRuntime {
    manifests: HashMap<String, ToolManifest>,
    runners: HashMap<String, Arc<dyn ToolRunner>>,
    permission_engine: Arc<PermissionEngine>,
    schema: Arc<SchemaValidator>,
    mock_mode: bool,
}

pub struct Invocation {
    pub session_id: SessionId,
    pub step_id: StepId,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub policy: SessionPolicy,
}

impl ToolRuntime {
    pub fn new(permission_engine: Arc<PermissionEngine>, schema: Arc<SchemaValidator>) -> Self {
        Self {
            manifests: HashMap::new(),
            runners: HashMap::new(),
            permission_engine,
            schema,
            mock_mode: false,
        }
    }

    pub fn with_mock_mode(mut self, mock_mode: bool) -> Self {
        self.mock_mode = mock_mode;
        self
    }

    pub fn register(&mut self, manifest: ToolManifest, runner: Arc<dyn ToolRunner>) {
        self.runners.insert(manifest.name.clone(), runner);
        self.manifests.insert(manifest.name.clone(), manifest);
    }

    pub fn manifest(&self, name: &str) -> Option<&ToolManifest> {
        self.manifests.get(name)
    }

    pub async fn invoke(&self, call: Invocation) -> StepResult {
        let started_at = chrono::Utc::now();
        match self.invoke_inner(&call).await {
            Ok(output) => StepResult {
                step_id: call.step_id,
                status: StepStatus::Succeeded,
                output: Some(output),
                error: None,
                started_at,
                finished_at: Some(chrono::Utc::now()),
                attempts: 1,
            },
            Err(err) => StepResult {
                step_id: call.step_id,
                status: StepStatus::Failed,
                output: None,
                error: Some(error_to_step_error(&err)),
                started_at,
                finished_at: Some(chrono::Utc::now()),
                attempts: 1,
            },
        }
    }

    async fn invoke_inner(&self, call: &Invocation) -> Result<serde_json::Value, ToolRuntimeError> {
        let manifest = self
            .manifests
            .get(&call.tool_name)
            .ok_or_else(|| ToolRuntimeError::UnknownTool(call.tool_name.clone()))?;
        manifest.validate()?;

        let scopes = permission_scopes(manifest, &call.input);
        if !scopes.is_empty() {
            let result = self
                .permission_engine
                .check(PermissionRequest {
                    session_id: call.session_id,
                    step_id: call.step_id,
                    scopes,
                })
                .await
                .map_err(ToolRuntimeError::Permission)?;
            if !result.allowed {
                return Err(ToolRuntimeError::Permission(
                    crate::types::PermissionError::Denied(call.tool_name.clone()),
                ));
            }
        }

        enforce_policy(manifest, &call.input, &call.policy)?;

        let validation = self
            .schema
            .validate(&manifest.input_schema, &call.input)
            .map_err(|e| ToolRuntimeError::RunnerFailed(e.to_string()))?;
        if !validation.valid {
            return Err(ToolRuntimeError::InvalidInput(validation.errors));
        }

        let output = if self.mock_mode && manifest.supports.mock {
            manifest
                .mock_responses
                .clone()
                .unwrap_or(serde_json::json!({}))
        } else {
            let runner = self
                .runners
                .get(&call.tool_name)
                .ok_or_else(|| ToolRuntimeError::UnknownTool(call.tool_name.clone()))?;
            let deadline = Duration::from_millis(manifest.timeout_ms);
            match timeout(deadline, runner.run(&call.input)).await {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => return Err(ToolRuntimeError::RunnerFailed(e)),
                Err(_) => return Err(ToolRuntimeError::Timeout(manifest.timeout_ms)),
            }
        };

        let output_validation = self
            .schema
            .validate(&manifest.output_schema, &output)
            .map_err(|e| ToolRuntimeError::RunnerFailed(e.to_string()))?;
        if !output_validation.valid {
            return Err(ToolRuntimeError::InvalidOutput(output_validation.errors));
        }

        Ok(output)
    }
}

/// Builds permission scopes from the manifest's declared scope templates,
/// substituting `{input.<field>}` placeholders with values from the call's
/// input object so e.g. `filesystem:read:{input.path}` becomes
/// `filesystem:read:/workspace/file.txt`.
fn permission_scopes(manifest: &ToolManifest, input: &serde_json::Value) -> Vec<String> {
    manifest
        .permissions
        .iter()
        .map(|template| substitute_input(template, input))
        .collect()
}

fn substitute_input(template: &str, input: &serde_json::Value) -> String {
    if let Some(start) = template.find("{input.") {
        if let Some(end) = template[start..].find('}') {
            let field = &template[start + 7..start + end];
            let value = input
                .get(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            return format!("{}{}{}", &template[..start], value, &template[start + end + 1..]);
        }
    }
    template.to_string()
}

fn enforce_policy(
    manifest: &ToolManifest,
    input: &serde_json::Value,
    policy: &SessionPolicy,
) -> Result<(), ToolRuntimeError> {
    if !policy.allowed_paths.is_empty() {
        if let Some(path) = input.get("path").and_then(|v| v.as_str()) {
            if !policy.allowed_paths.iter().any(|p| path.starts_with(p.as_str())) {
                return Err(ToolRuntimeError::PolicyDenied(format!(
                    "path '{path}' is not under any allowed_paths entry"
                )));
            }
        }
    }
    if !policy.allowed_endpoints.is_empty() {
        if let Some(url) = input.get("url").and_then(|v| v.as_str()) {
            if !policy.allowed_endpoints.iter().any(|e| url.starts_with(e.as_str())) {
                return Err(ToolRuntimeError::PolicyDenied(format!(
                    "endpoint '{url}' is not in allowed_endpoints"
                )));
            }
        }
    }
    if !policy.allowed_commands.is_empty() {
        if let Some(cmd) = input.get("command").and_then(|v| v.as_str()) {
            if !policy.allowed_commands.iter().any(|c| c == cmd) {
                return Err(ToolRuntimeError::PolicyDenied(format!(
                    "command '{cmd}' is not in allowed_commands"
                )));
            }
        }
    }
    if policy.require_approval_for_writes
        && input.get("write").and_then(|v| v.as_bool()).unwrap_or(false)
        && manifest.permissions.iter().all(|p| !p.starts_with("filesystem:write"))
    {
        return Err(ToolRuntimeError::PolicyDenied(
            "write requires an explicit filesystem:write permission scope".to_string(),
        ));
    }
    Ok(())
}

fn error_to_step_error(err: &ToolRuntimeError) -> StepError {
    let code = match err {
        ToolRuntimeError::Permission(_) => "PERMISSION_DENIED",
        ToolRuntimeError::PolicyDenied(_) => "POLICY_VIOLATION",
        ToolRuntimeError::Timeout(_) => "TIMEOUT",
        ToolRuntimeError::InvalidInput(_) | ToolRuntimeError::InvalidOutput(_) => "BAD_INPUT",
        ToolRuntimeError::UnknownTool(_) => "BAD_INPUT",
        ToolRuntimeError::Manifest(_) => "BAD_INPUT",
        ToolRuntimeError::RunnerFailed(_) => "UNKNOWN",
    };
    StepError {
        code: code.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::ApprovalDecision;
    use async_trait::async_trait;

    struct AlwaysAllow;

    #[async_trait]
    impl crate::permission::ApprovalPrompt for AlwaysAllow {
        async fn prompt(
            &self,
            _session_id: SessionId,
            _scopes: &[String],
        ) -> Result<ApprovalDecision, crate::types::PermissionError> {
            Ok(ApprovalDecision::AllowSession)
        }
    }

    fn echo_manifest() -> ToolManifest {
        ToolManifest {
            name: "echo".into(),
            version: "1.0.0".into(),
            description: "echoes its input".into(),
            runner: crate::types::Runner::Internal,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            permissions: vec![],
            timeout_ms: 1000,
            supports: crate::types::ToolSupports { mock: true, dry_run: true },
            mock_responses: Some(serde_json::json!({"msg": "hello"})),
        }
    }

    fn runtime(mock_mode: bool) -> ToolRuntime {
        let engine = Arc::new(PermissionEngine::new(Arc::new(AlwaysAllow), None));
        let schema = Arc::new(SchemaValidator::new());
        let mut rt = ToolRuntime::new(engine, schema).with_mock_mode(mock_mode);
        rt.register(echo_manifest(), Arc::new(MockRunner::new(serde_json::json!({"msg": "hello"}))));
        rt
    }

    #[tokio::test]
    async fn mock_mode_returns_manifest_mock_response_without_invoking_runner() {
        let rt = runtime(true);
        let result = rt
            .invoke(Invocation {
                session_id: SessionId::new(),
                step_id: StepId::new(),
                tool_name: "echo".into(),
                input: serde_json::json!({}),
                policy: SessionPolicy::default(),
            })
            .await;
        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.output.unwrap()["msg"], "hello");
    }

    #[tokio::test]
    async fn unknown_tool_fails_with_bad_input_code() {
        let rt = runtime(false);
        let result = rt
            .invoke(Invocation {
                session_id: SessionId::new(),
                step_id: StepId::new(),
                tool_name: "does-not-exist".into(),
                input: serde_json::json!({}),
                policy: SessionPolicy::default(),
            })
            .await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().code, "BAD_INPUT");
    }

    #[tokio::test]
    async fn policy_denies_path_outside_allowlist() {
        let engine = Arc::new(PermissionEngine::new(Arc::new(AlwaysAllow), None));
        let schema = Arc::new(SchemaValidator::new());
        let mut rt = ToolRuntime::new(engine, schema);
        let mut manifest = echo_manifest();
        manifest.supports.mock = false;
        rt.register(manifest, Arc::new(MockRunner::new(serde_json::json!({}))));

        let mut policy = SessionPolicy::default();
        policy.allowed_paths = vec!["/workspace".to_string()];

        let result = rt
            .invoke(Invocation {
                session_id: SessionId::new(),
                step_id: StepId::new(),
                tool_name: "echo".into(),
                input: serde_json::json!({"path": "/etc/passwd"}),
                policy,
            })
            .await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().code, "POLICY_VIOLATION");
    }
}
