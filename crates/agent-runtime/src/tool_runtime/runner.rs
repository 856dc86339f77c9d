//! Pluggable runner backends: internal, subprocess, HTTP (spec.md §4.4).
//!
//! The subprocess runner's allow-listing and output-truncation rules are
//! grounded on the teacher's `sandbox::native::NativeConfig` (no-shell,
//! explicit `allowed_executables`), simplified to plain host execution
//! since the isolation levels above that (native sandbox, containers) are
//! out of this spec's scope.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Fixed-response runner used by tests and by tools whose manifest sets
/// `supports.mock = false` but which still want an in-process stand-in.
pub struct MockRunner {
    response: serde_json::Value,
}

impl MockRunner {
    pub fn new(response: serde_json::Value) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ToolRunner for MockRunner {
    async fn run(&self, _input: &serde_json::Value) -> Result<serde_json::Value, String> {
        Ok(self.response.clone())
    }
}

/// Runs an in-process function. `internal` tools (spec.md's `Runner::Internal`)
/// are first-party functions compiled into the host, not external processes.
pub struct InternalRunner<F>
where
    F: Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync,
{
    func: F,
}

impl<F> InternalRunner<F>
where
    F: Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolRunner for InternalRunner<F>
where
    F: Fn(&serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync,
{
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value, String> {
        (self.func)(input)
    }
}

#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub executable: String,
    pub allowed_executables: Vec<String>,
    pub working_directory: std::path::PathBuf,
}

impl SubprocessConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.allowed_executables.is_empty() {
            return Err(
                "allowed_executables must not be empty — explicitly list the executables this runner may invoke".to_string(),
            );
        }
        let exec_name = self.executable.rsplit('/').next().unwrap_or(&self.executable);
        if !self
            .allowed_executables
            .iter()
            .any(|allowed| allowed == &self.executable || allowed == exec_name)
        {
            return Err(format!(
                "executable '{}' not in allowed list: {:?}",
                self.executable, self.allowed_executables
            ));
        }
        Ok(())
    }
}

/// Invokes `executable` with the input's `args` array as arguments and
/// `stdin` (if present) piped in; captures truncated stdout as the tool's
/// JSON output (parsed if valid JSON, else wrapped as `{"stdout": ...}`).
pub struct SubprocessRunner {
    config: SubprocessConfig,
}

impl SubprocessRunner {
    pub fn new(config: SubprocessConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value, String> {
        let args: Vec<String> = input
            .get("args")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let mut command = Command::new(&self.config.executable);
        command
            .args(&args)
            .current_dir(&self.config.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| e.to_string())?;

        if let Some(stdin_text) = input.get("stdin").and_then(|v| v.as_str()) {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(stdin_text.as_bytes()).await.map_err(|e| e.to_string())?;
            }
        }

        let output = child.wait_with_output().await.map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!(
                "process exited with {:?}: {}",
                output.status.code(),
                truncate(&output.stderr)
            ));
        }

        let stdout = truncate(&output.stdout);
        match serde_json::from_str::<serde_json::Value>(&stdout) {
            Ok(value) => Ok(value),
            Err(_) => Ok(serde_json::json!({ "stdout": stdout })),
        }
    }
}

fn truncate(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() > MAX_OUTPUT_BYTES {
        format!("{}...<truncated>", &text[..MAX_OUTPUT_BYTES])
    } else {
        text.into_owned()
    }
}

/// Calls an HTTP endpoint declared by the tool's manifest; the endpoint
/// itself is the permission target, not a configurable field here — the
/// kernel resolves it from the step input before construction.
pub struct HttpRunner {
    client: reqwest::Client,
    url: String,
}

impl HttpRunner {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ToolRunner for HttpRunner {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value, String> {
        let response = self
            .client
            .post(&self.url)
            .json(input)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("http runner received status {}", response.status()));
        }
        response.json::<serde_json::Value>().await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn internal_runner_calls_function() {
        let runner = InternalRunner::new(|input: &serde_json::Value| {
            Ok(serde_json::json!({ "echoed": input.clone() }))
        });
        let result = runner.run(&serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result["echoed"]["x"], 1);
    }

    #[test]
    fn subprocess_config_rejects_empty_allowlist() {
        let config = SubprocessConfig {
            executable: "python3".into(),
            allowed_executables: vec![],
            working_directory: std::path::PathBuf::from("/tmp"),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn subprocess_config_rejects_executable_outside_allowlist() {
        let config = SubprocessConfig {
            executable: "bash".into(),
            allowed_executables: vec!["python3".into()],
            working_directory: std::path::PathBuf::from("/tmp"),
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn subprocess_runner_echoes_stdout_as_json() {
        let config = SubprocessConfig {
            executable: "echo".into(),
            allowed_executables: vec!["echo".into()],
            working_directory: std::env::temp_dir(),
        };
        let runner = SubprocessRunner::new(config).unwrap();
        let result = runner
            .run(&serde_json::json!({"args": ["{\"ok\":true}"]}))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
    }
}
