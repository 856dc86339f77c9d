//! `ToolManifest` and `PluginManifest` (spec.md §3).

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runner {
    Internal,
    Subprocess,
    Http,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSupports {
    #[serde(default)]
    pub mock: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub runner: Runner,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub supports: ToolSupports,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_responses: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManifestValidationError {
    #[error("tool name must be kebab-case and <= 64 chars: '{0}'")]
    InvalidName(String),
    #[error("timeout_ms must be in [100, 600000], got {0}")]
    TimeoutOutOfRange(u64),
}

fn is_kebab_case(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

impl ToolManifest {
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if !is_kebab_case(&self.name) {
            return Err(ManifestValidationError::InvalidName(self.name.clone()));
        }
        if !(100..=600_000).contains(&self.timeout_ms) {
            return Err(ManifestValidationError::TimeoutOutOfRange(self.timeout_ms));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginProvides {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub planners: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    /// Relative path to the entry module. Must resolve inside the plugin
    /// directory after realpath resolution (no `../` traversal).
    pub entry: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub provides: PluginProvides,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PluginManifestError {
    #[error("plugin id must be lowercase alphanumeric/dash/underscore, <= 64 chars: '{0}'")]
    InvalidId(String),
    #[error("entry path '{0}' resolves outside the plugin directory")]
    EntryTraversal(String),
}

fn is_plugin_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl PluginManifest {
    pub fn validate(&self) -> Result<(), PluginManifestError> {
        if !is_plugin_id(&self.id) {
            return Err(PluginManifestError::InvalidId(self.id.clone()));
        }
        if !entry_stays_within_dir(&self.entry) {
            return Err(PluginManifestError::EntryTraversal(self.entry.clone()));
        }
        Ok(())
    }
}

/// Lexical traversal check: the entry path, joined onto the plugin dir and
/// normalized *without touching the filesystem*, must not climb above it.
/// (A real host additionally realpath-resolves after the file exists, to
/// catch symlink escapes; this catches the `../../etc/passwd` case up
/// front, at manifest-parse time, before any file is opened.)
fn entry_stays_within_dir(entry: &str) -> bool {
    let path = Path::new(entry);
    if path.is_absolute() {
        return false;
    }
    let mut depth: i64 = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> ToolManifest {
        ToolManifest {
            name: name.to_string(),
            version: "1.0.0".into(),
            description: "test".into(),
            runner: Runner::Internal,
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            permissions: vec![],
            timeout_ms: 1000,
            supports: ToolSupports::default(),
            mock_responses: None,
        }
    }

    #[test]
    fn accepts_kebab_case_name() {
        assert!(manifest("http-request").validate().is_ok());
    }

    #[test]
    fn rejects_non_kebab_name() {
        assert!(manifest("HttpRequest").validate().is_err());
        assert!(manifest("http_request").validate().is_err());
    }

    #[test]
    fn timeout_boundaries() {
        let mut m = manifest("ok");
        m.timeout_ms = 100;
        assert!(m.validate().is_ok());
        m.timeout_ms = 600_000;
        assert!(m.validate().is_ok());
        m.timeout_ms = 99;
        assert!(m.validate().is_err());
        m.timeout_ms = 600_001;
        assert!(m.validate().is_err());
    }

    #[test]
    fn entry_traversal_is_rejected() {
        assert!(!entry_stays_within_dir("../secrets.py"));
        assert!(!entry_stays_within_dir("a/../../b.py"));
        assert!(!entry_stays_within_dir("/etc/passwd"));
        assert!(entry_stays_within_dir("main.py"));
        assert!(entry_stays_within_dir("src/../main.py"));
    }
}
